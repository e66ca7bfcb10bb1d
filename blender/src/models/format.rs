use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown output format: {0}")]
pub struct FormatError(String);

// More context: https://docs.blender.org/manual/en/latest/advanced/command_line/arguments.html#format-options
// Names follow Blender's image type identifiers, which is what `-F` expects.
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Format {
    TARGA,
    IRIS,
    JPEG,
    MOVIE,
    IRIZ,
    RAWTGA,
    #[default]
    PNG,
    BMP,
    HDR,
    TIFF,
    OPEN_EXR,
    FFMPEG,
    FRAMESERVER,
    CINEON,
    OPEN_EXR_MULTILAYER,
    DPX,
    DDS,
    JP2,
    WEBP,
    AVI_JPEG,
    // imtype value that has no known name, kept so it shows up in reports
    Unknown(i32),
    // name reported by blender that is not listed above, passed through as is
    Other(String),
}

impl Format {
    /// Map `ImageFormatData.imtype` to a format.
    pub fn from_imtype(imtype: i32) -> Self {
        match imtype {
            0 => Format::TARGA,
            1 => Format::IRIS,
            2 => Format::JPEG,
            3 => Format::MOVIE,
            4 => Format::IRIZ,
            7 => Format::RAWTGA,
            14 => Format::PNG,
            15 => Format::BMP,
            16 => Format::HDR,
            17 => Format::TIFF,
            18 => Format::OPEN_EXR,
            19 => Format::FFMPEG,
            20 => Format::FRAMESERVER,
            21 => Format::CINEON,
            22 => Format::OPEN_EXR_MULTILAYER,
            23 => Format::DPX,
            24 => Format::DDS,
            25 => Format::JP2,
            26 => Format::WEBP,
            28 => Format::AVI_JPEG,
            other => Format::Unknown(other),
        }
    }

    /// Unknown imtype values cannot be handed to blender on the command line.
    /// Unlisted names came from blender itself and can.
    pub fn is_known(&self) -> bool {
        !matches!(self, Format::Unknown(_))
    }
}

impl FromStr for Format {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.is_empty() {
            return Err(FormatError(s.to_owned()));
        }
        let upper = name.to_uppercase();
        let format = match upper.as_str() {
            "TARGA" | "TGA" => Format::TARGA,
            "IRIS" => Format::IRIS,
            "JPEG" | "JPG" => Format::JPEG,
            "MOVIE" => Format::MOVIE,
            "IRIZ" => Format::IRIZ,
            "RAWTGA" | "RAWTARGA" | "TARGA_RAW" => Format::RAWTGA,
            "PNG" => Format::PNG,
            "BMP" => Format::BMP,
            "HDR" => Format::HDR,
            "TIFF" => Format::TIFF,
            "OPEN_EXR" | "EXR" => Format::OPEN_EXR,
            "FFMPEG" => Format::FFMPEG,
            "FRAMESERVER" => Format::FRAMESERVER,
            "CINEON" => Format::CINEON,
            "OPEN_EXR_MULTILAYER" => Format::OPEN_EXR_MULTILAYER,
            "DPX" => Format::DPX,
            "DDS" => Format::DDS,
            "JP2" | "JPEG2000" => Format::JP2,
            "WEBP" => Format::WEBP,
            "AVI_JPEG" | "AVIJPEG" => Format::AVI_JPEG,
            other => match other.strip_prefix("UNKNOWN_").map(str::parse) {
                Some(Ok(n)) => Format::Unknown(n),
                _ => Format::Other(name.to_owned()),
            },
        };
        Ok(format)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::TARGA => "TARGA",
            Format::IRIS => "IRIS",
            Format::JPEG => "JPEG",
            Format::MOVIE => "MOVIE",
            Format::IRIZ => "IRIZ",
            Format::RAWTGA => "RAWTGA",
            Format::PNG => "PNG",
            Format::BMP => "BMP",
            Format::HDR => "HDR",
            Format::TIFF => "TIFF",
            Format::OPEN_EXR => "OPEN_EXR",
            Format::FFMPEG => "FFMPEG",
            Format::FRAMESERVER => "FRAMESERVER",
            Format::CINEON => "CINEON",
            Format::OPEN_EXR_MULTILAYER => "OPEN_EXR_MULTILAYER",
            Format::DPX => "DPX",
            Format::DDS => "DDS",
            Format::JP2 => "JP2",
            Format::WEBP => "WEBP",
            Format::AVI_JPEG => "AVI_JPEG",
            Format::Unknown(n) => return write!(f, "UNKNOWN_{n}"),
            Format::Other(name) => name.as_str(),
        };
        f.write_str(name)
    }
}

impl Serialize for Format {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Format {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
