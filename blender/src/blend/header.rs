use super::BlendError;
use semver::Version;

const MAGIC: &[u8; 7] = b"BLENDER";
const LEGACY_HEADER_SIZE: usize = 12;
const LARGE_HEADER_MIN_SIZE: usize = 17;

/// Byte order the file was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

// Callers are expected to hand in slices of at least the width being read.
impl Endian {
    pub fn read_u16(self, buf: &[u8]) -> u16 {
        let bytes = take(buf);
        match self {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        }
    }

    pub fn read_i16(self, buf: &[u8]) -> i16 {
        self.read_u16(buf) as i16
    }

    pub fn read_u32(self, buf: &[u8]) -> u32 {
        let bytes = take(buf);
        match self {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        }
    }

    pub fn read_i32(self, buf: &[u8]) -> i32 {
        self.read_u32(buf) as i32
    }

    pub fn read_u64(self, buf: &[u8]) -> u64 {
        let bytes = take(buf);
        match self {
            Endian::Little => u64::from_le_bytes(bytes),
            Endian::Big => u64::from_be_bytes(bytes),
        }
    }

    pub fn read_i64(self, buf: &[u8]) -> i64 {
        self.read_u64(buf) as i64
    }

    pub fn read_f32(self, buf: &[u8]) -> f32 {
        f32::from_bits(self.read_u32(buf))
    }
}

fn take<const N: usize>(buf: &[u8]) -> [u8; N] {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&buf[..N]);
    bytes
}

/// File header found at the start of every (decompressed) blend file.
///
/// Two layouts exist:
/// - `BLENDER-v405`: 12 bytes, pointer size marker, endianness, 3 digit version.
/// - `BLENDER17-01v0500`: Blender 5+, header size, format version and a 4 digit version.
///   These files always use 8 byte pointers, little endian and 64-bit block lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub pointer_size: usize,
    pub endian: Endian,
    /// Version as Blender writes it, e.g. `293` for 2.93 or `500` for 5.0.
    pub version: u16,
    pub large_blocks: bool,
    /// Length of the header in bytes. The first block header follows it.
    pub size: usize,
}

impl Header {
    pub fn parse(data: &[u8]) -> Result<Self, BlendError> {
        if data.len() < LEGACY_HEADER_SIZE || &data[..MAGIC.len()] != MAGIC {
            return Err(BlendError::InvalidHeader(
                "missing BLENDER magic".to_owned(),
            ));
        }

        match data[7] {
            b'_' | b'-' => Self::parse_legacy(data),
            b'0'..=b'9' => Self::parse_large(data),
            other => Err(BlendError::InvalidHeader(format!(
                "unknown pointer size marker {:?}",
                other as char
            ))),
        }
    }

    fn parse_legacy(data: &[u8]) -> Result<Self, BlendError> {
        let pointer_size = if data[7] == b'_' { 4 } else { 8 };
        let endian = match data[8] {
            b'v' => Endian::Little,
            b'V' => Endian::Big,
            other => {
                return Err(BlendError::InvalidHeader(format!(
                    "unknown endian marker {:?}",
                    other as char
                )))
            }
        };
        let version = parse_digits(&data[9..12])
            .ok_or_else(|| BlendError::InvalidHeader("version is not numeric".to_owned()))?;

        Ok(Self {
            pointer_size,
            endian,
            version,
            large_blocks: false,
            size: LEGACY_HEADER_SIZE,
        })
    }

    fn parse_large(data: &[u8]) -> Result<Self, BlendError> {
        let size = parse_digits(&data[7..9])
            .map(usize::from)
            .ok_or_else(|| BlendError::InvalidHeader("header size is not numeric".to_owned()))?;
        if size < LARGE_HEADER_MIN_SIZE || data.len() < size {
            return Err(BlendError::InvalidHeader(format!(
                "header claims {size} bytes"
            )));
        }
        if data[9] != b'-' || data[12] != b'v' {
            return Err(BlendError::InvalidHeader(
                "malformed large header".to_owned(),
            ));
        }

        let format = parse_digits(&data[10..12])
            .ok_or_else(|| BlendError::InvalidHeader("format is not numeric".to_owned()))?;
        if format != 1 {
            return Err(BlendError::InvalidHeader(format!(
                "unsupported header format {format}"
            )));
        }

        let version = parse_digits(&data[13..17])
            .ok_or_else(|| BlendError::InvalidHeader("version is not numeric".to_owned()))?;

        Ok(Self {
            pointer_size: 8,
            endian: Endian::Little,
            version,
            large_blocks: true,
            size,
        })
    }

    /// Size of every block header that follows this file header.
    pub fn block_header_size(&self) -> usize {
        match (self.large_blocks, self.pointer_size) {
            (true, _) => 32,
            (false, 8) => 24,
            _ => 20,
        }
    }

    /// Blender release that wrote the file, e.g. 4.2.0 for `402`.
    pub fn blender_version(&self) -> Version {
        Version::new(
            u64::from(self.version / 100),
            u64::from(self.version % 100),
            0,
        )
    }
}

fn parse_digits(bytes: &[u8]) -> Option<u16> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_64bit_little_endian() {
        let header = Header::parse(b"BLENDER-v293REND").unwrap();
        assert_eq!(header.pointer_size, 8);
        assert_eq!(header.endian, Endian::Little);
        assert_eq!(header.version, 293);
        assert_eq!(header.size, 12);
        assert_eq!(header.block_header_size(), 24);
        assert_eq!(header.blender_version(), Version::new(2, 93, 0));
    }

    #[test]
    fn legacy_32bit_big_endian() {
        let header = Header::parse(b"BLENDER_V279").unwrap();
        assert_eq!(header.pointer_size, 4);
        assert_eq!(header.endian, Endian::Big);
        assert_eq!(header.block_header_size(), 20);
        assert_eq!(header.blender_version(), Version::new(2, 79, 0));
    }

    #[test]
    fn large_header_from_blender_5() {
        let header = Header::parse(b"BLENDER17-01v0500").unwrap();
        assert!(header.large_blocks);
        assert_eq!(header.size, 17);
        assert_eq!(header.pointer_size, 8);
        assert_eq!(header.block_header_size(), 32);
        assert_eq!(header.blender_version(), Version::new(5, 0, 0));
    }

    #[test]
    fn rejects_other_files() {
        assert!(Header::parse(b"PK\x03\x04not a blend").is_err());
        assert!(Header::parse(b"BLENDER").is_err());
        assert!(Header::parse(b"BLENDER-x405").is_err());
        assert!(Header::parse(b"BLENDER17-02v0500").is_err());
    }
}
