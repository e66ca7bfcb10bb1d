use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Render engine identifiers as stored in `RenderData.engine`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub enum Engine {
    Cycles,
    #[default]
    Eevee,
    // Blender 4.2 renamed the engine id, 4.2+ files carry this one
    EeveeNext,
    Workbench,
    // third party engines, e.g. octane or luxcore
    Other(String),
}

impl Engine {
    /// Name accepted by `-E` on the command line.
    pub fn short_name(&self) -> &str {
        match self {
            Engine::Cycles => "CYCLES",
            Engine::Eevee | Engine::EeveeNext => "BLENDER_EEVEE",
            Engine::Workbench => "BLENDER_WORKBENCH",
            Engine::Other(name) => name,
        }
    }
}

impl From<&str> for Engine {
    fn from(s: &str) -> Self {
        match s {
            "CYCLES" => Engine::Cycles,
            "BLENDER_EEVEE" | "" => Engine::Eevee,
            "BLENDER_EEVEE_NEXT" => Engine::EeveeNext,
            "BLENDER_WORKBENCH" => Engine::Workbench,
            other => Engine::Other(other.to_owned()),
        }
    }
}

impl FromStr for Engine {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Engine::from(s))
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::EeveeNext => f.write_str("BLENDER_EEVEE_NEXT"),
            other => f.write_str(other.short_name()),
        }
    }
}

impl Serialize for Engine {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Engine {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Engine::from(value.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blender_ids() {
        assert_eq!("CYCLES".parse::<Engine>(), Ok(Engine::Cycles));
        assert_eq!("".parse::<Engine>(), Ok(Engine::Eevee));
        assert_eq!(
            "octane".parse::<Engine>(),
            Ok(Engine::Other("octane".to_owned()))
        );
        assert_eq!(Engine::EeveeNext.to_string(), "BLENDER_EEVEE_NEXT");
        assert_eq!(Engine::EeveeNext.short_name(), "BLENDER_EEVEE");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Engine::Workbench).unwrap();
        assert_eq!(json, "\"BLENDER_WORKBENCH\"");
        let engine: Engine = serde_json::from_str("\"CYCLES\"").unwrap();
        assert_eq!(engine, Engine::Cycles);
    }
}
