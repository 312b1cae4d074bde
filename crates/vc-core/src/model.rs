use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Result, VcError};

/// Architecture generation of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVersion {
    #[default]
    V1,
    V2,
}

impl ModelVersion {
    /// Width of the content features the synthesis network consumes.
    pub fn text_encoder_in_channels(&self) -> usize {
        match self {
            ModelVersion::V1 => 256,
            ModelVersion::V2 => 768,
        }
    }

    /// Embedder layer whose output feeds the network.
    pub fn output_layer(&self) -> usize {
        match self {
            ModelVersion::V1 => 9,
            ModelVersion::V2 => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVersion::V1 => "v1",
            ModelVersion::V2 => "v2",
        }
    }
}

impl FromStr for ModelVersion {
    type Err = VcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" => Ok(ModelVersion::V1),
            "v2" => Ok(ModelVersion::V2),
            other => Err(VcError::Checkpoint(format!(
                "unknown architecture version '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four synthesis network architectures, keyed by version and pitch
/// conditioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkVariant {
    V1Pitch,
    V1NoPitch,
    V2Pitch,
    V2NoPitch,
}

impl NetworkVariant {
    pub fn select(version: ModelVersion, f0: bool) -> Self {
        match (version, f0) {
            (ModelVersion::V1, true) => NetworkVariant::V1Pitch,
            (ModelVersion::V1, false) => NetworkVariant::V1NoPitch,
            (ModelVersion::V2, true) => NetworkVariant::V2Pitch,
            (ModelVersion::V2, false) => NetworkVariant::V2NoPitch,
        }
    }

    pub fn version(&self) -> ModelVersion {
        match self {
            NetworkVariant::V1Pitch | NetworkVariant::V1NoPitch => ModelVersion::V1,
            NetworkVariant::V2Pitch | NetworkVariant::V2NoPitch => ModelVersion::V2,
        }
    }

    pub fn uses_pitch(&self) -> bool {
        matches!(self, NetworkVariant::V1Pitch | NetworkVariant::V2Pitch)
    }

    pub fn phone_channels(&self) -> usize {
        self.version().text_encoder_in_channels()
    }

    pub fn name(&self) -> &'static str {
        match self {
            NetworkVariant::V1Pitch => "SynthesizerTrnMs256NSFsid",
            NetworkVariant::V1NoPitch => "SynthesizerTrnMs256NSFsid_nono",
            NetworkVariant::V2Pitch => "SynthesizerTrnMs768NSFsid",
            NetworkVariant::V2NoPitch => "SynthesizerTrnMs768NSFsid_nono",
        }
    }
}

/// Pitch extraction method requested for a conversion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PitchMethod {
    Pm,
    Harvest,
    Dio,
    Crepe,
    CrepeTiny,
    #[default]
    Rmvpe,
    Fcpe,
    Hybrid(Vec<PitchMethod>),
}

impl FromStr for PitchMethod {
    type Err = VcError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim().to_ascii_lowercase();
        if let Some(inner) = raw
            .strip_prefix("hybrid[")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            let methods = inner
                .split('+')
                .map(|part| part.parse::<PitchMethod>())
                .collect::<Result<Vec<_>>>()?;
            if methods.len() < 2 || methods.iter().any(|m| matches!(m, PitchMethod::Hybrid(_))) {
                return Err(VcError::Config(format!("invalid hybrid pitch method '{s}'")));
            }
            return Ok(PitchMethod::Hybrid(methods));
        }
        match raw.as_str() {
            "pm" => Ok(PitchMethod::Pm),
            "harvest" => Ok(PitchMethod::Harvest),
            "dio" => Ok(PitchMethod::Dio),
            "crepe" => Ok(PitchMethod::Crepe),
            "crepe-tiny" | "crepe_tiny" => Ok(PitchMethod::CrepeTiny),
            "rmvpe" => Ok(PitchMethod::Rmvpe),
            "fcpe" => Ok(PitchMethod::Fcpe),
            _ => Err(VcError::Config(format!("unknown pitch method '{s}'"))),
        }
    }
}

impl fmt::Display for PitchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PitchMethod::Pm => f.write_str("pm"),
            PitchMethod::Harvest => f.write_str("harvest"),
            PitchMethod::Dio => f.write_str("dio"),
            PitchMethod::Crepe => f.write_str("crepe"),
            PitchMethod::CrepeTiny => f.write_str("crepe-tiny"),
            PitchMethod::Rmvpe => f.write_str("rmvpe"),
            PitchMethod::Fcpe => f.write_str("fcpe"),
            PitchMethod::Hybrid(methods) => {
                let parts: Vec<String> = methods.iter().map(|m| m.to_string()).collect();
                write!(f, "hybrid[{}]", parts.join("+"))
            }
        }
    }
}

impl Serialize for PitchMethod {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PitchMethod {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_follows_version_and_pitch_flag() {
        assert_eq!(NetworkVariant::select(ModelVersion::V1, true), NetworkVariant::V1Pitch);
        assert_eq!(NetworkVariant::select(ModelVersion::V2, false), NetworkVariant::V2NoPitch);
        assert_eq!(NetworkVariant::V2Pitch.phone_channels(), 768);
        assert!(!NetworkVariant::V1NoPitch.uses_pitch());
    }

    #[test]
    fn pitch_method_parses_hybrid() {
        let m: PitchMethod = "hybrid[rmvpe+crepe]".parse().unwrap();
        assert_eq!(m, PitchMethod::Hybrid(vec![PitchMethod::Rmvpe, PitchMethod::Crepe]));
        assert_eq!(m.to_string(), "hybrid[rmvpe+crepe]");
    }

    #[test]
    fn pitch_method_rejects_unknown() {
        assert!("yin".parse::<PitchMethod>().is_err());
        assert!("hybrid[rmvpe]".parse::<PitchMethod>().is_err());
    }

    #[test]
    fn version_round_trips_through_str() {
        assert_eq!("V2".parse::<ModelVersion>().unwrap(), ModelVersion::V2);
        assert_eq!(ModelVersion::V1.to_string(), "v1");
        assert!("v3".parse::<ModelVersion>().is_err());
    }
}
