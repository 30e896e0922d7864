use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown {role} model '{given}' (expected one of: {expected})")]
pub struct ModelParseError {
    role: &'static str,
    given: String,
    expected: String,
}

/// Workstation models a SET archive can be converted from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OriginModel {
    #[serde(rename = "PA4X")]
    Pa4x,
    #[serde(rename = "PA5X")]
    Pa5x,
}

impl OriginModel {
    pub const ALL: &'static [OriginModel] = &[OriginModel::Pa4x, OriginModel::Pa5x];

    pub fn as_str(&self) -> &'static str {
        match self {
            OriginModel::Pa4x => "PA4X",
            OriginModel::Pa5x => "PA5X",
        }
    }
}

/// Workstation models a SET archive can be converted to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum TargetModel {
    #[serde(rename = "PA3X")]
    Pa3x,
    #[serde(rename = "PA600")]
    Pa600,
    #[serde(rename = "PA900")]
    Pa900,
}

impl TargetModel {
    pub const ALL: &'static [TargetModel] =
        &[TargetModel::Pa3x, TargetModel::Pa600, TargetModel::Pa900];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetModel::Pa3x => "PA3X",
            TargetModel::Pa600 => "PA600",
            TargetModel::Pa900 => "PA900",
        }
    }

    /// Highest sample format the target's sample RAM accepts.
    pub fn sample_profile(&self) -> SampleProfile {
        match self {
            TargetModel::Pa3x => SampleProfile {
                max_sample_rate: 48_000,
                bits_per_sample: 16,
            },
            TargetModel::Pa600 => SampleProfile {
                max_sample_rate: 44_100,
                bits_per_sample: 16,
            },
            TargetModel::Pa900 => SampleProfile {
                max_sample_rate: 48_000,
                bits_per_sample: 16,
            },
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SampleProfile {
    pub max_sample_rate: u32,
    pub bits_per_sample: u16,
}

fn parse_model<T: Copy>(
    role: &'static str,
    s: &str,
    all: &[T],
    name: fn(&T) -> &'static str,
) -> Result<T, ModelParseError> {
    let wanted = s.trim();
    all.iter()
        .copied()
        .find(|m| name(m).eq_ignore_ascii_case(wanted))
        .ok_or_else(|| ModelParseError {
            role,
            given: wanted.to_string(),
            expected: all.iter().map(name).collect::<Vec<_>>().join(", "),
        })
}

impl FromStr for OriginModel {
    type Err = ModelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_model("origin", s, Self::ALL, OriginModel::as_str)
    }
}

impl FromStr for TargetModel {
    type Err = ModelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_model("target", s, Self::ALL, TargetModel::as_str)
    }
}

impl fmt::Display for OriginModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TargetModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
