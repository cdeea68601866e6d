//! Replay command vocabulary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a replay does once inputs are reconstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReproCommand {
    #[serde(rename = "run")]
    Run,
    #[serde(rename = "minify")]
    Minify,
    #[serde(rename = "get_args")]
    GetArgs,
    #[serde(rename = "minifier-query")]
    MinifierQuery,
}

impl ReproCommand {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Minify => "minify",
            Self::GetArgs => "get_args",
            Self::MinifierQuery => "minifier-query",
        }
    }

    /// Commands that compile and therefore need a supported device.
    pub const fn compiles(self) -> bool {
        !matches!(self, Self::GetArgs)
    }
}

impl fmt::Display for ReproCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReproCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(Self::Run),
            "minify" => Ok(Self::Minify),
            "get_args" => Ok(Self::GetArgs),
            "minifier-query" | "minifier_query" => Ok(Self::MinifierQuery),
            other => Err(format!("unknown repro command '{other}'")),
        }
    }
}

/// Whether a replay compares compiled output against eager output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccuracyMode {
    #[default]
    #[serde(rename = "")]
    Off,
    #[serde(rename = "accuracy")]
    Accuracy,
    #[serde(rename = "strict-accuracy", alias = "strict_accuracy")]
    StrictAccuracy,
}

impl AccuracyMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "",
            Self::Accuracy => "accuracy",
            Self::StrictAccuracy => "strict-accuracy",
        }
    }

    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Maps the boolean form of the accuracy flag.
    pub const fn from_flag(enabled: bool) -> Self {
        if enabled {
            Self::Accuracy
        } else {
            Self::Off
        }
    }
}

impl fmt::Display for AccuracyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccuracyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "false" => Ok(Self::Off),
            "accuracy" | "true" => Ok(Self::Accuracy),
            "strict-accuracy" | "strict_accuracy" => Ok(Self::StrictAccuracy),
            other => Err(format!("unknown accuracy mode '{other}'")),
        }
    }
}
