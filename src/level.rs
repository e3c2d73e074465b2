use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Severity of a composed log event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShipLevel {
    Verbose,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(String);

impl ShipLevel {
    /// Lowercase name stored under `log_type` in shipped records.
    pub fn as_str(self) -> &'static str {
        match self {
            ShipLevel::Verbose => "verbose",
            ShipLevel::Debug => "debug",
            ShipLevel::Info => "info",
            ShipLevel::Warning => "warning",
            ShipLevel::Error => "error",
        }
    }

    /// Matching level of the `log` facade.
    pub fn as_log_level(self) -> log::Level {
        match self {
            ShipLevel::Verbose => log::Level::Trace,
            ShipLevel::Debug => log::Level::Debug,
            ShipLevel::Info => log::Level::Info,
            ShipLevel::Warning => log::Level::Warn,
            ShipLevel::Error => log::Level::Error,
        }
    }

    pub fn parse_or_info(s: &str) -> Self {
        s.parse().unwrap_or(Self::Info)
    }
}

impl fmt::Display for ShipLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verbose" | "trace" => Ok(Self::Verbose),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(ParseLevelError(s.to_owned())),
        }
    }
}
