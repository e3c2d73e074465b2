//! INI configuration for the shipper.
//!
//! Settings live in a `[shipper]` section:
//!
//! ```ini
//! [shipper]
//! host = logs.example.com
//! port = 6514
//! tls = true
//! token = abc123
//! flush_interval_ms = 5000
//! ```
//!
//! Parsing goes through `rust-ini`; every recognised key maps onto a
//! [`ShipperBuilder`] setter, so validation stays in one place.

use std::{fmt::Display, io, path::Path, str::FromStr};

use ini::{Ini, Properties};
use thiserror::Error;

use crate::{
    shipper::{BackoffOverrides, ShipperBuilder},
    transport::{DEFAULT_PORT, TrustPolicy},
};

pub const SECTION: &str = "shipper";

const KNOWN_KEYS: &[&str] = &[
    "host",
    "port",
    "tls",
    "tls_domain",
    "tls_insecure",
    "token",
    "connect_timeout_ms",
    "write_timeout_ms",
    "flush_interval_ms",
    "periodic_flush",
    "capacity",
    "max_record_size",
    "backoff_base_ms",
    "backoff_cap_ms",
];

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} is an empty file")]
    Empty(String),
    #[error("invalid INI syntax: {0}")]
    Parse(String),
    #[error("missing [shipper] section")]
    MissingSection,
    #[error("missing required key `{0}`")]
    MissingKey(&'static str),
    #[error("unknown key `{0}` in [shipper]")]
    UnknownKey(String),
    #[error("invalid value {value:?} for `{key}`: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Load a builder from the INI file at `path`.
pub fn load_file(path: impl AsRef<Path>) -> Result<ShipperBuilder, ConfigFileError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if text.trim().is_empty() {
        return Err(ConfigFileError::Empty(path.display().to_string()));
    }
    load_str(&text)
}

/// Load a builder from INI text.
pub fn load_str(text: &str) -> Result<ShipperBuilder, ConfigFileError> {
    let ini = Ini::load_from_str(text).map_err(|err| ConfigFileError::Parse(err.to_string()))?;
    let section = ini
        .section(Some(SECTION))
        .ok_or(ConfigFileError::MissingSection)?;
    builder_from_section(section)
}

fn builder_from_section(section: &Properties) -> Result<ShipperBuilder, ConfigFileError> {
    if let Some((key, _)) = section.iter().find(|(key, _)| !KNOWN_KEYS.contains(key)) {
        return Err(ConfigFileError::UnknownKey(key.to_owned()));
    }

    let host = section
        .get("host")
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(ConfigFileError::MissingKey("host"))?;
    let port = parse_opt(section, "port")?.unwrap_or(DEFAULT_PORT);
    let mut builder = ShipperBuilder::new().with_tcp(host, port);

    let insecure = parse_bool(section, "tls_insecure")?.unwrap_or(false);
    let domain = section.get("tls_domain").map(|d| d.trim().to_owned());
    if parse_bool(section, "tls")?.unwrap_or(false) || insecure || domain.is_some() {
        let trust = if insecure {
            TrustPolicy::Permissive
        } else {
            TrustPolicy::Strict
        };
        builder = builder.with_tls(domain, trust);
    }

    if let Some(token) = section.get("token") {
        builder = builder.with_token(token.trim());
    }
    if let Some(value) = parse_opt(section, "connect_timeout_ms")? {
        builder = builder.with_connect_timeout_ms(value);
    }
    if let Some(value) = parse_opt(section, "write_timeout_ms")? {
        builder = builder.with_write_timeout_ms(value);
    }
    if let Some(value) = parse_opt(section, "flush_interval_ms")? {
        builder = builder.with_flush_interval_ms(value);
    }
    if let Some(enabled) = parse_bool(section, "periodic_flush")? {
        builder = builder.with_periodic_flush(enabled);
    }
    if let Some(value) = parse_opt(section, "capacity")? {
        builder = builder.with_capacity(value);
    }
    if let Some(value) = parse_opt(section, "max_record_size")? {
        builder = builder.with_max_record_size(value);
    }

    let base = parse_opt(section, "backoff_base_ms")?;
    let cap = parse_opt(section, "backoff_cap_ms")?;
    if base.is_some() || cap.is_some() {
        let mut overrides = BackoffOverrides::new();
        if let Some(base) = base {
            overrides = overrides.with_base_ms(base);
        }
        if let Some(cap) = cap {
            overrides = overrides.with_cap_ms(cap);
        }
        builder = builder.with_backoff(overrides);
    }
    Ok(builder)
}

fn parse_opt<T>(section: &Properties, key: &'static str) -> Result<Option<T>, ConfigFileError>
where
    T: FromStr,
    T::Err: Display,
{
    section
        .get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|err| ConfigFileError::InvalidValue {
                    key,
                    value: raw.to_owned(),
                    reason: err.to_string(),
                })
        })
        .transpose()
}

fn parse_bool(section: &Properties, key: &'static str) -> Result<Option<bool>, ConfigFileError> {
    section
        .get(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigFileError::InvalidValue {
                key,
                value: raw.to_owned(),
                reason: "expected a boolean".into(),
            }),
        })
        .transpose()
}
