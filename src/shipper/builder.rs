//! Builder for [`LogShipper`].
//!
//! Exposes endpoint selection, timeout tuning, TLS configuration, the
//! periodic flush interval and reconnect backoff parameters. Values are
//! validated once, in [`ShipperBuilder::build_config`].

use std::{io, time::Duration};

use thiserror::Error;

use crate::transport::{TlsOptions, Transport, TransportConfig, TrustPolicy};

use super::{
    LogShipper,
    config::{BackoffPolicy, ShipperConfig},
};

/// Errors that may occur while building a shipper.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid user supplied configuration.
    #[error("invalid shipper configuration: {0}")]
    InvalidConfig(String),
    /// Underlying I/O error whilst starting the worker.
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug, Default)]
struct TlsConfig {
    domain: Option<String>,
    trust: TrustPolicy,
}

/// Overrides for the reconnect backoff applied by the worker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackoffOverrides {
    base_ms: Option<u64>,
    cap_ms: Option<u64>,
}

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(BuildError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

impl BackoffOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the base delay in milliseconds.
    pub fn with_base_ms(mut self, base_ms: u64) -> Self {
        self.base_ms = Some(base_ms);
        self
    }

    /// Override the maximum delay in milliseconds.
    pub fn with_cap_ms(mut self, cap_ms: u64) -> Self {
        self.cap_ms = Some(cap_ms);
        self
    }

    fn apply(&self, policy: &mut BackoffPolicy) -> Result<(), BuildError> {
        if let Some(base) = self.base_ms {
            policy.base = Duration::from_millis(ensure_positive!(base, "backoff_base_ms")?);
        }
        if let Some(cap) = self.cap_ms {
            policy.cap = Duration::from_millis(ensure_positive!(cap, "backoff_cap_ms")?);
        }
        if policy.cap < policy.base {
            return Err(BuildError::InvalidConfig(
                "backoff_cap_ms must not be smaller than backoff_base_ms".into(),
            ));
        }
        Ok(())
    }
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

/// Builder for constructing [`LogShipper`] instances.
#[derive(Clone, Debug, Default)]
pub struct ShipperBuilder {
    endpoint: Option<(String, u16)>,
    tls: Option<TlsConfig>,
    capacity: Option<usize>,
    connect_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
    flush_interval_ms: Option<u64>,
    periodic_flush: Option<bool>,
    max_record_size: Option<usize>,
    token: Option<String>,
    backoff: Option<BackoffOverrides>,
}

impl ShipperBuilder {
    /// Create a new builder with no endpoint configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ship to `host:port` over TCP.
    pub fn with_tcp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.endpoint = Some((host.into(), port));
        self
    }

    /// Enable TLS. `domain` defaults to the host name.
    pub fn with_tls(mut self, domain: Option<String>, trust: TrustPolicy) -> Self {
        self.tls = Some(TlsConfig { domain, trust });
        self
    }

    option_setter!(
        #[doc = "Limit the number of undelivered records held at once."]
        with_capacity,
        capacity,
        usize
    );
    option_setter!(with_connect_timeout_ms, connect_timeout_ms, u64);
    option_setter!(with_write_timeout_ms, write_timeout_ms, u64);
    option_setter!(
        #[doc = "Set the period of the background flush."]
        with_flush_interval_ms,
        flush_interval_ms,
        u64
    );
    option_setter!(with_max_record_size, max_record_size, usize);

    /// Token merged into every record under the `token` key.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Turn the background flush on or off. It is on by default.
    pub fn with_periodic_flush(mut self, enabled: bool) -> Self {
        self.periodic_flush = Some(enabled);
        self
    }

    /// Gate periodic reconnects with exponential backoff after failures.
    pub fn with_backoff(mut self, overrides: BackoffOverrides) -> Self {
        self.backoff = Some(overrides);
        self
    }

    fn validate(&self) -> Result<(), BuildError> {
        match &self.endpoint {
            None => {
                return Err(BuildError::InvalidConfig(
                    "shipper requires a tcp endpoint".into(),
                ));
            }
            Some((host, _)) if host.trim().is_empty() => {
                return Err(BuildError::InvalidConfig(
                    "tcp host must not be empty".into(),
                ));
            }
            Some((_, 0)) => {
                return Err(BuildError::InvalidConfig(
                    "tcp port must be greater than zero".into(),
                ));
            }
            Some(_) => {}
        }
        if let Some(capacity) = self.capacity {
            ensure_positive!(capacity, "capacity")?;
        }
        if let Some(timeout) = self.connect_timeout_ms {
            ensure_positive!(timeout, "connect_timeout_ms")?;
        }
        if let Some(timeout) = self.write_timeout_ms {
            ensure_positive!(timeout, "write_timeout_ms")?;
        }
        if let Some(interval) = self.flush_interval_ms {
            ensure_positive!(interval, "flush_interval_ms")?;
        }
        if let Some(size) = self.max_record_size {
            ensure_positive!(size, "max_record_size")?;
        }
        Ok(())
    }

    /// Validate the builder and produce the runtime configuration.
    pub fn build_config(&self) -> Result<ShipperConfig, BuildError> {
        self.validate()?;
        let mut config = ShipperConfig::default();
        if let Some((host, port)) = &self.endpoint {
            config.transport = self.build_transport_config(host, *port);
        }
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if let Some(timeout) = self.write_timeout_ms {
            config.write_timeout = Duration::from_millis(timeout);
        }
        if let Some(interval) = self.flush_interval_ms {
            config.flush_interval = Some(Duration::from_millis(interval));
        }
        if self.periodic_flush == Some(false) {
            config.flush_interval = None;
        }
        if let Some(size) = self.max_record_size {
            config.max_record_size = size;
        }
        config.token = self.token.clone().filter(|t| !t.is_empty());
        if let Some(overrides) = &self.backoff {
            let mut policy = BackoffPolicy::default();
            overrides.apply(&mut policy)?;
            config.backoff = Some(policy);
        }
        Ok(config)
    }

    fn build_transport_config(&self, host: &str, port: u16) -> TransportConfig {
        let mut transport = TransportConfig::tcp(host, port);
        if let Some(timeout) = self.connect_timeout_ms {
            transport.connect_timeout = Duration::from_millis(timeout);
        }
        transport.tls = self.tls.as_ref().map(|tls_cfg| TlsOptions {
            domain: tls_cfg
                .domain
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| host.to_owned()),
            trust: tls_cfg.trust,
        });
        transport
    }

    /// Build a shipper over the configured TCP/TLS endpoint.
    pub fn build(&self) -> Result<LogShipper, BuildError> {
        let config = self.build_config()?;
        Ok(LogShipper::with_config(config)?)
    }

    /// Build a shipper over a caller-supplied transport. The endpoint
    /// settings are still validated but only the transport is used.
    pub fn build_with_transport<T: Transport + 'static>(
        &self,
        transport: T,
    ) -> Result<LogShipper, BuildError> {
        let config = self.build_config()?;
        Ok(LogShipper::with_transport(config, transport)?)
    }
}
