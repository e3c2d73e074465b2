//! Endpoint configuration consumed by [`TcpTransport`](super::TcpTransport).

use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

use native_tls::TlsConnector;

/// Default Logstash TCP input port.
pub const DEFAULT_PORT: u16 = 9300;
/// Default timeout for establishing the connection and the TLS handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Certificate validation applied during the TLS handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Standard certificate and hostname validation.
    #[default]
    Strict,
    /// Accept self-signed or otherwise invalid certificates. Only for
    /// non-production collectors.
    Permissive,
}

/// TLS connection options.
#[derive(Clone, Debug)]
pub struct TlsOptions {
    /// Domain name presented during the TLS handshake.
    pub domain: String,
    pub trust: TrustPolicy,
}

impl TlsOptions {
    pub(crate) fn connector(&self) -> io::Result<TlsConnector> {
        let mut builder = TlsConnector::builder();
        if self.trust == TrustPolicy::Permissive {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        builder.build().map_err(io::Error::other)
    }
}

/// Where and how to reach the collector.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Hostname or IP address to connect to.
    pub host: String,
    pub port: u16,
    /// Applied to the TCP connect and, separately, to the TLS handshake.
    pub connect_timeout: Duration,
    /// TLS settings; `None` ships over plain TCP.
    pub tls: Option<TlsOptions>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tls: None,
        }
    }
}

impl TransportConfig {
    /// Plain TCP configuration for `host:port`.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Enable TLS, presenting `host` as the handshake domain.
    pub fn with_tls(mut self, trust: TrustPolicy) -> Self {
        self.tls = Some(TlsOptions {
            domain: self.host.clone(),
            trust,
        });
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|iter| iter.collect())
    }
}
