use std::fmt;
use std::time::Duration;

use crate::session::DeviceInfo;
use crate::tls::TlsMode;
use crate::{
    DEFAULT_API_BASE_URL, DEFAULT_API_VERSION, DEFAULT_HOST, DEFAULT_PORT,
};

pub const DEFAULT_CHUNK_SIZE: usize = 512_000;
const DEFAULT_MAX_IN_FLIGHT: usize = 4;
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Scheme of the persistent channel riding on this one.
    pub fn ws_str(&self) -> &'static str {
        match self {
            Scheme::Http => "ws",
            Scheme::Https => "wss",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Maximum size of one binary frame.
    pub chunk_size: usize,
    /// Chunks allowed on the wire without an acknowledgement.
    pub max_in_flight: usize,
    /// Applied to every acknowledgement wait.
    pub ack_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

/// Where and how to reach the device. Owned by one client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Major API version used until the device reports its own.
    pub api_version: u32,
    pub api_base_url: String,
    pub tls: TlsMode,
    pub request_timeout: Option<Duration>,
    pub upload: UploadConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::local()
    }
}

impl ClientConfig {
    /// The box on the local network, through its well known name.
    pub fn local() -> Self {
        Self {
            scheme: Scheme::Https,
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            api_version: DEFAULT_API_VERSION,
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            tls: TlsMode::default(),
            request_timeout: None,
            upload: UploadConfig::default(),
        }
    }

    /// Unencrypted access, e.g. `http://192.168.1.254:80`.
    pub fn plain(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Http,
            host: host.into(),
            port,
            ..Self::local()
        }
    }

    /// Remote access through the box's personal domain.
    pub fn remote(domain: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Https,
            host: domain.into(),
            port,
            ..Self::local()
        }
    }

    /// Build a configuration out of what the device advertises about itself.
    ///
    /// `remote` selects the HTTPS domain and port, otherwise the host/port
    /// pair the info was fetched from is used over plain HTTP.
    pub fn from_device(
        info: &DeviceInfo,
        host: impl Into<String>,
        port: u16,
        remote: bool,
    ) -> Self {
        let mut config = if remote {
            Self::remote(info.api_domain.clone(), info.https_port)
        } else {
            Self::plain(host, port)
        };
        if let Some(version) = info.major_version() {
            config.api_version = version;
        }
        if !info.api_base_url.is_empty() {
            config.api_base_url = info.api_base_url.clone();
        }
        config
    }

    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_upload(mut self, upload: UploadConfig) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// `scheme://host:port`
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub(crate) fn ws_origin(&self) -> String {
        format!("{}://{}:{}", self.scheme.ws_str(), self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.origin(), "https://mafreebox.freebox.fr:443");
        assert_eq!(config.ws_origin(), "wss://mafreebox.freebox.fr:443");
        assert_eq!(config.api_version, 4);
        assert_eq!(config.upload.chunk_size, 512_000);
    }

    #[test]
    fn from_device_picks_remote_endpoint() {
        let info = DeviceInfo {
            api_domain: "abc.fbxos.fr".to_owned(),
            https_port: 12345,
            https_available: true,
            api_version: "6.0".to_owned(),
            api_base_url: "/api/".to_owned(),
            ..Default::default()
        };
        let remote =
            ClientConfig::from_device(&info, "192.168.1.254", 80, true);
        assert_eq!(remote.origin(), "https://abc.fbxos.fr:12345");
        assert_eq!(remote.api_version, 6);

        let local =
            ClientConfig::from_device(&info, "192.168.1.254", 80, false);
        assert_eq!(local.origin(), "http://192.168.1.254:80");
    }
}
