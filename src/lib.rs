pub mod app;
pub mod client;
pub mod config;
pub mod crypto;
pub mod endpoint;
pub mod envelope;
pub mod errors;
pub mod form;
pub mod fs;
pub mod login;
pub mod session;
pub mod tls;
mod transport;
pub mod upload;

pub use app::AppIdentity;
pub use client::{Client, Query};
pub use config::{ClientConfig, Scheme, UploadConfig};
pub use endpoint::{Endpoint, PathParams, Verb};
pub use envelope::Envelope;
pub use errors::{ErrorKind, FbxError, Result};
pub use session::{DeviceInfo, Session};
pub use tls::{Fingerprint, TlsMode};

/// Header carrying the session token.
pub const AUTH_HEADER: &str = "X-Fbx-App-Auth";

pub const DEFAULT_HOST: &str = "mafreebox.freebox.fr";
pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_API_VERSION: u32 = 4;
pub const DEFAULT_API_BASE_URL: &str = "/api/";
