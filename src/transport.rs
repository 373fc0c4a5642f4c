use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use rustls::ClientConfig as TlsConfig;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{
    connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::config::ClientConfig;
use crate::{FbxError, Result};

pub type Channel = WebSocketStream<MaybeTlsStream<TcpStream>>;

// lowercase form of crate::AUTH_HEADER, required by HeaderName::from_static
const AUTH_HEADER_NAME: &str = "x-fbx-app-auth";

#[derive(Debug, Clone)]
pub(crate) enum Body {
    Json(Vec<u8>),
    Form(String),
}

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub method: reqwest::Method,
    pub url: Url,
    pub body: Option<Body>,
}

/// The two wire channels to the device. Both use the same TLS settings.
pub(crate) struct Transport {
    http: reqwest::Client,
    tls: Arc<TlsConfig>,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let tls = config.tls.client_config()?;
        let mut builder = reqwest::Client::builder()
            .use_preconfigured_tls(TlsConfig::clone(&tls));
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            tls,
        })
    }

    /// Issue one request. Server side failures (5xx) are reported before
    /// anything is read from the body.
    pub async fn execute(
        &self,
        request: HttpRequest,
        token: Option<&str>,
    ) -> Result<reqwest::Response> {
        log::debug!("{} {}", request.method, request.url);
        let mut builder = self.http.request(request.method, request.url);
        if let Some(token) = token {
            builder = builder.header(AUTH_HEADER_NAME, auth_value(token)?);
        }
        builder = match request.body {
            Some(Body::Json(bytes)) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(bytes),
            Some(Body::Form(encoded)) => builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encoded),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        if status.as_u16() >= 500 {
            log::warn!("device failed with {}", status);
            return Err(FbxError::HttpStatus(status.as_u16()));
        }
        Ok(response)
    }

    /// Open the persistent duplex channel at `url`.
    pub async fn open_channel(
        &self,
        url: &Url,
        token: Option<&str>,
    ) -> Result<Channel> {
        log::debug!("opening channel {}", url);
        let mut request = url.as_str().into_client_request()?;
        if let Some(token) = token {
            request.headers_mut().insert(
                HeaderName::from_static(AUTH_HEADER_NAME),
                auth_value(token)?,
            );
        }
        let connector = Some(Connector::Rustls(self.tls.clone()));
        let (channel, response) =
            connect_async_tls_with_config(request, None, false, connector)
                .await?;
        log::debug!("channel open ({})", response.status());
        Ok(channel)
    }
}

fn auth_value(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(token).map_err(|_| {
        FbxError::Request("session token is not a valid header value".into())
    })?;
    value.set_sensitive(true);
    Ok(value)
}
