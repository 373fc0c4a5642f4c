use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::app::AppIdentity;
use crate::config::ClientConfig;
use crate::endpoint::{Endpoint, PathParams};
use crate::envelope::Envelope;
use crate::form::{FormBody, FormValue};
use crate::session::{DeviceInfo, SessionManager, CREDENTIAL_ERRORS};
use crate::transport::{Body, Channel, HttpRequest, Transport};
use crate::{FbxError, Result};

/// Version and base path the REST calls are issued under.
#[derive(Debug, Clone)]
struct ApiLocation {
    version: u32,
    base_url: String,
}

impl ApiLocation {
    /// `/api/v4/`
    fn prefix(&self) -> String {
        let base = self.base_url.trim_matches('/');
        if base.is_empty() {
            format!("/v{}/", self.version)
        } else {
            format!("/{}/v{}/", base, self.version)
        }
    }
}

/// Connection to one device on behalf of one app.
pub struct Client {
    config: ClientConfig,
    app: AppIdentity,
    transport: Transport,
    pub(crate) sessions: SessionManager,
    location: RwLock<ApiLocation>,
    request_ids: AtomicU64,
}

impl Client {
    pub fn new(config: ClientConfig, app: AppIdentity) -> Result<Self> {
        let transport = Transport::new(&config)?;
        let location = ApiLocation {
            version: config.api_version,
            base_url: config.api_base_url.clone(),
        };
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(1);
        Ok(Self {
            config,
            app,
            transport,
            sessions: SessionManager::default(),
            location: RwLock::new(location),
            request_ids: AtomicU64::new(seed),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn app(&self) -> &AppIdentity {
        &self.app
    }

    pub fn api_version(&self) -> u32 {
        self.location().version
    }

    pub fn query(&self, endpoint: &Endpoint) -> Query<'_> {
        Query::new(self, *endpoint)
    }

    /// Ask the device which API it speaks. Needs no session.
    ///
    /// The advertised version and base path are used for every later call.
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        let url = Url::parse(&format!("{}/api_version", self.config.origin()))?;
        let request = HttpRequest {
            method: reqwest::Method::GET,
            url,
            body: None,
        };
        let response = self.transport.execute(request, None).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FbxError::HttpStatus(status.as_u16()));
        }
        let info: DeviceInfo =
            serde_json::from_slice(&response.bytes().await?).map_err(|e| {
                FbxError::Decode(format!("malformed device info: {}", e))
            })?;

        let mut location = self
            .location
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(version) = info.major_version() {
            location.version = version;
        }
        if !info.api_base_url.is_empty() {
            location.base_url = info.api_base_url.clone();
        }
        log::debug!(
            "device {} speaks API v{} under {}",
            info.device_name,
            location.version,
            location.base_url
        );
        Ok(info)
    }

    pub(crate) fn next_request_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::Relaxed)
    }

    fn location(&self) -> ApiLocation {
        self.location
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn api_url(&self, origin: &str, path: &str) -> Result<Url> {
        let prefix = self.location().prefix();
        Ok(Url::parse(&format!("{}{}{}", origin, prefix, path))?)
    }

    async fn exchange(
        &self,
        request: HttpRequest,
        token: Option<&str>,
    ) -> Result<Envelope> {
        let response = self.transport.execute(request, token).await?;
        let envelope = Envelope::parse(&response.bytes().await?)?;
        if !envelope.success {
            log::warn!(
                "device refused call: [{}] {}",
                envelope.error_code,
                envelope.msg
            );
        }
        envelope.check()
    }

    /// Open the persistent channel served at `endpoint`.
    pub(crate) async fn open_channel(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Channel> {
        let path = endpoint.resolve(&PathParams::new())?;
        let url = self.api_url(&self.config.ws_origin(), &path)?;
        if endpoint.auth {
            let token = self.session_token().await?;
            self.transport.open_channel(&url, Some(&token)).await
        } else {
            self.transport.open_channel(&url, None).await
        }
    }
}

/// One call being built against an [`Endpoint`].
///
/// Nothing touches the network until one of the `send*` methods or
/// [`Query::download`] runs, and those fail early on an unresolved path
/// template or a missing required body.
pub struct Query<'c> {
    client: &'c Client,
    endpoint: Endpoint,
    params: PathParams,
    query: Vec<(String, String)>,
    body: Option<Body>,
    invalid: Option<FbxError>,
}

impl<'c> Query<'c> {
    fn new(client: &'c Client, endpoint: Endpoint) -> Self {
        Self {
            client,
            endpoint,
            params: PathParams::new(),
            query: Vec::new(),
            body: None,
            invalid: None,
        }
    }

    pub fn param(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: PathParams) -> Self {
        self.params.extend(params);
        self
    }

    /// Append a query string pair. Values follow the form rules, so
    /// booleans become `1`/`0`.
    pub fn query_param(
        mut self,
        name: impl Into<String>,
        value: impl Into<FormValue>,
    ) -> Self {
        self.query.push((name.into(), value.into().render()));
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Self {
        match serde_json::to_vec(body) {
            Ok(bytes) => self.body = Some(Body::Json(bytes)),
            Err(e) => {
                self.invalid = Some(FbxError::Request(format!(
                    "body cannot be serialized: {}",
                    e
                )))
            }
        }
        self
    }

    pub fn form(mut self, body: FormBody) -> Self {
        self.body = Some(Body::Form(body.encode()));
        self
    }

    pub async fn send<T: DeserializeOwned>(self) -> Result<T> {
        self.send_envelope().await?.into_result()
    }

    pub async fn send_unit(self) -> Result<()> {
        self.send_envelope().await.map(|_| ())
    }

    /// The checked envelope, with `result` left undecoded.
    pub async fn send_envelope(self) -> Result<Envelope> {
        let client = self.client;
        let auth = self.endpoint.auth;
        let request = self.prepare()?;
        if !auth {
            return client.exchange(request, None).await;
        }

        let token = client.session_token().await?;
        let result = client.exchange(request, Some(&token)).await;
        if let Err(FbxError::Api { code, .. }) = &result {
            if CREDENTIAL_ERRORS.contains(&code.as_str()) {
                client.invalidate_session(&token).await;
            }
        }
        result
    }

    /// Raw response of a binary endpoint.
    ///
    /// A 4xx reply is read as an envelope, so device errors still come back
    /// as [`FbxError::Api`].
    pub async fn download(self) -> Result<reqwest::Response> {
        let client = self.client;
        let auth = self.endpoint.auth;
        let request = self.prepare()?;
        let token = if auth {
            Some(client.session_token().await?)
        } else {
            None
        };
        let response = client
            .transport
            .execute(request, token.as_deref())
            .await?;
        let status = response.status();
        if !status.is_client_error() {
            return Ok(response);
        }

        let body = response.bytes().await?;
        let envelope = Envelope::parse(&body)
            .map_err(|_| FbxError::HttpStatus(status.as_u16()))?;
        envelope.check()?;
        Err(FbxError::HttpStatus(status.as_u16()))
    }

    /// Issue the call with an explicit token, bypassing the session.
    pub(crate) async fn dispatch(
        self,
        token: Option<String>,
    ) -> Result<Envelope> {
        let client = self.client;
        let request = self.prepare()?;
        client.exchange(request, token.as_deref()).await
    }

    fn prepare(self) -> Result<HttpRequest> {
        if let Some(err) = self.invalid {
            return Err(err);
        }
        let path = self.endpoint.resolve(&self.params)?;
        if self.endpoint.body_required && self.body.is_none() {
            return Err(FbxError::Request(format!(
                "{} {} needs a body",
                self.endpoint.verb, path
            )));
        }

        let mut url = self.client.api_url(&self.client.config.origin(), &path)?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(HttpRequest {
            method: self.endpoint.verb.as_method(),
            url,
            body: self.body,
        })
    }
}
