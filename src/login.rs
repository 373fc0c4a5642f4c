//! Login endpoints and app registration.
//!
//! An app is registered once: [`Client::authorize`] asks the device owner
//! to approve it and returns the app token, then
//! [`Client::wait_for_authorization`] polls until the owner answers on the
//! device itself.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::client::Client;
use crate::endpoint::Endpoint;
use crate::{FbxError, Result};

pub const LOGIN: Endpoint = Endpoint::get("login/").public();
pub const LOGIN_SESSION: Endpoint =
    Endpoint::post("login/session/").public().with_body();
pub const LOGOUT: Endpoint = Endpoint::post("login/logout/");
pub const AUTHORIZE: Endpoint =
    Endpoint::post("login/authorize/").public().with_body();
pub const TRACK_AUTHORIZE: Endpoint =
    Endpoint::get("login/authorize/{track_id}").public();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub device_name: String,
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Authorization {
    pub app_token: String,
    pub track_id: u64,
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorization")
            .field("app_token", &"<redacted>")
            .field("track_id", &self.track_id)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Timeout,
    Granted,
    Denied,
    #[serde(other)]
    Unknown,
}

impl AuthorizationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuthorizationStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthorizationState {
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub challenge: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct LoginChallenge {
    pub logged_in: bool,
    pub challenge: String,
    pub password_salt: String,
}

#[derive(Serialize)]
pub(crate) struct SessionRequest {
    pub app_id: String,
    pub password: String,
}

#[derive(Deserialize)]
pub(crate) struct SessionGrant {
    pub session_token: String,
    #[serde(default)]
    pub challenge: String,
    #[serde(default)]
    pub permissions: HashMap<String, bool>,
}

impl Client {
    /// Ask the device owner to approve this app.
    ///
    /// The returned app token only becomes usable once the request is
    /// granted; build a client with it afterwards.
    pub async fn authorize(
        &self,
        device_name: impl Into<String>,
    ) -> Result<Authorization> {
        let request = self.app().token_request(device_name);
        log::info!("requesting authorization for {}", request.app_id);
        self.query(&AUTHORIZE).json(&request).send().await
    }

    pub async fn track_authorization(
        &self,
        track_id: u64,
    ) -> Result<AuthorizationState> {
        self.query(&TRACK_AUTHORIZE)
            .param("track_id", track_id.to_string())
            .send()
            .await
    }

    /// Poll every `poll_interval` until the request leaves the pending
    /// state, for at most `deadline`.
    pub async fn wait_for_authorization(
        &self,
        track_id: u64,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Result<AuthorizationStatus> {
        let give_up = Instant::now() + deadline;
        loop {
            let state = self.track_authorization(track_id).await?;
            if state.status.is_terminal() {
                log::info!("authorization {}: {:?}", track_id, state.status);
                return Ok(state.status);
            }
            if Instant::now() + poll_interval > give_up {
                return Err(FbxError::Timeout(format!(
                    "authorization {} to be answered",
                    track_id
                )));
            }
            log::debug!("authorization {} still pending", track_id);
            tokio::time::sleep(poll_interval).await;
        }
    }
}
