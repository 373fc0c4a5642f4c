use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::client::Client;
use crate::crypto::compute_password;
use crate::login::{
    LoginChallenge, SessionGrant, SessionRequest, LOGIN, LOGIN_SESSION, LOGOUT,
};
use crate::{FbxError, Result};

/// Error codes meaning the session token is no longer accepted.
pub const CREDENTIAL_ERRORS: [&str; 3] =
    ["auth_required", "invalid_token", "invalid_session"];

/// What the device advertises at `/api_version`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub uid: String,
    pub device_name: String,
    pub device_type: String,
    pub box_model_name: String,
    pub api_base_url: String,
    pub api_version: String,
    pub https_available: bool,
    pub https_port: u16,
    pub api_domain: String,
}

impl DeviceInfo {
    /// Major API version, e.g. 4 for `"4.0"`.
    pub fn major_version(&self) -> Option<u32> {
        let version: f64 = self.api_version.trim().parse().ok()?;
        if version.is_finite() && version >= 0.0 {
            Some(version.trunc() as u32)
        } else {
            None
        }
    }
}

/// Credentials obtained by a successful handshake.
#[derive(Clone)]
pub struct Session {
    token: String,
    pub challenge: String,
    pub permissions: HashMap<String, bool>,
    pub api_version: u32,
    pub opened_at: SystemTime,
}

impl Session {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.get(name).copied().unwrap_or(false)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("challenge", &self.challenge)
            .field("permissions", &self.permissions)
            .field("api_version", &self.api_version)
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

/// Guarded part of [`SessionManager`].
#[derive(Default)]
pub(crate) struct SessionSlot {
    pub session: Option<Session>,
    /// Last failed handshake and the round it ended.
    failure: Option<(u64, FbxError)>,
}

/// Holds the session of one client. The mutex is held for the whole
/// handshake, so concurrent callers wait for a single one and share its
/// outcome, failures included.
#[derive(Default)]
pub(crate) struct SessionManager {
    state: Mutex<SessionSlot>,
    failed_rounds: AtomicU64,
}

impl SessionManager {
    pub async fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        self.state.lock().await
    }

    pub async fn snapshot(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    /// Handshake rounds that failed so far.
    pub fn failed_rounds(&self) -> u64 {
        self.failed_rounds.load(Ordering::SeqCst)
    }

    /// The failure of a round that ended after `seen`, if any.
    pub fn failed_since(slot: &SessionSlot, seen: u64) -> Option<FbxError> {
        match &slot.failure {
            Some((round, err)) if *round > seen => Some(err.replay()),
            _ => None,
        }
    }

    /// Store a handshake outcome in the locked slot.
    pub fn record(&self, slot: &mut SessionSlot, outcome: &Result<Session>) {
        match outcome {
            Ok(session) => {
                slot.session = Some(session.clone());
                slot.failure = None;
            }
            Err(err) => {
                let round =
                    self.failed_rounds.fetch_add(1, Ordering::SeqCst) + 1;
                slot.session = None;
                slot.failure = Some((round, err.replay()));
            }
        }
    }

    /// Drop the session if it still carries `token`.
    pub async fn clear_if(&self, token: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.session.as_ref() {
            Some(session) if session.token == token => {
                state.session = None;
                true
            }
            _ => false,
        }
    }
}

impl Client {
    /// Current session token, running the handshake when none is held.
    ///
    /// Callers that queued behind a failed handshake get its error instead
    /// of starting another one.
    pub(crate) async fn session_token(&self) -> Result<String> {
        let seen = self.sessions.failed_rounds();
        let mut state = self.sessions.lock().await;
        if let Some(session) = state.session.as_ref() {
            return Ok(session.token.clone());
        }
        if let Some(err) = SessionManager::failed_since(&state, seen) {
            log::debug!("sharing the outcome of the last handshake");
            return Err(err);
        }
        let session = self.establish(&mut state).await?;
        Ok(session.token)
    }

    async fn establish(&self, slot: &mut SessionSlot) -> Result<Session> {
        let outcome = self.handshake().await;
        self.sessions.record(slot, &outcome);
        outcome
    }

    async fn handshake(&self) -> Result<Session> {
        let app_token = self
            .app()
            .app_token()
            .ok_or_else(|| FbxError::Auth("no app token configured".into()))?;

        log::debug!("handshake: fetching device info");
        let info = self.device_info().await?;

        log::debug!("handshake: requesting challenge");
        let login: LoginChallenge = self
            .query(&LOGIN)
            .dispatch(None)
            .await
            .and_then(|envelope| envelope.into_result())
            .map_err(auth_failure)?;

        let password = compute_password(app_token, &login.challenge)?;
        let request = SessionRequest {
            app_id: self.app().id.clone(),
            password,
        };

        log::debug!("handshake: opening session");
        let grant: SessionGrant = self
            .query(&LOGIN_SESSION)
            .json(&request)
            .dispatch(None)
            .await
            .and_then(|envelope| envelope.into_result())
            .map_err(auth_failure)?;

        log::info!(
            "session opened on {} ({} permissions)",
            info.device_name,
            grant.permissions.len()
        );
        Ok(Session {
            token: grant.session_token,
            challenge: if grant.challenge.is_empty() {
                login.challenge
            } else {
                grant.challenge
            },
            permissions: grant.permissions,
            api_version: self.api_version(),
            opened_at: SystemTime::now(),
        })
    }

    /// Close the current session and open a new one.
    pub async fn open_session(&self) -> Result<Session> {
        let mut state = self.sessions.lock().await;
        if let Some(previous) = state.session.take() {
            self.close(previous).await?;
        }
        self.establish(&mut state).await
    }

    /// Release the session token. Does nothing when none is held.
    ///
    /// The token is forgotten even if the device reports a failure.
    pub async fn logout(&self) -> Result<()> {
        let mut state = self.sessions.lock().await;
        match state.session.take() {
            Some(session) => self.close(session).await,
            None => Ok(()),
        }
    }

    async fn close(&self, session: Session) -> Result<()> {
        log::info!("closing session");
        self.query(&LOGOUT)
            .dispatch(Some(session.token))
            .await
            .map(|_| ())
    }

    pub async fn session(&self) -> Option<Session> {
        self.sessions.snapshot().await
    }

    pub(crate) async fn invalidate_session(&self, token: &str) {
        if self.sessions.clear_if(token).await {
            log::info!("session rejected by device, cleared");
        }
    }
}

fn auth_failure(err: FbxError) -> FbxError {
    match err {
        FbxError::Api { code, msg } => {
            FbxError::Auth(format!("[{}] {}", code, msg))
        }
        other => other,
    }
}
