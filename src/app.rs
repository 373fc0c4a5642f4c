use std::fmt;

use crate::login::TokenRequest;

/// The application talking to the device, as approved by its owner.
#[derive(Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Long lived secret obtained through registration.
    pub token: Option<String>,
}

impl AppIdentity {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub(crate) fn app_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|token| !token.is_empty())
    }

    /// Registration request announcing this app from `device_name`.
    pub fn token_request(
        &self,
        device_name: impl Into<String>,
    ) -> TokenRequest {
        TokenRequest {
            app_id: self.id.clone(),
            app_name: self.name.clone(),
            app_version: self.version.clone(),
            device_name: device_name.into(),
        }
    }
}

impl fmt::Debug for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppIdentity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_token() {
        let app = AppIdentity::new("fr.example.app", "Example", "1.0")
            .with_token("very-secret");
        let printed = format!("{:?}", app);
        assert!(!printed.contains("very-secret"));
        assert!(printed.contains("fr.example.app"));
    }

    #[test]
    fn empty_token_counts_as_missing() {
        let app = AppIdentity::new("id", "name", "1").with_token("");
        assert!(app.app_token().is_none());
    }
}
