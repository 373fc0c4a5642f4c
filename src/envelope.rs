use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{FbxError, Result};

/// Wrapper the device puts around every REST response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub error_code: String,
    /// Only meaningful when `success` is true.
    #[serde(default)]
    pub result: Option<Value>,
}

impl Envelope {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| {
            FbxError::Decode(format!("malformed envelope: {}", e))
        })
    }

    /// Fail with an API error when the device reported one.
    ///
    /// Any `result` sent along with a failure is dropped here, it is never
    /// looked at.
    pub fn check(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(FbxError::api(self.error_code, self.msg))
        }
    }

    /// Decode `result` into the expected shape.
    ///
    /// A missing or `null` result decodes as JSON `null`, so `()` and
    /// `Option<T>` targets accept it.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        let envelope = self.check()?;
        let result = envelope.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| {
            FbxError::Decode(format!("unexpected result shape: {}", e))
        })
    }
}
