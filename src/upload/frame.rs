use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{FbxError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    UploadStart,
    UploadData,
    UploadFinalize,
    UploadCancel,
    #[serde(other)]
    Unknown,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::UploadStart => "upload_start",
            Action::UploadData => "upload_data",
            Action::UploadFinalize => "upload_finalize",
            Action::UploadCancel => "upload_cancel",
            Action::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the device does when the destination file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Conflict {
    /// The upload fails.
    Fail,
    #[default]
    Overwrite,
    /// Append to the existing file.
    Resume,
}

impl Conflict {
    pub fn as_force(&self) -> Option<&'static str> {
        match self {
            Conflict::Fail => None,
            Conflict::Overwrite => Some("overwrite"),
            Conflict::Resume => Some("resume"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct StartFrame {
    pub request_id: u64,
    pub action: Action,
    pub size: u64,
    /// Encoded destination directory.
    pub dirname: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct ControlFrame {
    pub request_id: u64,
    pub action: Action,
}

/// Reply from the device on the upload channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CorrelatedFrame {
    #[serde(default)]
    pub request_id: Option<u64>,
    pub action: Action,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub msg: String,
}

/// Progress reported by a data acknowledgement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChunkAck {
    /// Bytes received so far for the whole file.
    pub total_len: u64,
    pub complete: bool,
    pub cancelled: bool,
}

impl CorrelatedFrame {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| FbxError::Decode(format!("malformed frame: {}", e)))
    }

    /// Fail with the device's message unless the frame reports success.
    pub fn check(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            let code = if self.error_code.is_empty() {
                self.action.to_string()
            } else {
                self.error_code
            };
            Err(FbxError::upload(code, self.msg))
        }
    }

    pub fn chunk_ack(self) -> Result<ChunkAck> {
        let frame = self.check()?;
        let ack = match frame.result {
            Some(result) => serde_json::from_value::<ChunkAck>(result)?,
            None => ChunkAck::default(),
        };
        if ack.cancelled {
            return Err(FbxError::upload(
                "cancelled",
                "upload cancelled by device",
            ));
        }
        Ok(ack)
    }
}
