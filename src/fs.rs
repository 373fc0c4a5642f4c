use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::endpoint::Endpoint;
use crate::upload::{
    Conflict, UploadCoordinator, UploadJob, UploadRequest, UploadSource,
};
use crate::Result;

pub const TASKS: Endpoint = Endpoint::get("fs/tasks/");
pub const LS: Endpoint = Endpoint::get("fs/ls/{path}");
pub const INFO: Endpoint = Endpoint::get("fs/info/{path}");
pub const DOWNLOAD: Endpoint = Endpoint::get("dl/{path}");
pub const UPLOAD: Endpoint = Endpoint::get("ws/upload");
pub const SHARE_LINK: Endpoint = Endpoint::post("share_link/").with_body();

/// Paths travel base64 encoded, always rooted at `/`.
pub fn encode_path(path: &str) -> String {
    if path.starts_with('/') {
        STANDARD.encode(path)
    } else {
        STANDARD.encode(format!("/{}", path))
    }
}

pub fn decode_path(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FileInfo {
    /// Encoded path, see [`encode_path`].
    pub path: String,
    pub name: String,
    pub mimetype: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
    pub modification: i64,
    pub index: i64,
    pub link: bool,
    pub target: String,
    pub hidden: bool,
    pub foldercount: u64,
    pub filecount: u64,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == "dir"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FsTask {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub state: String,
    pub error: String,
    pub created_ts: i64,
    pub started_ts: i64,
    pub done_ts: i64,
    pub duration: i64,
    pub progress: i64,
    pub eta: i64,
    pub from: String,
    pub to: String,
    pub nfiles: u64,
    pub nfiles_done: u64,
    pub total_bytes: u64,
    pub total_bytes_done: u64,
    pub curr_bytes: u64,
    pub curr_bytes_done: u64,
    pub rate: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShareLink {
    pub token: String,
    pub path: String,
    pub name: String,
    pub expire: i64,
    pub fullurl: String,
}

#[derive(Serialize)]
struct ShareLinkRequest {
    path: String,
    expire: i64,
}

impl Client {
    /// Directory listing of `path`.
    pub async fn ls(
        &self,
        path: &str,
        only_folder: bool,
        count_sub_folder: bool,
        remove_hidden: bool,
    ) -> Result<Vec<FileInfo>> {
        let entries: Option<Vec<FileInfo>> = self
            .query(&LS)
            .param("path", encode_path(path))
            .query_param("onlyFolder", only_folder)
            .query_param("countSubFolder", count_sub_folder)
            .query_param("removeHidden", remove_hidden)
            .send()
            .await?;
        Ok(entries.unwrap_or_default())
    }

    pub async fn file_info(&self, path: &str) -> Result<FileInfo> {
        self.query(&INFO)
            .param("path", encode_path(path))
            .send()
            .await
    }

    /// Stream the content of a file. The body is left unread.
    pub async fn download(&self, path: &str) -> Result<reqwest::Response> {
        self.query(&DOWNLOAD)
            .param("path", encode_path(path))
            .download()
            .await
    }

    pub async fn fs_tasks(&self) -> Result<Vec<FsTask>> {
        let tasks: Option<Vec<FsTask>> = self.query(&TASKS).send().await?;
        Ok(tasks.unwrap_or_default())
    }

    /// Public link to `path`. An `expire` of 0 never expires.
    pub async fn share_link(
        &self,
        path: &str,
        expire: i64,
    ) -> Result<ShareLink> {
        let request = ShareLinkRequest {
            path: encode_path(path),
            expire,
        };
        self.query(&SHARE_LINK).json(&request).send().await
    }

    /// Upload `source` into the `destination` directory with the client's
    /// upload settings.
    pub async fn upload(
        &self,
        source: UploadSource,
        destination: &str,
        conflict: Conflict,
    ) -> Result<UploadJob> {
        let coordinator = UploadCoordinator::new(self.config().upload.clone());
        self.upload_with(&coordinator, source, destination, conflict)
            .await
    }

    /// Upload through a caller owned coordinator, which gives access to
    /// cancellation and progress.
    pub async fn upload_with(
        &self,
        coordinator: &UploadCoordinator,
        source: UploadSource,
        destination: &str,
        conflict: Conflict,
    ) -> Result<UploadJob> {
        let channel = self.open_channel(&UPLOAD).await?;
        let request = UploadRequest {
            request_id: self.next_request_id(),
            source,
            destination: destination.to_owned(),
            conflict,
        };
        coordinator.run(channel, request).await
    }
}
