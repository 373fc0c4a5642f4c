#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::Message;

use fbx_api::{AppIdentity, Client, ClientConfig, UploadConfig};

pub const APP_ID: &str = "fr.example.test";
pub const APP_TOKEN: &str = "app-token";
pub const CHALLENGE: &str = "chal-1";
/// hex(HMAC-SHA1("app-token", "chal-1"))
pub const PASSWORD: &str = "7d837cc9750485a9f1ee01af93ec637dc31fc204";

/// Successful envelope around `result`.
pub fn ok(result: Value) -> Value {
    json!({"success": true, "result": result})
}

/// Failed envelope.
pub fn refused(code: &str, msg: &str) -> Value {
    json!({"success": false, "error_code": code, "msg": msg})
}

static INIT: Once = Once::new();

pub fn initialize() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    /// Path and query, as sent on the request line.
    pub target: String,
    /// Lowercased names.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Recorded {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// How the upload peer answers.
#[derive(Debug, Clone, Default)]
pub struct UploadScript {
    pub fail_start: bool,
    /// `upload_start` is never answered.
    pub mute_start: bool,
    /// 1-based index of the data frame whose acknowledgement fails.
    pub fail_data_ack: Option<usize>,
    pub fail_finalize: bool,
    /// Data frames left unacknowledged.
    pub silent: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UploadLog {
    pub path: String,
    pub auth: Option<String>,
    pub start: Option<Value>,
    pub chunks: Vec<usize>,
    pub finalized: bool,
    pub cancelled: bool,
}

#[derive(Default)]
struct State {
    routes: HashMap<String, (u16, Value)>,
    requests: Vec<Recorded>,
    sessions_opened: usize,
    script: UploadScript,
    upload: UploadLog,
}

/// In-process stand-in for the box.
pub struct MockDevice {
    pub addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl MockDevice {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(State::default()));

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, state).await {
                        log::debug!("mock device connection ended: {:#}", e);
                    }
                });
            }
        });

        let device = Self { addr, state };
        device.route(
            "/api/v4/login/",
            json!({
                "success": true,
                "result": {
                    "logged_in": false,
                    "challenge": CHALLENGE,
                    "password_salt": "salt"
                }
            }),
        );
        device.route("/api/v4/login/logout/", json!({"success": true}));
        Ok(device)
    }

    pub fn client(&self) -> Client {
        self.client_with(UploadConfig::default())
    }

    pub fn client_with(&self, upload: UploadConfig) -> Client {
        let config = ClientConfig::plain("127.0.0.1", self.addr.port())
            .with_upload(upload)
            .with_request_timeout(Duration::from_secs(10));
        let app = AppIdentity::new(APP_ID, "Test", "1.0").with_token(APP_TOKEN);
        Client::new(config, app).expect("client")
    }

    /// Answer `path` with a 200 and `body`.
    pub fn route(&self, path: &str, body: Value) {
        self.route_status(path, 200, body);
    }

    pub fn route_status(&self, path: &str, status: u16, body: Value) {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(path.to_owned(), (status, body));
    }

    pub fn script(&self, script: UploadScript) {
        self.state.lock().unwrap().script = script;
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|request| request.path() == path)
            .collect()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.lock().unwrap().sessions_opened
    }

    pub fn upload_log(&self) -> UploadLog {
        self.state.lock().unwrap().upload.clone()
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<State>>) -> Result<()> {
    if is_websocket(&stream).await? {
        serve_upload(stream, state).await
    } else {
        serve_http(stream, state).await
    }
}

async fn is_websocket(stream: &TcpStream) -> Result<bool> {
    let mut buffer = [0u8; 4096];
    loop {
        let peeked = stream.peek(&mut buffer).await?;
        if peeked == 0 {
            return Ok(false);
        }
        let head =
            String::from_utf8_lossy(&buffer[..peeked]).to_ascii_lowercase();
        if head.contains("\r\n\r\n") || peeked == buffer.len() {
            return Ok(head.contains("upgrade: websocket"));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn serve_http(stream: TcpStream, state: Arc<Mutex<State>>) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let mut parts = line.split_whitespace();
    let method = parts.next().context("no method")?.to_owned();
    let target = parts.next().context("no target")?.to_owned();

    let mut headers = HashMap::new();
    loop {
        line.clear();
        reader.read_line(&mut line).await?;
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.insert(
                name.trim().to_ascii_lowercase(),
                value.trim().to_owned(),
            );
        }
    }
    let length: usize = headers
        .get("content-length")
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    let request = Recorded {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    let (status, reply) = respond(&state, request);

    let payload = reply.to_string();
    let mut stream = reader.into_inner();
    let response = format!(
        "HTTP/1.1 {} Mock\r\ncontent-type: application/json\r\n\
         content-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        payload.len(),
        payload
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

fn respond(state: &Mutex<State>, request: Recorded) -> (u16, Value) {
    let mut state = state.lock().unwrap();
    let path = request.path().to_owned();
    let body = request.json();
    state.requests.push(request);

    if let Some(reply) = state.routes.get(&path) {
        return reply.clone();
    }
    match path.as_str() {
        "/api_version" => (
            200,
            json!({
                "uid": "23b86ec8091013d668829fe12791fdab",
                "device_name": "Freebox Server",
                "api_version": "4.0",
                "api_base_url": "/api/",
                "device_type": "FreeboxServer1,1",
                "https_available": false,
                "https_port": 0,
                "api_domain": ""
            }),
        ),
        "/api/v4/login/session/" => {
            if body["app_id"] != APP_ID || body["password"] != PASSWORD {
                return (
                    403,
                    json!({
                        "success": false,
                        "error_code": "invalid_token",
                        "msg": "bad password"
                    }),
                );
            }
            state.sessions_opened += 1;
            let token = format!("session-{}", state.sessions_opened);
            (
                200,
                json!({
                    "success": true,
                    "result": {
                        "session_token": token,
                        "challenge": "chal-2",
                        "permissions": {"settings": true, "explorer": true}
                    }
                }),
            )
        }
        _ => (
            404,
            json!({
                "success": false,
                "error_code": "invalid_request",
                "msg": "no route"
            }),
        ),
    }
}

fn reply(
    request_id: u64,
    action: &str,
    success: bool,
    result: Option<Value>,
) -> Message {
    let mut frame = json!({
        "request_id": request_id,
        "action": action,
        "success": success,
    });
    if let Some(result) = result {
        frame["result"] = result;
    }
    if !success {
        frame["error_code"] = json!("disk_full");
        frame["msg"] = json!(format!("{} refused", action));
    }
    Message::text(frame.to_string())
}

async fn serve_upload(
    stream: TcpStream,
    state: Arc<Mutex<State>>,
) -> Result<()> {
    let handshake = state.clone();
    let callback = move |request: &Request,
                         response: Response|
          -> std::result::Result<Response, ErrorResponse> {
        let mut state = handshake.lock().unwrap();
        state.upload.path = request.uri().path().to_owned();
        state.upload.auth = request
            .headers()
            .get("x-fbx-app-auth")
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        Ok(response)
    };
    let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let script = state.lock().unwrap().script.clone();

    let mut received = 0u64;
    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => {
                let frame: Value = serde_json::from_str(text.as_str())?;
                let request_id =
                    frame["request_id"].as_u64().unwrap_or_default();
                match frame["action"].as_str() {
                    Some("upload_start") => {
                        let start = Some(frame.clone());
                        state.lock().unwrap().upload.start = start;
                        if script.mute_start {
                            continue;
                        }
                        // a reply meant for someone else comes first
                        let foreign = request_id + 1000;
                        ws.send(reply(foreign, "upload_start", false, None))
                            .await?;
                        let accepted = !script.fail_start;
                        let answer =
                            reply(request_id, "upload_start", accepted, None);
                        ws.send(answer).await?;
                    }
                    Some("upload_finalize") => {
                        state.lock().unwrap().upload.finalized = true;
                        ws.send(reply(
                            request_id,
                            "upload_finalize",
                            !script.fail_finalize,
                            None,
                        ))
                        .await?;
                    }
                    Some("upload_cancel") => {
                        state.lock().unwrap().upload.cancelled = true;
                    }
                    _ => {}
                }
            }
            Message::Binary(bytes) => {
                received += bytes.len() as u64;
                let index = {
                    let mut state = state.lock().unwrap();
                    state.upload.chunks.push(bytes.len());
                    state.upload.chunks.len()
                };
                if script.silent {
                    continue;
                }
                let request_id = state
                    .lock()
                    .unwrap()
                    .upload
                    .start
                    .as_ref()
                    .and_then(|start| start["request_id"].as_u64())
                    .unwrap_or_default();
                let success = script.fail_data_ack != Some(index);
                ws.send(reply(
                    request_id,
                    "upload_data",
                    success,
                    Some(json!({
                        "total_len": received,
                        "complete": false,
                        "cancelled": false
                    })),
                ))
                .await?;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}
