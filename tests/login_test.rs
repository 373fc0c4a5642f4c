mod common;

use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use common::{ok, MockDevice, APP_ID};
use fbx_api::login::AuthorizationStatus;
use fbx_api::FbxError;

#[tokio::test]
async fn registers_app() -> Result<()> {
    let device = MockDevice::start().await?;
    device.route(
        "/api/v4/login/authorize/",
        ok(json!({"app_token": "fresh-token", "track_id": 42})),
    );
    let client = device.client();

    let authorization = client.authorize("Living room laptop").await?;
    assert_eq!(authorization.app_token, "fresh-token");
    assert_eq!(authorization.track_id, 42);
    assert!(!format!("{:?}", authorization).contains("fresh-token"));

    let request = &device.requests_to("/api/v4/login/authorize/")[0];
    assert_eq!(request.method, "POST");
    assert!(!request.headers.contains_key("x-fbx-app-auth"));
    assert_eq!(
        request.json(),
        json!({
            "app_id": APP_ID,
            "app_name": "Test",
            "app_version": "1.0",
            "device_name": "Living room laptop"
        })
    );
    assert_eq!(device.sessions_opened(), 0);
    Ok(())
}

#[tokio::test]
async fn waits_until_granted() -> Result<()> {
    let device = MockDevice::start().await?;
    device.route(
        "/api/v4/login/authorize/42",
        ok(json!({"status": "granted", "challenge": "c"})),
    );
    let client = device.client();

    let poll = Duration::from_millis(10);
    let status = client
        .wait_for_authorization(42, poll, Duration::from_secs(1))
        .await?;
    assert_eq!(status, AuthorizationStatus::Granted);
    assert_eq!(device.requests_to("/api/v4/login/authorize/42").len(), 1);
    Ok(())
}

#[tokio::test]
async fn pending_request_times_out() -> Result<()> {
    let device = MockDevice::start().await?;
    device.route(
        "/api/v4/login/authorize/7",
        ok(json!({"status": "pending", "challenge": "c"})),
    );
    let client = device.client();

    let poll = Duration::from_millis(20);
    let err = client
        .wait_for_authorization(7, poll, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, FbxError::Timeout(_)), "{:?}", err);
    assert!(device.requests_to("/api/v4/login/authorize/7").len() >= 2);
    Ok(())
}

#[tokio::test]
async fn denial_is_reported() -> Result<()> {
    let device = MockDevice::start().await?;
    device.route(
        "/api/v4/login/authorize/9",
        ok(json!({"status": "denied", "challenge": ""})),
    );
    let client = device.client();

    let state = client.track_authorization(9).await?;
    assert_eq!(state.status, AuthorizationStatus::Denied);
    Ok(())
}
