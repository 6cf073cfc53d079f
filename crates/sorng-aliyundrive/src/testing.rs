//! In-memory transport and fixtures shared by the unit tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::client::DriveClient;
use crate::config::DriveConfig;
use crate::credential::Credential;
use crate::error::DriveResult;
use crate::transport::{ApiRequest, PartStream, RawResponse, Transport};
use crate::types::TokenResponse;

type Handler = Box<dyn Fn(&ApiRequest) -> DriveResult<RawResponse> + Send + Sync>;

/// Answers every API call through `handler` and records what it saw.
pub struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<ApiRequest>>,
    parts: Mutex<Vec<(String, Vec<u8>)>>,
    fetches: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    fetch_body: Mutex<Vec<u8>>,
}

impl MockTransport {
    pub fn new(
        handler: impl Fn(&ApiRequest) -> DriveResult<RawResponse> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            parts: Mutex::new(Vec::new()),
            fetches: Mutex::new(Vec::new()),
            fetch_body: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Completed part uploads as `(url, body)`.
    pub fn parts(&self) -> Vec<(String, Vec<u8>)> {
        self.parts.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn set_fetch_body(&self, body: Vec<u8>) {
        *self.fetch_body.lock().unwrap() = body;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> DriveResult<RawResponse> {
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }

    async fn put_part(&self, url: &str, content_length: u64, mut body: PartStream) -> DriveResult<()> {
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        assert_eq!(buf.len() as u64, content_length, "part length mismatch");
        self.parts.lock().unwrap().push((url.to_string(), buf));
        Ok(())
    }

    async fn fetch(&self, url: &str, headers: &BTreeMap<String, String>) -> DriveResult<Vec<u8>> {
        self.fetches
            .lock()
            .unwrap()
            .push((url.to_string(), headers.clone()));
        Ok(self.fetch_body.lock().unwrap().clone())
    }
}

// ── Fixtures ─────────────────────────────────────────────────────

pub fn token_json(user_id: &str, access_token: &str, refresh_token: &str) -> Value {
    json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "expires_in": 7200,
        "token_type": "Bearer",
        "user_id": user_id,
        "user_name": "alice",
        "nick_name": "Alice",
        "default_drive_id": "drive-1"
    })
}

/// `createWithFolders` answer with `parts` upload URLs `https://upload.test/{n}`.
pub fn create_response(file_id: &str, upload_id: &str, parts: usize, rapid: bool) -> Value {
    let list: Vec<Value> = (1..=parts)
        .map(|n| json!({"part_number": n, "upload_url": format!("https://upload.test/{n}")}))
        .collect();
    json!({
        "file_id": file_id,
        "upload_id": upload_id,
        "rapid_upload": rapid,
        "type": "file",
        "part_info_list": list
    })
}

pub async fn test_client(mock: &Arc<MockTransport>) -> DriveClient {
    test_client_with(mock, DriveConfig::default()).await
}

pub async fn test_client_with(mock: &Arc<MockTransport>, config: DriveConfig) -> DriveClient {
    let transport: Arc<dyn Transport> = mock.clone();
    DriveClient::with_transport(config, transport).await.unwrap()
}

/// A registered credential holding `access_token`, without touching the transport.
pub async fn logged_in_with_token(client: &DriveClient, access_token: &str) -> Arc<Credential> {
    let credential = Arc::new(Credential::new("rt"));
    let token: TokenResponse =
        serde_json::from_value(token_json("u-test", access_token, "rt")).unwrap();
    credential.apply_refresh(&token).await;
    client.store().insert("u-test", Arc::clone(&credential)).await;
    credential
}

pub async fn logged_in(client: &DriveClient) -> Arc<Credential> {
    logged_in_with_token(client, "at-test").await
}
