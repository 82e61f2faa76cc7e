#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use recetario_core::auth::credentials::{self, CredentialStore, MemoryStore, StoreKey};
use recetario_core::{ApiClient, Credential, Identity, Role, SessionConfig, SessionManager};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

/// Unsigned JWT for `label` expiring `secs` from now (negative = already expired).
pub fn make_token(label: &str, secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = Utc::now().timestamp() + secs;
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"id":"{}","iat":{},"exp":{}}}"#, label, exp - 3600, exp));
    format!("{}.{}.sig-{}", header, payload, label)
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub fn credential(token: &str) -> Credential {
    Credential {
        token: token.to_string(),
        user: Identity {
            id: Some("665f1a".to_string()),
            username: "chef".to_string(),
        },
        role: Role::Admin,
    }
}

pub fn manager(base_url: &str, config: SessionConfig) -> (SessionManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let api = ApiClient::new(base_url).expect("api client");
    let manager = SessionManager::new(api, store.clone(), config);
    (manager, store)
}

/// Manager whose store already holds a full session for `token`.
pub fn seeded(base_url: &str, token: &str) -> (SessionManager, Arc<MemoryStore>) {
    seeded_with(base_url, token, SessionConfig::default())
}

pub fn seeded_with(base_url: &str, token: &str, config: SessionConfig) -> (SessionManager, Arc<MemoryStore>) {
    let (manager, store) = manager(base_url, config);
    credentials::save_credential(store.as_ref(), &credential(token)).expect("seed store");
    (manager, store)
}

pub fn stored_token(store: &MemoryStore) -> Option<String> {
    store.get(StoreKey::Token).expect("read store")
}

pub fn store_is_empty(store: &MemoryStore) -> bool {
    StoreKey::ALL
        .iter()
        .all(|key| store.get(*key).expect("read store").is_none())
}

/// Base URL of a port nothing listens on: connections are refused.
pub fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    format!("http://127.0.0.1:{}/api", port)
}

/// A listener that accepts connections but never answers.
/// Keep the listener alive for as long as requests should hang.
pub fn blackhole() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    (listener, format!("http://127.0.0.1:{}/api", port))
}

pub fn api_url(server: &mockito::ServerGuard) -> String {
    format!("{}/api", server.url())
}

/// Refresh endpoint that holds requests carrying one token open until
/// `release` is notified, then answers 401. Any other token is exchanged
/// for `fresh`. Records the Authorization header of every request.
pub struct RefreshServer {
    pub url: String,
    pub release: Arc<Notify>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl RefreshServer {
    pub async fn start(held: &str, fresh: &str) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("http://{}/api", listener.local_addr().expect("addr"));
        let release = Arc::new(Notify::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (held, fresh) = (bearer(held), fresh.to_string());
        let (task_release, task_seen) = (release.clone(), seen.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (held, fresh) = (held.clone(), fresh.clone());
                let (release, seen) = (task_release.clone(), task_seen.clone());
                tokio::spawn(serve_refresh(stream, held, fresh, release, seen));
            }
        });
        Self { url, release, seen }
    }

    /// Authorization headers received so far, in arrival order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("seen").clone()
    }

    pub async fn wait_for_requests(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.seen().len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("requests did not arrive");
    }
}

async fn serve_refresh(
    mut stream: TcpStream,
    held: String,
    fresh: String,
    release: Arc<Notify>,
    seen: Arc<Mutex<Vec<String>>>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_len = loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_len]).to_string();
    let header = |name: &str| {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
    };
    let authorization = header("authorization").unwrap_or_default();
    let body_len: usize = header("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
    while buf.len() < head_len + body_len {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    seen.lock().expect("seen").push(authorization.clone());

    let (status, body) = if authorization == held {
        release.notified().await;
        ("401 Unauthorized", json!({ "message": "Invalid token" }))
    } else {
        ("200 OK", json!({ "token": fresh }))
    };
    let body = body.to_string();
    let response = format!(
        "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
