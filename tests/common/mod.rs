//! Shared utilities for integration tests: boot a hub on an ephemeral port
//! and drive it like a browser or agent console would.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use livechat_hub::config::{self, AgentConfig, HubConfig};
use livechat_hub::lifecycle::{self, RunningHub};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const ADMIN_KEY: &str = "test-admin-key";
pub const KEFU1_TOKEN: &str = "kefu1-token";
pub const KEFU2_TOKEN: &str = "kefu2-token";

fn agent(name: &str, token: &str) -> AgentConfig {
    AgentConfig {
        name: name.into(),
        token: token.into(),
        nickname: format!("{name} nick"),
        welcome: "Hi there".into(),
    }
}

/// Two agents, admin enabled, no rate limiting.
pub fn test_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.agents = vec![agent("kefu1", KEFU1_TOKEN), agent("kefu2", KEFU2_TOKEN)];
    config.rate_limit.enabled = false;
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();
    config.notification.enabled = false;
    config
}

pub async fn start_hub(config: HubConfig) -> RunningHub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    lifecycle::start(config::shared(config), listener).await.unwrap()
}

pub fn http_base(addr: SocketAddr) -> String {
    format!("http://{addr}")
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Log a visitor in and return the issued visitor id.
pub async fn login(addr: SocketAddr, agent: &str, visitor_id: &str) -> String {
    let res = client()
        .post(format!("{}/visitor_login", http_base(addr)))
        .header("User-Agent", "Mozilla/5.0 (X11; Linux x86_64)")
        .form(&[("to_id", agent), ("visitor_id", visitor_id), ("refer", "https://shop.example")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    body["result"]["visitor_id"].as_str().unwrap().to_string()
}

pub async fn connect_visitor(addr: SocketAddr, visitor_id: &str) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/ws_visitor?visitor_id={visitor_id}"))
        .await
        .unwrap();
    ws
}

pub async fn connect_agent(addr: SocketAddr, token: &str) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/ws_kefu?token={token}")).await.unwrap();
    ws
}

/// Status code of a refused upgrade.
pub async fn rejected_status(url: String) -> u16 {
    match connect_async(url).await {
        Err(WsError::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("expected HTTP rejection, got {other:?}"),
        Ok(_) => panic!("expected HTTP rejection, upgrade succeeded"),
    }
}

/// Next chat event on the socket, skipping control frames.
pub async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket ended")
            .expect("socket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(frame) => panic!("socket closed while waiting for event: {frame:?}"),
            _ => continue,
        }
    }
}

/// Wait for the close frame and return its code.
pub async fn next_close(ws: &mut Ws) -> u16 {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close");
        match frame {
            Some(Ok(Message::Close(Some(CloseFrame { code, .. })))) => return u16::from(code),
            Some(Ok(Message::Close(None))) | None | Some(Err(_)) => panic!("closed without close frame"),
            Some(Ok(_)) => continue,
        }
    }
}

/// Assert nothing but control frames arrives within `wait`.
pub async fn expect_silence(ws: &mut Ws, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected event: {}", text.as_str()),
            Ok(Some(Ok(Message::Close(frame)))) => panic!("unexpected close: {frame:?}"),
            Ok(_) => continue,
        }
    }
}

pub async fn send_frame(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

pub async fn send_message(ws: &mut Ws, to: Option<&str>, content: &str) {
    let payload = match to {
        Some(to) => json!({ "to": to, "content": content }),
        None => json!({ "content": content }),
    };
    send_frame(ws, json!({ "kind": "message", "payload": payload })).await;
}

/// GET a JSON endpoint and return the body.
pub async fn get_json(url: String, token: Option<&str>) -> (u16, Value) {
    let mut req = client().get(url);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let res = req.send().await.unwrap();
    let status = res.status().as_u16();
    let body = res.json().await.unwrap_or(Value::Null);
    (status, body)
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met within 5s");
}
