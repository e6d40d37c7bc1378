//! HTTP surface: login, snapshots, admin and the legacy TCP registry.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::net::TcpStream;

mod common;
use common::*;

#[tokio::test]
async fn login_assigns_defaults_and_refuses_unknown_agent() {
    let hub = start_hub(test_config()).await;
    let base = http_base(hub.http_addr);

    let res = client()
        .post(format!("{base}/visitor_login"))
        .header("User-Agent", "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)")
        .form(&[("to_id", "kefu1"), ("refer", "https://shop.example")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    let result = &body["result"];
    assert_eq!(result["name"], "Guest");
    assert_eq!(result["avatar"], "/static/images/1.png");
    assert_eq!(result["agent_id"], "kefu1");
    assert!(uuid::Uuid::parse_str(result["visitor_id"].as_str().unwrap()).is_ok());

    let extra = STANDARD.encode(r#"{"visitorName":"Alice","visitorAvatar":"/alice.png"}"#);
    let res = client()
        .post(format!("{base}/visitor_login"))
        .form(&[("to_id", "kefu1"), ("visitor_id", "v9"), ("extra", extra.as_str())])
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["result"]["name"], "Alice");
    assert_eq!(body["result"]["avatar"], "/alice.png");

    let res = client()
        .post(format!("{base}/visitor_login"))
        .form(&[("to_id", "nobody")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], 400);

    hub.stop().await;
}

#[tokio::test]
async fn visitor_record_needs_agent_token() {
    let hub = start_hub(test_config()).await;
    let addr = hub.http_addr;
    login(addr, "kefu1", "v1").await;

    let url = format!("{}/visitor?visitorId=v1", http_base(addr));
    let (status, _) = get_json(url.clone(), None).await;
    assert_eq!(status, 401);

    let (status, body) = get_json(url, Some(KEFU2_TOKEN)).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["visitor_id"], "v1");

    let (status, _) = get_json(format!("{}/visitor?visitorId=zzz", http_base(addr)), Some(KEFU1_TOKEN)).await;
    assert_eq!(status, 404);
    hub.stop().await;
}

#[tokio::test]
async fn online_snapshots_filter_by_agent() {
    let hub = start_hub(test_config()).await;
    let addr = hub.http_addr;

    let a = login(addr, "kefu1", "a").await;
    let b = login(addr, "kefu2", "b").await;
    let _va = connect_visitor(addr, &a).await;
    let _vb = connect_visitor(addr, &b).await;

    let all_url = format!("{}/visitors_online", http_base(addr));
    eventually(|| {
        let url = all_url.clone();
        async move {
            let (_, body) = get_json(url, None).await;
            body["result"]["ws"].as_array().map(|v| v.len()) == Some(2)
        }
    })
    .await;

    let (_, body) = get_json(all_url, None).await;
    let uids: Vec<&str> = body["result"]["ws"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["uid"].as_str().unwrap())
        .collect();
    assert_eq!(uids, vec!["a", "b"]);
    assert_eq!(body["result"]["ws"][0]["last_message"], "");
    assert_eq!(body["result"]["tcp"], json!([]));

    let (status, body) = get_json(format!("{}/visitors_kefu_online", http_base(addr)), Some(KEFU2_TOKEN)).await;
    assert_eq!(status, 200);
    assert_eq!(
        body["result"],
        json!([{"uid": "b", "name": "Guest", "avatar": "/static/images/2.png", "last_message": "new visitor"}])
    );

    let (status, _) = get_json(format!("{}/visitors_kefu_online", http_base(addr)), None).await;
    assert_eq!(status, 401);
    hub.stop().await;
}

#[tokio::test]
async fn notice_returns_agent_greeting() {
    let hub = start_hub(test_config()).await;
    let (status, body) = get_json(format!("{}/notice?kefu_id=kefu1", http_base(hub.http_addr)), None).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["nickname"], "kefu1 nick");
    assert_eq!(body["result"]["welcome"], "Hi there");
    hub.stop().await;
}

#[tokio::test]
async fn admin_requires_key_and_edits_blacklist() {
    let hub = start_hub(test_config()).await;
    let base = http_base(hub.http_addr);

    let (status, _) = get_json(format!("{base}/admin/status"), None).await;
    assert_eq!(status, 401);
    let (status, body) = get_json(format!("{base}/admin/status"), Some(ADMIN_KEY)).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "operational");

    let res = client()
        .post(format!("{base}/admin/blacklist"))
        .bearer_auth(ADMIN_KEY)
        .json(&json!({"ip": "127.0.0.1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = client()
        .post(format!("{base}/visitor_login"))
        .form(&[("to_id", "kefu1")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);

    let res = client()
        .delete(format!("{base}/admin/blacklist/127.0.0.1"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["changed"], true);

    login(hub.http_addr, "kefu1", "v1").await;
    hub.stop().await;
}

#[tokio::test]
async fn legacy_tcp_clients_listed_and_cleared() {
    let mut config = test_config();
    config.legacy_tcp.enabled = true;
    config.legacy_tcp.bind_address = "127.0.0.1:0".into();
    let hub = start_hub(config).await;
    let base = http_base(hub.http_addr);
    let legacy = hub.legacy_addr.unwrap();

    let _raw = TcpStream::connect(legacy).await.unwrap();
    let url = format!("{base}/visitors_online");
    eventually(|| {
        let url = url.clone();
        async move {
            let (_, body) = get_json(url, None).await;
            body["result"]["tcp"].as_array().map(|t| t.len()) == Some(1)
        }
    })
    .await;

    let (status, body) = get_json(format!("{base}/clear_online_tcp"), None).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["cleared"], 1);
    let (_, body) = get_json(format!("{base}/admin/tcp"), Some(ADMIN_KEY)).await;
    assert_eq!(body, json!([]));

    hub.stop().await;
}

#[tokio::test]
async fn rate_limit_refuses_burst_overflow() {
    let mut config = test_config();
    config.rate_limit.enabled = true;
    config.rate_limit.requests_per_second = 1;
    config.rate_limit.burst_size = 2;
    let hub = start_hub(config).await;
    let base = http_base(hub.http_addr);

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let res = client()
            .post(format!("{base}/visitor_login"))
            .form(&[("to_id", "kefu1")])
            .send()
            .await
            .unwrap();
        statuses.push(res.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429]);

    // Public snapshots sit outside the visitor bucket.
    let (status, _) = get_json(format!("{base}/visitors_online"), None).await;
    assert_eq!(status, 200);
    hub.stop().await;
}

#[tokio::test]
async fn oversized_body_is_refused() {
    let mut config = test_config();
    config.security.max_body_size = 1024;
    let hub = start_hub(config).await;
    let base = http_base(hub.http_addr);

    let refer = "x".repeat(4096);
    let res = client()
        .post(format!("{base}/visitor_login"))
        .form(&[("to_id", "kefu1"), ("refer", refer.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);
    assert!(res.headers().contains_key("x-request-id"));

    login(hub.http_addr, "kefu1", "v1").await;
    hub.stop().await;
}
