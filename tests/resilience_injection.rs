//! Failure injection tests: circuit breaking, timeouts, unreachable upstreams.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

mod common;

#[tokio::test]
async fn scenario_breaker_opens_then_probes_after_recovery() {
    let users = common::start_json_backend(|_m, _p| async move {
        (200, json!({ "success": true, "data": {} }).to_string())
    })
    .await;

    let healthy = Arc::new(AtomicBool::new(false));
    let hits = Arc::new(AtomicU32::new(0));
    let (h, c) = (healthy.clone(), hits.clone());
    let orders = common::start_json_backend(move |_m, _p| {
        let (h, c) = (h.clone(), c.clone());
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            if h.load(Ordering::SeqCst) {
                (200, json!({ "success": true, "data": [] }).to_string())
            } else {
                (
                    500,
                    json!({ "success": false, "error": { "code": "DB_DOWN", "message": "boom" } })
                        .to_string(),
                )
            }
        }
    })
    .await;

    let mut config = common::gateway_config(users, orders);
    for service in &mut config.services {
        if service.name == "orders" {
            service.failure_threshold = 5;
            service.recovery_timeout_secs = 1;
        }
    }
    let (gateway, _shutdown) = common::start_gateway(config).await;
    let client = common::test_client();
    let token = common::mint_token("u-1", "ada@example.com", &["user"], 3600);

    // Five consecutive 5xx responses pass through and trip the breaker.
    for _ in 0..5 {
        let res = client
            .get(format!("http://{gateway}/v1/orders"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 500);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 5);

    // Sixth request short-circuits without contacting the service.
    let res = client
        .get(format!("http://{gateway}/v1/orders"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CIRCUIT_OPEN");
    assert_eq!(hits.load(Ordering::SeqCst), 5, "open breaker must fail fast");

    let health: Value = client
        .get(format!("http://{gateway}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let orders_circuit = health["data"]["circuits"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["service"] == "orders")
        .unwrap()
        .clone();
    assert_eq!(orders_circuit["state"], "open");
    assert!(orders_circuit["retry_in_secs"].as_u64().unwrap() <= 1);

    // After the recovery timeout one probe goes through and closes the
    // breaker again.
    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let res = client
        .get(format!("http://{gateway}/v1/orders"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(hits.load(Ordering::SeqCst), 6);

    let health: Value = client
        .get(format!("http://{gateway}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let orders_circuit = health["data"]["circuits"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["service"] == "orders")
        .unwrap()
        .clone();
    assert_eq!(orders_circuit["state"], "closed");
}

#[tokio::test]
async fn breaker_recovers_when_probe_caller_disconnects() {
    let users = common::start_json_backend(|_m, _p| async move {
        (200, json!({ "success": true, "data": {} }).to_string())
    })
    .await;

    // First hit fails and trips the breaker; afterwards the service is
    // healthy but slow enough for an impatient client to hang up on.
    let hits = Arc::new(AtomicU32::new(0));
    let c = hits.clone();
    let orders = common::start_json_backend(move |_m, _p| {
        let c = c.clone();
        async move {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                (500, json!({ "success": false, "error": { "code": "X", "message": "boom" } }).to_string())
            } else {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                (200, json!({ "success": true, "data": [] }).to_string())
            }
        }
    })
    .await;

    let mut config = common::gateway_config(users, orders);
    for service in &mut config.services {
        if service.name == "orders" {
            service.failure_threshold = 1;
            service.recovery_timeout_secs = 1;
        }
    }
    let (gateway, _shutdown) = common::start_gateway(config).await;
    let client = common::test_client();
    let token = common::mint_token("u-1", "ada@example.com", &["user"], 3600);

    let res = client
        .get(format!("http://{gateway}/v1/orders"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);

    // An impatient client wins the probe and hangs up mid-dispatch, so
    // the outcome is never reported back to the breaker.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let impatient = reqwest::Client::builder()
        .timeout(Duration::from_millis(300))
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();
    let aborted = impatient
        .get(format!("http://{gateway}/v1/orders"))
        .bearer_auth(&token)
        .send()
        .await;
    assert!(aborted.is_err(), "impatient client must give up mid-probe");

    // One recovery window after the abandoned grant the next caller takes
    // the probe over and closes the breaker.
    tokio::time::sleep(Duration::from_millis(1300)).await;
    let res = client
        .get(format!("http://{gateway}/v1/orders"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200, "breaker must recover after the lost probe");

    let health: Value = client
        .get(format!("http://{gateway}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let orders_circuit = health["data"]["circuits"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["service"] == "orders")
        .unwrap()
        .clone();
    assert_eq!(orders_circuit["state"], "closed");
}

#[tokio::test]
async fn open_circuit_rejects_concurrent_callers() {
    let users = common::start_json_backend(|_m, _p| async move {
        (200, json!({ "success": true, "data": {} }).to_string())
    })
    .await;
    let hits = Arc::new(AtomicU32::new(0));
    let c = hits.clone();
    let orders = common::start_json_backend(move |_m, _p| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            (500, json!({ "success": false, "error": { "code": "X", "message": "boom" } }).to_string())
        }
    })
    .await;

    let mut config = common::gateway_config(users, orders);
    for service in &mut config.services {
        if service.name == "orders" {
            service.failure_threshold = 1;
            service.recovery_timeout_secs = 60;
        }
    }
    let (gateway, _shutdown) = common::start_gateway(config).await;
    let client = common::test_client();
    let token = common::mint_token("u-1", "ada@example.com", &["user"], 3600);

    // Trip the breaker.
    let res = client
        .get(format!("http://{gateway}/v1/orders"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            client
                .get(format!("http://{gateway}/v1/orders"))
                .bearer_auth(&token)
                .send()
                .await
                .unwrap()
                .status()
                .as_u16()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 503);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1, "no caller may pass while open");
}

#[tokio::test]
async fn slow_upstream_times_out_as_504() {
    let users = common::start_json_backend(|_m, _p| async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        (200, json!({ "success": true, "data": {} }).to_string())
    })
    .await;
    let orders = common::start_json_backend(|_m, _p| async move {
        (200, json!({ "success": true, "data": [] }).to_string())
    })
    .await;

    let mut config = common::gateway_config(users, orders);
    for service in &mut config.services {
        if service.name == "users" {
            service.timeout_secs = 1;
        }
    }
    let (gateway, _shutdown) = common::start_gateway(config).await;
    let client = common::test_client();
    let token = common::mint_token("u-1", "ada@example.com", &["user"], 3600);

    let res = client
        .get(format!("http://{gateway}/v1/users/profile"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 504);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UPSTREAM_TIMEOUT");

    // The timeout counted against the breaker.
    let health: Value = client
        .get(format!("http://{gateway}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let users_circuit = health["data"]["circuits"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["service"] == "users")
        .unwrap()
        .clone();
    assert_eq!(users_circuit["consecutive_failures"], 1);
}

#[tokio::test]
async fn unreachable_upstream_maps_to_503() {
    let users = common::start_json_backend(|_m, _p| async move {
        (200, json!({ "success": true, "data": {} }).to_string())
    })
    .await;
    // Bind-then-drop reserves an address nothing listens on.
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let (gateway, _shutdown) =
        common::start_gateway(common::gateway_config(users, dead)).await;
    let client = common::test_client();
    let token = common::mint_token("u-1", "ada@example.com", &["user"], 3600);

    let res = client
        .get(format!("http://{gateway}/v1/orders"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UPSTREAM_UNREACHABLE");
}

#[tokio::test]
async fn downstream_4xx_never_trips_the_breaker() {
    let users = common::start_json_backend(|_m, _p| async move {
        (200, json!({ "success": true, "data": {} }).to_string())
    })
    .await;
    let orders = common::start_json_backend(|_m, _p| async move {
        (
            404,
            json!({ "success": false, "error": { "code": "NOT_FOUND", "message": "no such order" } })
                .to_string(),
        )
    })
    .await;

    let mut config = common::gateway_config(users, orders);
    for service in &mut config.services {
        if service.name == "orders" {
            service.failure_threshold = 2;
        }
    }
    let (gateway, _shutdown) = common::start_gateway(config).await;
    let client = common::test_client();
    let token = common::mint_token("u-1", "ada@example.com", &["user"], 3600);

    for _ in 0..5 {
        let res = client
            .get(format!("http://{gateway}/v1/orders/42"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 404, "client errors pass through");
    }

    let health: Value = client
        .get(format!("http://{gateway}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let orders_circuit = health["data"]["circuits"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["service"] == "orders")
        .unwrap()
        .clone();
    assert_eq!(orders_circuit["state"], "closed");
    assert_eq!(orders_circuit["consecutive_failures"], 0);
}
