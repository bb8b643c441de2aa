//! Shared utilities for gateway integration testing.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use api_gateway::security::auth::Claims;
use api_gateway::{GatewayConfig, GatewayServer, Shutdown};

pub const TEST_SECRET: &str = "integration-test-secret";

/// Start a programmable mock backend. The handler receives (method, path)
/// and returns (status, JSON body). Returns the bound address.
pub async fn start_json_backend<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let Some((method, path)) = read_head(&mut socket).await else {
                            return;
                        };
                        let (status, body) = handler(method, path).await;
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_line(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Read the request head and extract the request line.
async fn read_head(socket: &mut TcpStream) -> Option<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() > 64 * 1024 {
            break;
        }
    }
    let head = String::from_utf8_lossy(&buf).into_owned();
    let mut parts = head.lines().next()?.split_whitespace();
    Some((parts.next()?.to_string(), parts.next()?.to_string()))
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        201 => "201 Created",
        400 => "400 Bad Request",
        404 => "404 Not Found",
        422 => "422 Unprocessable Entity",
        500 => "500 Internal Server Error",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Gateway config pointed at the given mock services.
#[allow(dead_code)]
pub fn gateway_config(users: SocketAddr, orders: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.jwt_secret = TEST_SECRET.to_string();
    for service in &mut config.services {
        match service.name.as_str() {
            "users" => service.base_url = format!("http://{users}"),
            "orders" => service.base_url = format!("http://{orders}"),
            _ => {}
        }
    }
    config
}

/// Start the gateway on an ephemeral port. Returns its address and the
/// shutdown handle keeping it alive.
#[allow(dead_code)]
pub async fn start_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    let server = GatewayServer::new(config).expect("config compiles");

    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    (addr, shutdown)
}

/// Mint a token the way the user service does (HS256, shared secret).
#[allow(dead_code)]
pub fn mint_token(user_id: &str, email: &str, roles: &[&str], ttl_secs: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        user_id: user_id.to_string(),
        email: email.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        iat: now,
        exp: now + ttl_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Non-pooled client so each request observes current gateway state.
#[allow(dead_code)]
pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
