//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use route_shield::config::ShieldConfig;
use route_shield::{HttpServer, SecurityGateway, Shutdown};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) integration-test";

/// A server running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub gateway: Arc<SecurityGateway>,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    #[allow(dead_code)]
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

/// Start the full server with `config` on 127.0.0.1:0.
pub async fn spawn_server(mut config: ShieldConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    config.listener.bind_address = addr.to_string();

    let server = HttpServer::new(config);
    let gateway = server.gateway();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestServer {
        addr,
        gateway,
        shutdown,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap()
}

/// Value of the first `Set-Cookie` header starting with `name=`.
#[allow(dead_code)]
pub fn set_cookie(response: &reqwest::Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix(&prefix))
        .and_then(|rest| rest.split(';').next())
        .map(str::to_string)
}
