//! Service shell integration tests.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -p finance-service -- --ignored

mod common;

use common::{at, database_url, init_tracing};
use finance_service::config::{parse_categories, DatabaseConfig, FinanceConfig};
use finance_service::services::FixedClock;
use finance_service::startup::Application;
use service_core::config::Config as CommonConfig;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn test_config() -> FinanceConfig {
    FinanceConfig {
        common: CommonConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        service_name: "finance-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig::new(database_url()),
        sweep_interval: None,
        technician_payment_categories: parse_categories(None),
    }
}

async fn get(port: u16, path: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("Failed to connect");
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nx-request-id: test-req-1\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
#[ignore]
async fn health_ready_and_metrics_respond() {
    init_tracing();

    let app = Application::build_with_clock(test_config(), Arc::new(FixedClock::new(at(2024, 6, 15))))
        .await
        .expect("Failed to build application");
    let port = app.http_port();
    assert_ne!(port, 0);
    app.db().health_check().await.unwrap();

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let health = get(port, "/health").await;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.contains("\"status\":\"ok\""));
    assert!(health.to_ascii_lowercase().contains("x-request-id: test-req-1"));

    let ready = get(port, "/ready").await;
    assert!(ready.starts_with("HTTP/1.1 200"));

    let metrics = get(port, "/metrics").await;
    assert!(metrics.starts_with("HTTP/1.1 200"));
    assert!(metrics.contains("finance_"));
}
