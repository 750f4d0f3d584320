use std::collections::BTreeMap;

use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::{get, post},
};
use barrage::{
    LoadTest, Policy, TargetConfig,
    assertion::BODY_CONTAINS,
    stats::FieldPreset,
    variable::{VariableEntry, VariableMap, VariableType},
};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

async fn login() -> Json<Value> {
    Json(json!({ "data": { "token": "s3cr3t", "id": 42 } }))
}

async fn profile(headers: HeaderMap) -> (StatusCode, String) {
    match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some("Bearer s3cr3t") => (StatusCode::OK, r#"{"name":"robert"}"#.to_string()),
        _ => (StatusCode::UNAUTHORIZED, String::new()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // A throwaway server so the example runs anywhere
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    let app = Router::new()
        .route("/login", post(login))
        .route("/users/:id", get(profile));
    tokio::spawn(async move { axum::serve(listener, app).await });

    let login = TargetConfig::builder()
        .name("login")
        .method("POST")
        .url(format!("{base}/login"))
        .variables(VariableMap::from([
            (
                "$token".to_string(),
                VariableEntry::new(VariableType::String, "data.token"),
            ),
            (
                "$id".to_string(),
                VariableEntry::new(VariableType::Number, "data.id"),
            ),
        ]))
        .build();
    let get_user = TargetConfig::builder()
        .name("getUser")
        .url(format!("{base}/users/$id"))
        .headers(BTreeMap::from([(
            AUTHORIZATION.to_string(),
            "Bearer $token".to_string(),
        )]))
        .assertions(BTreeMap::from([(
            BODY_CONTAINS.to_string(),
            "robert".to_string(),
        )]))
        .build();

    let summary = LoadTest::builder()
        .name("login then fetch user")
        .targets(vec![login, get_user])
        .policy(Policy::Sequential)
        .concurrency(20)
        .request_count(500)
        .build()
        .run()
        .await?;

    summary.print(&FieldPreset::default_with_failed_codes());
    Ok(())
}
