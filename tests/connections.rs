// tests/connections.rs

mod common;

use common::{FakeFactory, Sandbox};
use serde_json::json;
use snowflake_ai::connect::registry::ConnectionState;
use snowflake_ai::connect::{ConnectError, Resource, TokenContext};
use snowflake_ai::core::config_resolver::ResolvedConfig;
use snowflake_ai::{AppContext, ConnectManager, ConnectionRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CONNECTS: &str = r#"
[apps.grp.app]
type = "console"
app_connects = ["oauth_connects.device_code_0", "data_connects.snowflake_default"]

[app_connects.oauth_connects.device_code_0]
type = "device_code"
tenant_id = "common"
client_id = "client"
auth_request_url = "http://127.0.0.1:9/{tenant_id}/devicecode"
grant_token_request_url = "http://127.0.0.1:9/{tenant_id}/token"

[app_connects.oauth_connects.auth_code_0]
type = "auth_code"
tenant_id = "common"
client_id = "client"
client_secret_env = "APP_SECRET"
redirect_uri = "http://localhost:8501"
auth_request_url = "http://127.0.0.1:9/{tenant_id}/authorize"
grant_token_request_url = "http://127.0.0.1:9/{tenant_id}/token"

[app_connects.data_connects]
init_list = ["snowflake_default", "snowflake_oauth"]

[app_connects.data_connects.snowflake_default]
type = "snowflake"
auth_type = "snowflake"
account = "acme"
user = "svc"
password_env = "SF_PWD"

[app_connects.data_connects.snowflake_keypair]
type = "snowflake"
auth_type = "keypair"
account = "acme"
user = "svc"
private_key_path_env = "SF_KEY_PATH"

[app_connects.data_connects.snowflake_oauth]
type = "snowflake"
auth_type = "oauth"
oauth_connect = "oauth_connects.auth_code_0"
account = "acme"

[app_connects.data_connects.file_0]
type = "file"
storage_type = "local"
format = "csv"
dir_path = "./data"
"#;

struct Fixture {
    sandbox: Sandbox,
    resolved: Arc<ResolvedConfig>,
    factory: Arc<FakeFactory>,
    registry: Arc<ConnectionRegistry>,
}

fn fixture() -> Fixture {
    let sandbox = Sandbox::new();
    sandbox.write("cwd/snowflake_ai/conf", "app_config.toml", CONNECTS);
    std::fs::create_dir_all(sandbox.cwd().join("data")).unwrap();

    let mut secrets = HashMap::new();
    secrets.insert("SF_PWD".to_string(), "pw".to_string());
    secrets.insert(
        "SF_KEY_PATH".to_string(),
        sandbox.root.path().join("no_such_key.p8").display().to_string(),
    );

    let resolved = sandbox.resolve();
    let factory = Arc::new(FakeFactory::default());
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::clone(&resolved),
        factory.clone(),
        Arc::new(secrets),
    ));
    Fixture {
        sandbox,
        resolved,
        factory,
        registry,
    }
}

#[test]
fn test_shared_connection_is_reused() {
    let f = fixture();
    let first = f.registry.get_connection(Some("snowflake_default")).unwrap().unwrap();
    let second = f.registry.get_connection(Some("data_connects.snowflake_default")).unwrap().unwrap();
    assert_eq!(first.id(), second.id());
    assert_eq!(f.factory.count(), 1);
    assert!(f.registry.is_currently_active(None));
}

#[test]
fn test_closed_connection_is_rebuilt_with_a_new_identity() {
    let f = fixture();
    let first = f.registry.get_connection(Some("snowflake_default")).unwrap().unwrap();
    f.registry.close_connection(Some("snowflake_default")).unwrap();
    assert_eq!(f.registry.state("snowflake_default"), ConnectionState::Closed);
    assert!(f.factory.last().is_closed());

    let second = f.registry.get_connection(Some("snowflake_default")).unwrap().unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(f.factory.count(), 2);
}

#[test]
fn test_stale_connection_is_replaced() {
    let f = fixture();
    let first = f.registry.get_connection(Some("snowflake_default")).unwrap().unwrap();
    f.factory.last().break_session();
    assert!(!f.registry.is_currently_active(Some("snowflake_default")));
    assert_eq!(f.registry.state("snowflake_default"), ConnectionState::Stale);

    let second = f.registry.get_connection(Some("snowflake_default")).unwrap().unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(f.registry.state("snowflake_default"), ConnectionState::Active);
}

#[test]
fn test_unreadable_private_key_fails_the_connection() {
    let f = fixture();
    let err = f.registry.create_connection(Some("snowflake_keypair")).unwrap_err();
    assert!(matches!(err, ConnectError::AuthFailure { .. }));
    assert_eq!(f.factory.count(), 0);
}

#[test]
fn test_user_connect_is_never_shared() {
    let f = fixture();
    assert!(!f.registry.is_service_connection("snowflake_oauth").unwrap());
    assert!(f.registry.get_connection(Some("snowflake_oauth")).unwrap().is_none());

    let tokens = TokenContext::new(
        json!({
            "access_token": "opaque",
            "decoded_access_token": {"upn": "jane@acme.com"}
        })
        .as_object()
        .cloned()
        .unwrap(),
    );
    let handle = f.registry.create_user_session(Some("snowflake_oauth"), &tokens).unwrap();
    assert!(matches!(handle.resource(), Resource::Session(_)));
    assert_eq!(f.factory.count(), 1);
}

#[test]
fn test_init_list_opens_only_shared_connects() {
    let f = fixture();
    let opened = f.registry.init_connects().unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened.first().unwrap().key().to_string(), "data_connects.snowflake_default");
}

#[test]
fn test_file_connect_resolves_against_the_root() {
    let f = fixture();
    let handle = f.registry.get_connection(Some("file_0")).unwrap().unwrap();
    let Resource::Path(path) = handle.resource() else {
        panic!("expected a path resource");
    };
    assert!(path.ends_with("data"));
    assert!(path.starts_with(&f.resolved.root_path));
    assert!(f.sandbox.cwd().join("data").is_dir());
}

#[test]
fn test_expired_device_code_returns_nothing_quickly() {
    let f = fixture();
    let oauth = f.registry.oauth_connect(Some("device_code_0")).unwrap();
    let response = json!({
        "device_code": "dev-123",
        "user_code": "ABCD",
        "verification_uri": "https://example.invalid/device",
        "expires_in": 0,
        "interval": 1
    });

    let started = Instant::now();
    let result = oauth.process_authorize_response(response.as_object().unwrap());
    assert!(result.is_empty());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_app_connects_are_built_from_the_app_list() {
    let f = fixture();
    let ctx = AppContext::new(f.sandbox.options());
    let app = ctx.app_config("grp.app").unwrap();
    let manager = ConnectManager::new(app, Arc::clone(&f.registry));

    let connects = manager.create_app_connects().unwrap();
    assert_eq!(connects.len(), 2);
    assert_eq!(manager.default_oauth_connect().unwrap().key().to_string(), "oauth_connects.device_code_0");
    assert!(manager.default_snow_connect().unwrap().is_some());
    assert_eq!(f.factory.count(), 1);
}
