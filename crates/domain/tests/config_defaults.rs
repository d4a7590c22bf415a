use lb_domain::config::{Config, ConfigSeverity, StoreBackend};

fn errors(config: &Config) -> Vec<String> {
    config
        .validate()
        .into_iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .map(|e| e.field)
        .collect()
}

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert!(errors(&config).is_empty(), "{:?}", errors(&config));
}

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 7860);
}

#[test]
fn default_store_is_file_backend() {
    let config = Config::default();
    assert_eq!(config.store.backend, StoreBackend::File);
    assert_eq!(config.store.mongo_uri_env, "MONGO_URI");
}

#[test]
fn mongo_backend_parses() {
    let toml_str = r#"
[store]
backend = "mongo"
database = "bots"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.store.backend, StoreBackend::Mongo);
    assert_eq!(config.store.database, "bots");
    assert_eq!(config.store.collection, "sessions");
}

#[test]
fn secrets_are_named_by_env_var() {
    let config = Config::default();
    assert_eq!(config.webhook.verify_token_env, "VERIFY_TOKEN");
    assert_eq!(config.cloud.token_env, "WHATSAPP_TOKEN");
    assert_eq!(config.cloud.phone_number_id_env, "PHONE_NUMBER_ID");
    assert_eq!(config.link.token_env, "LB_LINK_TOKEN");
}

#[test]
fn empty_session_id_is_rejected() {
    let toml_str = r#"
[session]
session_id = "  "
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(errors(&config).contains(&"session.session_id".to_string()));
}

#[test]
fn inverted_reconnect_delays_are_rejected() {
    let toml_str = r#"
[session.reconnect]
initial_delay_ms = 60000
max_delay_ms = 1000
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(errors(&config).contains(&"session.reconnect.max_delay_ms".to_string()));
}

#[test]
fn http_link_url_is_rejected() {
    let toml_str = r#"
[link]
url = "http://127.0.0.1:7861/link"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(errors(&config).contains(&"link.url".to_string()));
}

#[test]
fn cors_wildcard_is_only_a_warning() {
    let toml_str = r#"
[server.cors]
allowed_origins = ["*"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.field == "server.cors.allowed_origins" && i.severity == ConfigSeverity::Warning));
    assert!(errors(&config).is_empty());
}
