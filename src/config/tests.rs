use super::EmitterConfig;
use std::path::Path;

#[test]
fn load_missing_file_uses_defaults() {
    let cfg = EmitterConfig::load(Path::new("/nonexistent/route-emitter.toml")).unwrap();
    assert_eq!(cfg.cell_id, "");
    assert_eq!(cfg.sync.sync_interval_secs, 60);
    assert_eq!(cfg.sync.emit_interval_secs, 20);
    assert_eq!(cfg.nats.servers, vec!["nats://127.0.0.1:4222".to_string()]);
}

#[test]
fn load_toml_config() {
    let toml = r#"
        cell_id = "cell-z1-0"
        use_direct_instance_routes = true

        [sync]
        sync_interval_secs = 30
        emit_interval_secs = 10
        route_ttl_seconds = 90

        [bbs]
        address = "http://bbs.service.internal:8889"

        [nats]
        servers = ["nats://10.0.0.1:4222", "nats://10.0.0.2:4222"]

        [routing_api]
        url = "http://routing-api.service.internal:3000"
    "#;
    let tmp = std::env::temp_dir().join("route_emitter_test_config.toml");
    std::fs::write(&tmp, toml).unwrap();
    let cfg = EmitterConfig::load(&tmp).unwrap();
    std::fs::remove_file(&tmp).ok();

    assert_eq!(cfg.cell_id, "cell-z1-0");
    assert!(cfg.use_direct_instance_routes);
    assert!(!cfg.use_internal_address_builder);
    assert_eq!(cfg.sync.sync_interval_secs, 30);
    assert_eq!(cfg.sync.route_ttl_seconds, 90);
    assert_eq!(cfg.bbs.address, "http://bbs.service.internal:8889");
    assert_eq!(cfg.nats.servers.len(), 2);
    assert_eq!(cfg.routing_api.url, "http://routing-api.service.internal:3000");
}

#[test]
fn load_json_config() {
    let json = r#"{
        "cell_id": "cell-1",
        "bbs": { "address": "http://127.0.0.1:8889" },
        "nats": { "servers": ["nats://127.0.0.1:4222"] }
    }"#;
    let tmp = std::env::temp_dir().join("route_emitter_test_config.json");
    std::fs::write(&tmp, json).unwrap();
    let cfg = EmitterConfig::load(&tmp).unwrap();
    std::fs::remove_file(&tmp).ok();

    assert_eq!(cfg.cell_id, "cell-1");
    assert_eq!(cfg.sync.route_ttl_seconds, 120);
}

#[test]
fn validate_empty_bbs_address_fails() {
    let mut cfg = EmitterConfig::default();
    cfg.bbs.address = String::new();
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_empty_nats_servers_fails() {
    let mut cfg = EmitterConfig::default();
    cfg.nats.servers = vec![];
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_zero_sync_interval_fails() {
    let mut cfg = EmitterConfig::default();
    cfg.sync.sync_interval_secs = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_default_config_is_valid() {
    assert!(EmitterConfig::default().validate().is_ok());
}
