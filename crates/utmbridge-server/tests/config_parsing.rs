use std::{env, fs, time::Duration};

use utmbridge_server::config::loader::load_config;

const VALID: &str = r#"
[server]
host = "127.0.0.1"
port = 8081
webhook_path = "/hooks/form"

[crm]
base_url = "https://acme.kommo.com"
request_timeout_ms = 5000

[crm.fields]
utm_source = 1001
utm_medium = 1002
utm_campaign = 1003
utm_content = 1004
utm_placement = 1005

[oauth]
client_id = "client"
client_secret = "secret"
redirect_uri = "https://acme.example/oauth"

[credentials]
path = "/var/lib/utmbridge/tokens.json"

[reconcile]
max_attempts = 5
poll_interval_ms = 500

[logging]
level = "debug"
"#;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("utmbridge.toml");
    fs::write(&path, VALID).expect("write toml");

    // 1) Valid config parses, defaults fill the gaps
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.server.webhook_path, "/hooks/form");
    assert_eq!(cfg.crm.fields.utm_placement, 1005);
    assert!(cfg.refresh_enabled());
    let policy = cfg.reconcile_policy();
    assert_eq!(policy.max_attempts, 5);
    assert_eq!(policy.poll_interval, Duration::from_millis(500));
    assert_eq!(policy.max_refreshes, 3);
    assert_eq!(
        cfg.crm_client_config().update_delay,
        Duration::from_millis(1000)
    );

    // 2) Env override should win over file
    unsafe {
        env::set_var("UTMBRIDGE__RECONCILE__MAX_ATTEMPTS", "7");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.reconcile.max_attempts, 7);
    unsafe {
        env::remove_var("UTMBRIDGE__RECONCILE__MAX_ATTEMPTS");
    }

    // 3) Access-only mode: no [oauth] section
    let access_only = VALID.replace(
        "[oauth]\nclient_id = \"client\"\nclient_secret = \"secret\"\nredirect_uri = \"https://acme.example/oauth\"\n",
        "",
    );
    fs::write(&path, &access_only).expect("write toml");
    let cfg = load_config(path.to_str()).expect("access-only config");
    assert!(!cfg.refresh_enabled());
    assert!(cfg.oauth_client_config().is_none());

    // 4) Missing field id fails
    let missing_field = VALID.replace("utm_content = 1004\n", "");
    fs::write(&path, missing_field).expect("write toml");
    assert!(load_config(path.to_str()).is_err());

    // 5) Invalid values fail validation
    let zero_attempts = VALID.replace("max_attempts = 5", "max_attempts = 0");
    fs::write(&path, zero_attempts).expect("write toml");
    let err = load_config(path.to_str()).unwrap_err();
    assert!(err.contains("max_attempts"), "{err}");

    let empty_secret = VALID.replace("client_secret = \"secret\"", "client_secret = \"\"");
    fs::write(&path, empty_secret).expect("write toml");
    let err = load_config(path.to_str()).unwrap_err();
    assert!(err.contains("client_secret"), "{err}");

    let bad_level = VALID.replace("level = \"debug\"", "level = \"loud\"");
    fs::write(&path, bad_level).expect("write toml");
    assert!(load_config(path.to_str()).is_err());
}

#[test]
fn missing_crm_section_is_fatal() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("utmbridge.toml");
    fs::write(&path, "[server]\nport = 3000\n").expect("write toml");

    assert!(load_config(path.to_str()).is_err());
}
