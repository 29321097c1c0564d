use std::path::PathBuf;

use serial_test::serial;

use crate::config::{AppConfig, TelemetryConfig, load_env_file};

const CONFIG_VARS: [&str; 5] = [
    "DATABASE_URL",
    "JWT_SECRET",
    "TOKEN_TTL_HOURS",
    "UPLOAD_DIR",
    "FRONTEND_DIR",
];

fn with_config_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
    let mut all: Vec<(&str, Option<&str>)> = CONFIG_VARS.iter().map(|k| (*k, None)).collect();
    for (key, value) in vars {
        all.retain(|(k, _)| k != key);
        all.push((*key, Some(*value)));
    }
    temp_env::with_vars(all, f);
}

#[test]
#[serial]
fn test_defaults_apply_when_only_secret_is_set() {
    with_config_env(&[("JWT_SECRET", "shh")], || {
        let config = AppConfig::load().expect("Config should load");

        assert_eq!(config.jwt_secret, "shh");
        assert_eq!(config.database_url, "sqlite://ta_management.db?mode=rwc");
        assert_eq!(config.token_ttl_hours, 30);
        assert_eq!(config.token_ttl(), chrono::Duration::hours(30));
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.frontend_dir, PathBuf::from("frontend/build"));
    });
}

#[test]
#[serial]
fn test_overrides_are_read_from_environment() {
    with_config_env(
        &[
            ("JWT_SECRET", "shh"),
            ("DATABASE_URL", "sqlite://other.db"),
            ("TOKEN_TTL_HOURS", " 2 "),
            ("UPLOAD_DIR", "/srv/resumes"),
            ("FRONTEND_DIR", "/srv/app"),
        ],
        || {
            let config = AppConfig::load().expect("Config should load");

            assert_eq!(config.database_url, "sqlite://other.db");
            assert_eq!(config.token_ttl_hours, 2);
            assert_eq!(config.upload_dir, PathBuf::from("/srv/resumes"));
            assert_eq!(config.frontend_dir, PathBuf::from("/srv/app"));
        },
    );
}

#[test]
#[serial]
fn test_missing_or_blank_secret_fails() {
    with_config_env(&[], || {
        assert!(AppConfig::load().is_err());
    });

    with_config_env(&[("JWT_SECRET", "   ")], || {
        assert!(AppConfig::load().is_err());
    });
}

#[test]
#[serial]
fn test_invalid_ttl_fails() {
    with_config_env(&[("JWT_SECRET", "shh"), ("TOKEN_TTL_HOURS", "soon")], || {
        let err = AppConfig::load().expect_err("Non-numeric TTL should fail");
        assert!(err.to_string().contains("TOKEN_TTL_HOURS"));
    });

    with_config_env(&[("JWT_SECRET", "shh"), ("TOKEN_TTL_HOURS", "0")], || {
        assert!(AppConfig::load().is_err());
    });
}

#[test]
#[serial]
fn test_telemetry_export_is_opt_in() {
    temp_env::with_vars(
        [
            ("OTLP_ENDPOINT", None::<&str>),
            ("OTLP_API_KEY", None),
        ],
        || {
            let config = TelemetryConfig::load();
            assert!(config.otlp_endpoint.is_none());
            assert!(config.otlp_api_key.is_none());
        },
    );

    temp_env::with_vars(
        [
            ("OTLP_ENDPOINT", Some("https://collector:4317")),
            ("OTLP_API_KEY", Some("")),
        ],
        || {
            let config = TelemetryConfig::load();
            assert_eq!(config.otlp_endpoint.as_deref(), Some("https://collector:4317"));
            assert!(config.otlp_api_key.is_none(), "Blank keys count as unset");
        },
    );
}

#[test]
#[serial]
fn test_env_files_never_override_set_variables() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let secrets = dir.path().join(".secrets.env");
    let common = dir.path().join("common.env");
    std::fs::write(&secrets, "UPLOAD_DIR=/from/secrets\n").expect("Failed to write secrets");
    std::fs::write(
        &common,
        "DATABASE_URL=sqlite://from-file.db\nUPLOAD_DIR=/from/common\nFRONTEND_DIR=/from/common\n",
    )
    .expect("Failed to write common");

    with_config_env(&[("DATABASE_URL", "sqlite://deployed.db")], || {
        assert!(load_env_file(&secrets).expect("Secrets should load"));
        assert!(load_env_file(&common).expect("Common should load"));
        assert!(!load_env_file(dir.path().join("missing.env")).expect("Missing is skipped"));

        assert_eq!(std::env::var("DATABASE_URL").as_deref(), Ok("sqlite://deployed.db"));
        assert_eq!(std::env::var("UPLOAD_DIR").as_deref(), Ok("/from/secrets"));
        assert_eq!(std::env::var("FRONTEND_DIR").as_deref(), Ok("/from/common"));
    });
}
