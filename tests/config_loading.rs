use std::io::Write;
use std::time::Duration;

use inertia_server::config::{self, LoadError, LogFormat};
use serial_test::serial;
use tempfile::NamedTempFile;

fn toml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

struct EnvGuard(&'static [&'static str]);

impl EnvGuard {
    fn set(vars: &'static [(&'static str, &'static str)], keys: &'static [&'static str]) -> Self {
        for (key, value) in vars {
            unsafe { std::env::set_var(key, value) };
        }
        Self(keys)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in self.0 {
            unsafe { std::env::remove_var(key) };
        }
    }
}

#[test]
#[serial]
fn explicit_file_configures_engine() {
    let file = toml_file(
        r#"
[app]
base_url = "https://app.test/"
asset_version = "build-42"
dev_mode = true

[ssr]
enabled = true
url = "http://127.0.0.1:13714/render"
timeout_ms = 1500
retry_statuses = [502, 503]

[ssr.headers]
authorization = "Bearer secret"

[logging]
level = "debug"
json = true
"#,
    );

    let settings = config::load(Some(file.path())).expect("settings load");

    assert_eq!(settings.app.base_url, "https://app.test");
    assert_eq!(settings.app.asset_version, "build-42");
    assert!(settings.app.dev_mode);
    assert!(matches!(settings.logging.format, LogFormat::Json));

    let ssr = settings.ssr.to_config().expect("ssr enabled");
    assert_eq!(ssr.timeout, Duration::from_millis(1500));
    assert_eq!(ssr.retry_statuses, vec![502, 503]);
    assert_eq!(
        ssr.headers.get("authorization").map(String::as_str),
        Some("Bearer secret")
    );
}

#[test]
#[serial]
fn environment_overrides_file_values() {
    let file = toml_file(
        r#"
[app]
asset_version = "from-file"

[ssr]
enabled = false
"#,
    );
    let _env = EnvGuard::set(
        &[
            ("INERTIA__APP__ASSET_VERSION", "from-env"),
            ("INERTIA__SSR__ENABLED", "true"),
            ("INERTIA__SSR__RETRY_STATUSES", "500,504"),
        ],
        &[
            "INERTIA__APP__ASSET_VERSION",
            "INERTIA__SSR__ENABLED",
            "INERTIA__SSR__RETRY_STATUSES",
        ],
    );

    let settings = config::load(Some(file.path())).expect("settings load");

    assert_eq!(settings.app.asset_version, "from-env");
    assert!(settings.ssr.enabled);
    assert_eq!(settings.ssr.retry_statuses, vec![500, 504]);
}

#[test]
#[serial]
fn invalid_values_name_the_offending_key() {
    let file = toml_file(
        r#"
[ssr]
retry_statuses = [42]
"#,
    );

    let err = config::load(Some(file.path())).expect_err("invalid retry status");
    match err {
        LoadError::Invalid { key, .. } => assert_eq!(key, "ssr.retry_statuses"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
#[serial]
fn missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");

    assert!(config::load(Some(&path)).is_err());
}
