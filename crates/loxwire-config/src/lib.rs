//! Shared configuration for loxwire consumers.
//!
//! TOML profiles, credential resolution (env + plaintext), and translation
//! to `loxwire_core::ClientConfig`. One profile describes one Miniserver.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use loxwire_core::{ClientConfig, Permission, TlsVerification};

/// Prefix of every environment variable the loader reads.
pub const ENV_PREFIX: &str = "LOXWIRE_";

const USERNAME_ENV: &str = "LOXWIRE_USERNAME";
const PASSWORD_ENV: &str = "LOXWIRE_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    /// Values every profile falls back to.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named Miniserver profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// HTTP timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Accept self-signed certificates.
    #[serde(default = "default_insecure")]
    pub insecure: bool,

    /// `"app"` or `"web"`.
    #[serde(default = "default_permission")]
    pub permission: String,

    #[serde(default = "default_client_info")]
    pub client_info: String,

    /// Refresh the token with this many seconds left.
    #[serde(default = "default_refresh_window")]
    pub refresh_window: u64,

    /// Keep-alive period, seconds. Zero disables.
    #[serde(default = "default_keepalive")]
    pub keepalive_interval: u64,

    #[serde(default)]
    pub reduced_detail: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            insecure: default_insecure(),
            permission: default_permission(),
            client_info: default_client_info(),
            refresh_window: default_refresh_window(),
            keepalive_interval: default_keepalive(),
            reduced_detail: false,
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_insecure() -> bool {
    true
}
fn default_permission() -> String {
    "app".into()
}
fn default_client_info() -> String {
    "loxwire".into()
}
fn default_refresh_window() -> u64 {
    30
}
fn default_keepalive() -> u64 {
    120
}

/// A named Miniserver profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Miniserver base URL (e.g., "http://192.168.1.77").
    pub url: String,

    /// Push-channel URL override.
    pub ws_url: Option<String>,

    pub username: Option<String>,

    /// Password in plaintext. Prefer `password_env`.
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    pub permission: Option<String>,
    pub client_info: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    pub insecure: Option<bool>,
    pub timeout: Option<u64>,
    pub refresh_window: Option<u64>,
    pub keepalive_interval: Option<u64>,
    pub reduced_detail: Option<bool>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "loxwire", "loxwire").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("loxwire");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Nested keys use a double underscore: `LOXWIRE_DEFAULTS__TIMEOUT=5`,
/// `LOXWIRE_PROFILES__HOME__URL=http://10.0.0.2`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve username + password for a profile.
///
/// Username: profile, then `LOXWIRE_USERNAME`. Password: the variable named
/// by `password_env`, then `LOXWIRE_PASSWORD`, then plaintext.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<(String, SecretString), ConfigError> {
    let no_credentials = || ConfigError::NoCredentials {
        profile: profile_name.into(),
    };

    let username = profile
        .username
        .clone()
        .or_else(|| std::env::var(USERNAME_ENV).ok())
        .ok_or_else(no_credentials)?;

    // 1. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env {
        if let Ok(pw) = std::env::var(env_name) {
            return Ok((username, SecretString::from(pw)));
        }
    }

    // 2. Global env var
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        return Ok((username, SecretString::from(pw)));
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok((username, SecretString::from(pw.clone())));
    }

    Err(no_credentials())
}

// ── ClientConfig construction ───────────────────────────────────────

/// Build a `ClientConfig` for `profile_name`, or the default profile when
/// `None`.
pub fn client_config(cfg: &Config, profile_name: Option<&str>) -> Result<ClientConfig, ConfigError> {
    let name = profile_name
        .or(cfg.default_profile.as_deref())
        .unwrap_or("default");
    let profile = cfg
        .profiles
        .get(name)
        .ok_or_else(|| ConfigError::UnknownProfile {
            profile: name.into(),
        })?;
    profile_to_client_config(profile, name, &cfg.defaults)
}

/// Build a `ClientConfig` from a profile, falling back to `defaults` for
/// every unset field.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let url = parse_url("url", &profile.url)?;
    let ws_url = profile
        .ws_url
        .as_deref()
        .map(|raw| parse_url("ws_url", raw))
        .transpose()?;

    let (username, password) = resolve_credentials(profile, profile_name)?;

    let permission_raw = profile
        .permission
        .as_deref()
        .unwrap_or(&defaults.permission);
    let permission: Permission =
        permission_raw
            .parse()
            .map_err(|_| ConfigError::Validation {
                field: "permission".into(),
                reason: format!("expected 'app' or 'web', got '{permission_raw}'"),
            })?;

    let tls = if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid // Miniservers ship self-signed certificates
    } else {
        TlsVerification::SystemDefaults
    };

    let mut config = ClientConfig::new(url, username, password);
    config.ws_url = ws_url;
    config.permission = permission;
    config.client_info = profile
        .client_info
        .clone()
        .unwrap_or_else(|| defaults.client_info.clone());
    config.tls = tls;
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.refresh_window =
        Duration::from_secs(profile.refresh_window.unwrap_or(defaults.refresh_window));
    config.keepalive_interval = Duration::from_secs(
        profile
            .keepalive_interval
            .unwrap_or(defaults.keepalive_interval),
    );
    config.reduced_detail = profile.reduced_detail.unwrap_or(defaults.reduced_detail);
    Ok(config)
}

fn parse_url(field: &str, raw: &str) -> Result<url::Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use secrecy::ExposeSecret;

    const CONFIG: &str = r#"
        default_profile = "home"

        [defaults]
        timeout = 10

        [profiles.home]
        url = "http://192.168.1.77"
        username = "admin"
        password = "plain"
        permission = "web"

        [profiles.cabin]
        url = "https://cabin.example"
        username = "guest"
        password_env = "CABIN_PW"
        ca_cert = "/etc/cabin-ca.pem"
        keepalive_interval = 0
        reduced_detail = true
    "#;

    fn load(jail: &mut Jail) -> Config {
        jail.create_file("config.toml", CONFIG).unwrap();
        load_config_from(&jail.directory().join("config.toml")).unwrap()
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|jail| {
            let cfg = load_config_from(&jail.directory().join("absent.toml"))
                .map_err(|e| e.to_string())?;
            assert_eq!(cfg.default_profile.as_deref(), Some("default"));
            assert_eq!(cfg.defaults.timeout, 30);
            assert_eq!(cfg.defaults.client_info, "loxwire");
            assert!(cfg.profiles.is_empty());
            Ok(())
        });
    }

    #[test]
    fn default_profile_with_defaults_applied() {
        Jail::expect_with(|jail| {
            let cfg = load(jail);
            let client = client_config(&cfg, None).map_err(|e| e.to_string())?;

            assert_eq!(client.url.as_str(), "http://192.168.1.77/");
            assert_eq!(client.username, "admin");
            assert_eq!(client.password.expose_secret(), "plain");
            assert_eq!(client.permission, Permission::Web);
            assert_eq!(client.timeout, Duration::from_secs(10));
            assert_eq!(client.refresh_window, Duration::from_secs(30));
            assert_eq!(client.tls, TlsVerification::DangerAcceptInvalid);
            assert!(!client.reduced_detail);
            Ok(())
        });
    }

    #[test]
    fn password_env_wins_over_global_and_plaintext() {
        Jail::expect_with(|jail| {
            jail.set_env("CABIN_PW", "from-profile-env");
            jail.set_env("LOXWIRE_PASSWORD", "from-global-env");
            let cfg = load(jail);

            let cabin = client_config(&cfg, Some("cabin")).map_err(|e| e.to_string())?;
            assert_eq!(cabin.password.expose_secret(), "from-profile-env");
            assert_eq!(cabin.tls, TlsVerification::CustomCa("/etc/cabin-ca.pem".into()));
            assert_eq!(cabin.keepalive_interval, Duration::ZERO);
            assert!(cabin.reduced_detail);

            let home = client_config(&cfg, Some("home")).map_err(|e| e.to_string())?;
            assert_eq!(home.password.expose_secret(), "from-global-env");
            Ok(())
        });
    }

    #[test]
    fn missing_password_is_no_credentials() {
        Jail::expect_with(|jail| {
            let cfg = load(jail);
            assert!(matches!(
                client_config(&cfg, Some("cabin")),
                Err(ConfigError::NoCredentials { ref profile }) if profile == "cabin"
            ));
            Ok(())
        });
    }

    #[test]
    fn env_overrides_nested_keys() {
        Jail::expect_with(|jail| {
            jail.set_env("LOXWIRE_DEFAULTS__TIMEOUT", "5");
            jail.set_env("LOXWIRE_DEFAULT_PROFILE", "cabin");
            let cfg = load(jail);
            assert_eq!(cfg.defaults.timeout, 5);
            assert_eq!(cfg.default_profile.as_deref(), Some("cabin"));
            Ok(())
        });
    }

    #[test]
    fn unknown_profile_and_bad_values() {
        Jail::expect_with(|jail| {
            let mut cfg = load(jail);
            assert!(matches!(
                client_config(&cfg, Some("garage")),
                Err(ConfigError::UnknownProfile { .. })
            ));

            if let Some(home) = cfg.profiles.get_mut("home") {
                home.permission = Some("admin".into());
            }
            assert!(matches!(
                client_config(&cfg, Some("home")),
                Err(ConfigError::Validation { ref field, .. }) if field == "permission"
            ));

            if let Some(home) = cfg.profiles.get_mut("home") {
                home.permission = None;
                home.url = "not a url".into();
            }
            assert!(matches!(
                client_config(&cfg, Some("home")),
                Err(ConfigError::Validation { ref field, .. }) if field == "url"
            ));
            Ok(())
        });
    }

    #[test]
    fn save_then_load_preserves_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.profiles.insert(
            "default".into(),
            Profile {
                url: "http://10.0.0.2".into(),
                username: Some("admin".into()),
                timeout: Some(7),
                ..Profile::default()
            },
        );
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let profile = loaded.profiles.get("default").unwrap();
        assert_eq!(profile.url, "http://10.0.0.2");
        assert_eq!(profile.timeout, Some(7));
    }
}
