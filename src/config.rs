//! Process-wide configuration.
//!
//! Sources are layered, later ones winning:
//!
//! 1. built-in defaults
//! 2. an optional TOML file (`--config`)
//! 3. `GLOSA_*` environment variables (`GLOSA_MAX_AGE=600`)
//! 4. command-line overrides
//!
//! The merged result is deserialized into a loose [`RawConfig`] and then
//! validated into the typed [`AppConfig`], which never changes afterwards.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::markup::MarkupEngine;

const ENV_PREFIX: &str = "GLOSA";

/// Key used when running in test mode without an explicit secret.
const DEVELOPMENT_SECRET: &str = "glosa-development-secret-do-not-deploy";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("`max_age` must be a positive number of seconds, got {0}")]
    MaxAge(i64),

    #[error("`secret_key` is required in production mode")]
    MissingSecret,

    #[error("`host` must be an absolute http(s) URL, got `{0}`")]
    Host(String),
}

/// Values as they come out of the layered sources, before validation.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    secret_key: Option<String>,
    #[serde(default)]
    storage: Option<PathBuf>,
    production: bool,
    max_age: i64,
    host: String,
    markup: MarkupEngine,
    moderation: bool,
    #[serde(default)]
    admin_password: Option<String>,
}

/// Command-line values that take precedence over every other source.
#[derive(Debug, Default)]
pub struct Overrides {
    pub storage: Option<PathBuf>,
    pub production: Option<bool>,
}

/// Validated, read-only configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Signs comment tokens. Changing it invalidates every issued token.
    pub secret_key: String,
    /// Snapshot file for the comment store; `None` keeps comments in memory.
    pub storage: Option<PathBuf>,
    /// Hides internal error details from responses.
    pub production: bool,
    /// How long a comment token stays valid.
    pub max_age: Duration,
    /// Canonical public URL of this service, without a trailing slash.
    pub host: String,
    pub markup: MarkupEngine,
    /// Holds new comments as pending until an admin activates them.
    pub moderation: bool,
    /// Enables the moderation endpoints when set.
    pub admin_password: Option<String>,
}

impl AppConfig {
    pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(15 * 60);
    pub const DEFAULT_HOST: &'static str = "http://localhost:8000";

    /// Loads and validates configuration from all sources.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        Self::layered(file, config::Environment::with_prefix(ENV_PREFIX), overrides)
    }

    fn layered(
        file: Option<&Path>,
        env: config::Environment,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("production", true)?
            .set_default("max_age", Self::DEFAULT_MAX_AGE.as_secs())?
            .set_default("host", Self::DEFAULT_HOST)?
            .set_default("markup", "markdown")?
            .set_default("moderation", false)?;

        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }

        let settings = builder
            .add_source(env.try_parsing(true))
            .set_override_option(
                "storage",
                overrides.storage.as_ref().map(|p| p.to_string_lossy().into_owned()),
            )?
            .set_override_option("production", overrides.production)?
            .build()?;

        Self::from_raw(settings.try_deserialize()?)
    }

    /// Test-mode configuration with an in-memory store and the development
    /// secret. Useful for tests and local experiments.
    pub fn development() -> Self {
        Self {
            secret_key: DEVELOPMENT_SECRET.to_owned(),
            storage: None,
            production: false,
            max_age: Self::DEFAULT_MAX_AGE,
            host: Self::DEFAULT_HOST.to_owned(),
            markup: MarkupEngine::default(),
            moderation: false,
            admin_password: None,
        }
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let max_age = u64::try_from(raw.max_age)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or(ConfigError::MaxAge(raw.max_age))?;

        let secret_key = match raw.secret_key.filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None if raw.production => return Err(ConfigError::MissingSecret),
            None => DEVELOPMENT_SECRET.to_owned(),
        };

        Ok(Self {
            secret_key,
            storage: raw.storage,
            production: raw.production,
            max_age,
            host: normalize_host(&raw.host)?,
            markup: raw.markup,
            moderation: raw.moderation,
            admin_password: raw.admin_password.filter(|p| !p.is_empty()),
        })
    }
}

fn normalize_host(host: &str) -> Result<String, ConfigError> {
    let trimmed = host.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"));
    match rest {
        Some(authority) if !authority.is_empty() && !authority.starts_with('/') => {
            Ok(trimmed.to_owned())
        }
        _ => Err(ConfigError::Host(host.to_owned())),
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("secret_key", &"<redacted>")
            .field("storage", &self.storage)
            .field("production", &self.production)
            .field("max_age", &self.max_age)
            .field("host", &self.host)
            .field("markup", &self.markup)
            .field("moderation", &self.moderation)
            .field("admin_password", &self.admin_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn raw() -> RawConfig {
        RawConfig {
            secret_key: Some("s3cret".into()),
            storage: None,
            production: true,
            max_age: 900,
            host: "https://comments.example.org/".into(),
            markup: MarkupEngine::Plain,
            moderation: false,
            admin_password: Some(String::new()),
        }
    }

    #[test]
    fn valid_raw_config_is_normalized() {
        let cfg = AppConfig::from_raw(raw()).unwrap();
        assert_eq!(cfg.max_age, Duration::from_secs(900));
        assert_eq!(cfg.host, "https://comments.example.org");
        assert_eq!(cfg.admin_password, None);
    }

    #[test]
    fn max_age_must_be_positive() {
        for bad in [0, -5] {
            let err = AppConfig::from_raw(RawConfig { max_age: bad, ..raw() }).unwrap_err();
            assert!(matches!(err, ConfigError::MaxAge(n) if n == bad));
        }
    }

    #[test]
    fn production_requires_a_secret() {
        let err = AppConfig::from_raw(RawConfig { secret_key: None, ..raw() }).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret));

        let cfg = AppConfig::from_raw(RawConfig { secret_key: None, production: false, ..raw() })
            .unwrap();
        assert_eq!(cfg.secret_key, DEVELOPMENT_SECRET);
    }

    #[test]
    fn host_must_be_http() {
        for bad in ["localhost:8000", "ftp://x", "http://", "https:///path"] {
            let err = AppConfig::from_raw(RawConfig { host: bad.into(), ..raw() }).unwrap_err();
            assert!(matches!(err, ConfigError::Host(_)), "{bad}");
        }
    }

    #[test]
    fn file_and_overrides_are_layered() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "secret_key = \"from-file\"\nmax_age = 60\nmarkup = \"paragraphs\"\nmoderation = true"
        )
        .unwrap();

        let overrides = Overrides {
            storage: Some(PathBuf::from("/var/lib/glosa/comments.redb")),
            production: Some(false),
        };
        let cfg = AppConfig::load(Some(file.path()), &overrides).unwrap();

        assert_eq!(cfg.secret_key, "from-file");
        assert_eq!(cfg.max_age, Duration::from_secs(60));
        assert_eq!(cfg.markup, MarkupEngine::Paragraphs);
        assert!(cfg.moderation);
        assert!(!cfg.production);
        assert_eq!(cfg.storage.as_deref(), Some(Path::new("/var/lib/glosa/comments.redb")));
    }

    #[test]
    fn environment_beats_the_file_and_loses_to_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "secret_key = \"from-file\"\nmax_age = 60\nhost = \"https://file.example\""
        )
        .unwrap();

        let vars: config::Map<String, String> = [
            ("GLOSA_MAX_AGE", "600"),
            ("GLOSA_ADMIN_PASSWORD", "from-env"),
            ("GLOSA_PRODUCTION", "true"),
            ("GLOSA_STORAGE", "/env/comments.redb"),
            ("OTHER_MAX_AGE", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
        let env = config::Environment::with_prefix(ENV_PREFIX).source(Some(vars));

        let overrides = Overrides { storage: None, production: Some(false) };
        let cfg = AppConfig::layered(Some(file.path()), env, &overrides).unwrap();

        assert_eq!(cfg.secret_key, "from-file");
        assert_eq!(cfg.host, "https://file.example");
        assert_eq!(cfg.max_age, Duration::from_secs(600));
        assert_eq!(cfg.admin_password.as_deref(), Some("from-env"));
        assert_eq!(cfg.storage.as_deref(), Some(Path::new("/env/comments.redb")));
        assert!(!cfg.production);
    }

    #[test]
    fn invalid_environment_values_are_rejected() {
        let vars = config::Map::from([("GLOSA_MAX_AGE".to_owned(), "0".to_owned())]);
        let env = config::Environment::with_prefix(ENV_PREFIX).source(Some(vars));
        let err = AppConfig::layered(None, env, &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MaxAge(0)), "{err}");
    }

    #[test]
    fn markdown_is_the_default_engine() {
        let vars = config::Map::from([("GLOSA_SECRET_KEY".to_owned(), "k".to_owned())]);
        let env = config::Environment::with_prefix(ENV_PREFIX).source(Some(vars));
        let cfg = AppConfig::layered(None, env, &Overrides::default()).unwrap();
        assert_eq!(cfg.markup, MarkupEngine::Markdown);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = AppConfig { admin_password: Some("pw".into()), ..AppConfig::development() };
        let shown = format!("{cfg:?}");
        assert!(!shown.contains(DEVELOPMENT_SECRET) && !shown.contains("\"pw\""));
    }
}
