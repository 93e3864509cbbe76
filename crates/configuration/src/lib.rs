use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{AccelerateSettings, Config, DatabaseSettings, LogFormat, LoggingSettings};

/// Prefix for environment overrides, e.g. `STRATA__DATABASE__MAX_CONNECTIONS=20`.
const ENV_PREFIX: &str = "STRATA";

/// Loads the application configuration from the `config.toml` file.
///
/// This function is the primary entry point for this crate. The file is optional;
/// `STRATA__<SECTION>__<KEY>` environment variables are layered on top, and the
/// result is validated before it is returned.
pub fn load_config() -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config.toml").required(false))
        .add_source(environment())
        .build()?;

    finish(builder)
}

/// Loads the configuration from an explicit file path. The file must exist.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(environment())
        .build()?;

    finish(builder)
}

/// Parses a configuration from TOML text, without environment overrides.
pub fn parse_config(toml: &str) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?;

    finish(builder)
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

fn finish(builder: config::Config) -> Result<Config, ConfigError> {
    // Attempt to deserialize the entire configuration into our `Config` struct
    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;
    tracing::debug!(
        max_connections = config.database.max_connections,
        accelerate = config.accelerate.enabled,
        "Configuration loaded."
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.acquire_timeout_secs, 5);
        assert!(config.database.run_migrations);
        assert!(!config.database.lazy);
        assert!(config.accelerate.enabled);
        assert_eq!(config.accelerate.max_entries, 10_000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse_config(
            r#"
            [database]
            url = "postgres://app@localhost/app"
            max_connections = 4
            idle_timeout_secs = 30
            lazy = true

            [accelerate]
            default_ttl_secs = 60
            default_swr_secs = 120

            [logging]
            format = "json"
            directory = "logs"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.url.as_deref(), Some("postgres://app@localhost/app"));
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.database.idle_timeout().map(|d| d.as_secs()), Some(30));
        assert!(config.database.lazy);
        assert_eq!(config.accelerate.default_ttl_secs, Some(60));
        assert_eq!(config.accelerate.default_swr_secs, Some(120));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.directory.as_deref(), Some(Path::new("logs")));
    }

    #[test]
    fn invalid_pool_bounds_are_rejected() {
        let err = parse_config("[database]\nmax_connections = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = parse_config("[database]\nmax_connections = 2\nmin_connections = 3\n").unwrap_err();
        assert!(err.to_string().contains("min_connections"));

        let err = parse_config("[accelerate]\nmax_entries = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn loads_from_an_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[accelerate]\nenabled = false").unwrap();

        let config = load_config_from(file.path()).unwrap();
        assert!(!config.accelerate.enabled);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load_config_from(Path::new("/nonexistent/strata.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::LoadError(_)));
    }
}
