//! Command-line configuration and configuration source loading.
//!
//! Database settings come from an optional configuration file (YAML, TOML or
//! JSON, picked by extension) overlaid by `PGREPO__`-prefixed environment
//! variables, e.g. `PGREPO__DATABASES__DEFAULT__URL`.

use crate::error::PgResult;
use crate::settings::{DEFAULT_DB_ALIAS, Settings};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Prefix of environment variables read as configuration.
pub const ENV_PREFIX: &str = "PGREPO";

/// Separator for nested keys in environment variables.
pub const ENV_SEPARATOR: &str = "__";

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Load the configuration source: the file at `path` if given, then the
/// environment on top of it.
pub fn load_source(path: Option<&Path>) -> PgResult<config::Config> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }
    let source = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        )
        .build()?;
    Ok(source)
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "pgrepo",
    about = "Provision PostgreSQL databases and check connection pools",
    version,
    author
)]
pub struct Config {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, value_name = "FILE", env = "PGREPO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Application name reported to the server
    #[arg(long, env = "PGREPO_APP")]
    pub app: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "PGREPO_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "PGREPO_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Create a database if it does not exist
    Create {
        /// Database name, or "default" for the database of the default URL
        #[arg(default_value = DEFAULT_DB_ALIAS)]
        database: String,
        /// Serialize concurrent provisioners with an advisory lock
        #[arg(long)]
        advisory_lock: bool,
    },
    /// Drop a database if it exists
    Drop {
        #[arg(default_value = DEFAULT_DB_ALIAS)]
        database: String,
        #[arg(long)]
        advisory_lock: bool,
    },
    /// Create a database if needed, then open and check a pool on it
    Ensure {
        #[arg(default_value = DEFAULT_DB_ALIAS)]
        database: String,
    },
    /// Start the pool of a configured alias and run a health check
    Check {
        #[arg(default_value = DEFAULT_DB_ALIAS)]
        alias: String,
    },
    /// Print the effective settings of an alias, credentials masked
    ShowConfig {
        #[arg(default_value = DEFAULT_DB_ALIAS)]
        alias: String,
    },
}

impl Config {
    /// Resolve database settings: package defaults, then the configuration
    /// source, then the `--app` flag.
    pub fn settings(&self) -> PgResult<Settings> {
        let source = load_source(self.config.as_deref())?;
        let mut builder = Settings::builder().source(&source)?;
        if let Some(app) = &self.app {
            builder = builder.app(app);
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use std::time::Duration;

    fn write_config(ext: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(ext).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_defaults() {
        let config = Config::try_parse_from(["pgrepo", "create"]).unwrap();
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
        assert_eq!(
            config.command,
            Command::Create {
                database: DEFAULT_DB_ALIAS.to_string(),
                advisory_lock: false,
            }
        );
    }

    #[test]
    fn test_parse_subcommands() {
        let config =
            Config::try_parse_from(["pgrepo", "--app", "billing", "drop", "orders", "--advisory-lock"]).unwrap();
        assert_eq!(config.app.as_deref(), Some("billing"));
        assert_eq!(
            config.command,
            Command::Drop {
                database: "orders".to_string(),
                advisory_lock: true,
            }
        );

        let config = Config::try_parse_from(["pgrepo", "show-config", "reports"]).unwrap();
        assert_eq!(
            config.command,
            Command::ShowConfig {
                alias: "reports".to_string()
            }
        );
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Config::try_parse_from(["pgrepo"]).is_err());
    }

    #[test]
    #[serial]
    fn test_settings_from_yaml_file() {
        let file = write_config(
            ".yaml",
            r#"
app: inventory
databases:
  default:
    url: postgresql://localhost:5432/inventory
    user: $PGREPO_TEST_USER
pgconfig:
  maxIdleConns: 4
  pingTimeout: 3s
"#,
        );
        let config = Config::try_parse_from([
            "pgrepo",
            "--config",
            file.path().to_str().unwrap(),
            "check",
        ])
        .unwrap();

        let settings = config.settings().unwrap();
        assert_eq!(settings.app.as_deref(), Some("inventory"));
        assert_eq!(settings.pgconfig.max_idle_conns, 4);
        assert_eq!(settings.pgconfig.ping_timeout, Duration::from_secs(3));

        let db = settings.database_settings_for(DEFAULT_DB_ALIAS);
        assert_eq!(db.url, "postgresql://localhost:5432/inventory");
        // expanded at connect time only
        assert_eq!(db.user.as_deref(), Some("$PGREPO_TEST_USER"));
    }

    #[test]
    #[serial]
    fn test_app_flag_overrides_file() {
        let file = write_config(".json", r#"{ "app": "from-file" }"#);
        let config = Config::try_parse_from([
            "pgrepo",
            "--config",
            file.path().to_str().unwrap(),
            "--app",
            "from-flag",
            "check",
        ])
        .unwrap();
        assert_eq!(config.settings().unwrap().app.as_deref(), Some("from-flag"));
    }

    #[test]
    #[serial]
    fn test_missing_file_is_an_error() {
        let err = load_source(Some(Path::new("/nonexistent/pgrepo.yaml"))).unwrap_err();
        assert!(matches!(err, crate::error::PgError::Config { .. }));
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let file = write_config(
            ".toml",
            r#"
[databases.default]
url = "postgresql://localhost:5432/from_file"
"#,
        );
        // SAFETY: environment access is serialized across tests
        unsafe {
            std::env::set_var("PGREPO__DATABASES__DEFAULT__URL", "postgresql://db:5432/from_env");
            std::env::set_var("PGREPO__PGCONFIG__MAXOPENCONNS", "25");
        }

        let settings = Settings::builder()
            .source(&load_source(Some(file.path())).unwrap())
            .unwrap()
            .build();

        unsafe {
            std::env::remove_var("PGREPO__DATABASES__DEFAULT__URL");
            std::env::remove_var("PGREPO__PGCONFIG__MAXOPENCONNS");
        }

        assert_eq!(
            settings.database_settings_for(DEFAULT_DB_ALIAS).url,
            "postgresql://db:5432/from_env"
        );
        assert_eq!(settings.pgconfig.max_open_conns, 25);
    }

    #[test]
    #[serial]
    fn test_no_file_keeps_package_defaults() {
        let settings = Settings::builder()
            .source(&load_source(None).unwrap())
            .unwrap()
            .build();
        assert_eq!(settings, Settings::default());
    }
}
