//! Link Configuration Loading
//!
//! Loads channel and server settings from TOML files. `from_file` parses a
//! single file; `load` layers a base file, an optional environment file and
//! `LINK__`-prefixed environment variables.

use crate::error::{ConfigError, Result};
use crate::settings::{ChannelSettings, GlobalSettings, ServerSettings};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Prefix for environment variable overrides, e.g. `LINK__GLOBAL__LOG_LEVEL=debug`
pub const ENV_PREFIX: &str = "LINK";

/// Default location of the base configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/link.toml";

/// Complete configuration for a process hosting channels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub global: GlobalSettings,
    /// Client channels by name
    pub channels: HashMap<String, ChannelSettings>,
    /// Server channels by name
    pub servers: HashMap<String, ServerSettings>,
}

impl LinkConfig {
    /// Load configuration from a single TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        debug!(
            path = %path.display(),
            channels = config.channels.len(),
            servers = config.servers.len(),
            "Loaded link configuration"
        );
        Ok(config)
    }

    /// Load a base file, an optional environment overlay and environment variables
    ///
    /// Key names pass through the `config` crate, which lower-cases them.
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));

        let mut builder = Config::builder().add_source(File::from(base).required(true));

        if let Some(env) = environment {
            let env_file = base
                .parent()
                .unwrap_or(Path::new("."))
                .join("environments")
                .join(format!("{env}.toml"));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every channel and server section
    pub fn validate(&self) -> Result<()> {
        for (name, channel) in &self.channels {
            channel.validate(&format!("channels.{name}"))?;
        }
        for (name, server) in &self.servers {
            server.validate(&format!("servers.{name}"))?;
        }
        Ok(())
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSettings> {
        self.channels.get(name)
    }

    pub fn server(&self, name: &str) -> Option<&ServerSettings> {
        self.servers.get(name)
    }

    /// Expand `$VAR` / `${VAR}` references in endpoints
    pub fn expand_env_vars(&mut self) -> Result<()> {
        for channel in self.channels.values_mut() {
            if let Some(remote) = &channel.remote {
                channel.remote = Some(expand(remote)?);
            }
        }
        for server in self.servers.values_mut() {
            server.bind = expand(&server.bind)?;
        }
        Ok(())
    }
}

fn expand(value: &str) -> Result<String> {
    shellexpand::env(value)
        .map(|expanded| expanded.into_owned())
        .map_err(|e| ConfigError::Expansion {
            value: value.to_string(),
            message: e.to_string(),
        })
}

/// Convenience function: load from `path` (or the default location) and expand endpoints
pub fn load_config(path: Option<PathBuf>, environment: Option<&str>) -> Result<LinkConfig> {
    let mut config = LinkConfig::load(path.as_deref(), environment)?;
    config.expand_env_vars()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ByteOrderSetting, HeaderKind};
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[global]
log_level = "debug"

[channels.acquirer]
remote = "127.0.0.1:7001"
address = "acquirer-1"
reconnect = { enabled = true, floor_ms = 250, ceiling_ms = 8000 }
header = { kind = "binary", width = 2, byte_order = "little_endian" }

[servers.issuer]
bind = "0.0.0.0:7002"
max_connections = 16
header = { kind = "ascii", width = 4 }
tuple_space_context = "issuer"
delivery_ttl_ms = 60000
"#;

    #[test]
    fn test_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("link.toml");
        fs::write(&path, SAMPLE).unwrap();

        let config = LinkConfig::from_file(&path).unwrap();
        assert_eq!(config.global.log_level, "debug");

        let acquirer = config.channel("acquirer").unwrap();
        assert_eq!(acquirer.remote.as_deref(), Some("127.0.0.1:7001"));
        assert_eq!(acquirer.address.as_deref(), Some("acquirer-1"));
        assert!(acquirer.reconnect.enabled);
        assert_eq!(acquirer.reconnect.ceiling_ms, 8000);
        assert_eq!(acquirer.header.width, 2);
        assert_eq!(acquirer.header.byte_order, ByteOrderSetting::LittleEndian);

        let issuer = config.server("issuer").unwrap();
        assert_eq!(issuer.max_connections, Some(16));
        assert_eq!(issuer.header.kind, HeaderKind::Ascii);
        assert_eq!(issuer.tuple_space_context, "issuer");
        assert_eq!(
            issuer.delivery_ttl(),
            Some(std::time::Duration::from_secs(60))
        );
    }

    #[test]
    fn test_from_file_rejects_invalid_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(
            &path,
            r#"
[channels.broken]
header = { kind = "binary", width = 8 }
"#,
        )
        .unwrap();

        let err = LinkConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "channels.broken.header.width"));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = LinkConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_with_environment_overlay() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("link.toml");
        fs::write(&base, SAMPLE).unwrap();

        let env_dir = dir.path().join("environments");
        fs::create_dir(&env_dir).unwrap();
        fs::write(
            env_dir.join("staging.toml"),
            r#"
[servers.issuer]
bind = "127.0.0.1:9902"
"#,
        )
        .unwrap();

        let config = LinkConfig::load(Some(&base), Some("staging")).unwrap();
        let issuer = config.server("issuer").unwrap();
        assert_eq!(issuer.bind, "127.0.0.1:9902");
        assert_eq!(issuer.max_connections, Some(16));
    }

    #[test]
    fn test_expand_env_vars_in_endpoints() {
        std::env::set_var("LINK_TEST_ISSUER_HOST", "10.1.2.3");
        let mut config = LinkConfig::default();
        config.servers.insert(
            "issuer".to_string(),
            ServerSettings {
                bind: "${LINK_TEST_ISSUER_HOST}:7002".to_string(),
                ..Default::default()
            },
        );

        config.expand_env_vars().unwrap();
        assert_eq!(config.server("issuer").unwrap().bind, "10.1.2.3:7002");
    }
}
