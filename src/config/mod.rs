//! Loads and validates `mcvisor.json`: read the file, writing a default one
//! in its place first if it doesn't exist yet, then validate.

pub mod model;
pub mod resolve;
pub mod validate;

use std::path::{Path, PathBuf};

pub use model::McvisorConfig;
pub use validate::ConfigDiagnostic;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("writing default config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing config: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("config at {path} failed validation")]
    Invalid {
        path: PathBuf,
        diagnostics: Vec<ConfigDiagnostic>,
    },
}

/// Loaded config plus enough bookkeeping to write it back or attach source
/// spans to future diagnostics.
pub struct LoadedConfig {
    pub config: McvisorConfig,
    pub path: PathBuf,
    pub source: String,
}

/// Load (or bootstrap) the config at `path`: if the file is missing, a
/// minimal document is written in its place first. The loaded document is
/// then default-filled and validated.
pub fn load_config(path: &Path) -> Result<LoadedConfig, ConfigError> {
    if !path.exists() {
        write_default(path)?;
    }

    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut config: McvisorConfig =
        serde_json::from_str(&source).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
    config.apply_defaults(config_dir);

    if let Err(diagnostics) = validate::validate(&config, &source, &path.to_string_lossy()) {
        return Err(ConfigError::Invalid {
            path: path.to_path_buf(),
            diagnostics,
        });
    }

    Ok(LoadedConfig {
        config,
        path: path.to_path_buf(),
        source,
    })
}

fn write_default(path: &Path) -> Result<(), ConfigError> {
    let default = McvisorConfig {
        minecraft: model::MinecraftConfig {
            server: model::ServerConfig {
                working_dir: PathBuf::new(),
                jar: PathBuf::from("server.jar"),
                options: Vec::new(),
                network: model::NetworkConfig::default(),
            },
            java: model::JavaConfig::default(),
            autostart: true,
        },
        discord: model::DiscordConfig::default(),
        logging: model::LoggingConfig::default(),
    };
    let content = serde_json::to_string_pretty(&default).map_err(ConfigError::Serialize)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    std::fs::write(path, content).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}
