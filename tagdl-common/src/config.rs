//! Configuration loading and root folder resolution
//!
//! Bootstrap priority for every setting handled here:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "TAGDL_ROOT_FOLDER";

/// Environment variable overriding the config file location
pub const CONFIG_FILE_ENV: &str = "TAGDL_CONFIG";

/// Subdirectory holding request-scoped temp resources
pub const TEMP_SUBDIR: &str = "tmp";

/// Subdirectory holding materialized artifacts awaiting retrieval
pub const ARTIFACTS_SUBDIR: &str = "artifacts";

/// Compiled defaults used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Bootstrap fields every service reads from its TOML file.
///
/// Services deserialize their own richer config from the same file; unknown
/// keys are ignored here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resolves the service root folder following the bootstrap priority order
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    config_file: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            config_file: None,
        }
    }

    /// Root folder given on the command line
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Explicit config file to consult instead of the platform default
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        // Priority 3: TOML config file
        let config_path = self
            .config_file
            .clone()
            .or_else(|| default_config_path(&self.module_name));
        if let Some(config_path) = config_path {
            match load_toml_config::<TomlConfig>(&config_path) {
                Ok(Some(TomlConfig {
                    root_folder: Some(root),
                    ..
                })) => return root,
                Ok(_) => {}
                Err(e) => warn!("Ignoring config file for root folder resolution: {}", e),
            }
        }

        // Priority 4: OS-dependent compiled default
        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder layout a service needs
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root_folder.join(TEMP_SUBDIR)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root_folder.join(ARTIFACTS_SUBDIR)
    }

    /// Create root, temp and artifact directories if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        for dir in [self.root_folder.clone(), self.temp_dir(), self.artifacts_dir()] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir).map_err(|e| {
                    Error::Config(format!("Failed to create {}: {}", dir.display(), e))
                })?;
                info!("Created directory: {}", dir.display());
            }
        }
        Ok(())
    }
}

/// Resolve the config file path: explicit path > `TAGDL_CONFIG` > platform default
pub fn resolve_config_path(module_name: &str, explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit
        .or_else(|| std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from))
        .or_else(|| default_config_path(module_name))
}

/// Platform default config file, e.g. `~/.config/tagdl/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tagdl").join(format!("{}.toml", module_name)))
}

/// Load and deserialize a TOML file.
///
/// A missing file is not an error (`Ok(None)`), so a service starts on
/// defaults. A file that exists but does not parse is.
pub fn load_toml_config<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::Config(format!(
                "Read TOML failed ({}): {}",
                path.display(),
                e
            )))
        }
    };

    let parsed = toml::from_str(&content)?;
    Ok(Some(parsed))
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/tagdl (or /var/lib/tagdl for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("tagdl"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/tagdl"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("tagdl"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/tagdl"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("tagdl"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\tagdl"))
    } else {
        PathBuf::from("./tagdl_data")
    }
}
