//! Configuration loading and root folder resolution
//!
//! Both services read one TOML file. Each service deserializes only the
//! sections it cares about into its own config struct, so this module stays
//! generic: it locates the file, loads it with defaults for anything missing,
//! resolves the root folder and knows the layout underneath it.
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `CDRC_ROOT_FOLDER` environment variable
//! 3. `root_folder` key in the TOML file
//! 4. OS-dependent default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "CDRC_ROOT_FOLDER";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "CDRC_CONFIG";

const CONFIG_FILE_NAME: &str = "cdrc.toml";

/// Logging configuration, shared by both services
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stdout only if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Default config file: `<os config dir>/cdrc/cdrc.toml`, or `./cdrc.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("cdrc").join(CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

/// Load a TOML config file into `T`
///
/// A missing file is not an error: every service config carries serde
/// defaults, so `T::default()` is a working configuration. A file that exists
/// but does not parse is reported as [`Error::Config`].
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        debug!(path = %path.display(), "Config file not found, using defaults");
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str::<T>(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Serialize `config` and write it atomically to `path`
pub fn write_toml_config<T: Serialize>(path: &Path, config: &T) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    atomic_write(path, content.as_bytes())
}

/// Write `contents` to a sibling temp file, then rename it over `path`
///
/// Readers see either the previous contents or the new ones, never a
/// truncated file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", path.display())))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolve the root folder following the documented priority order
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_root: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_root {
        return path.to_path_buf();
    }

    default_root_folder()
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cdrc"))
        .unwrap_or_else(|| PathBuf::from("./cdrc_data"))
}

/// Layout of everything stored under the root folder
#[derive(Debug, Clone)]
pub struct RootFolder {
    root: PathBuf,
}

impl RootFolder {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the root folder and the directories both services write into
    pub fn ensure_directory_exists(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.raws_dir(),
            self.reports_dir(),
            self.clustering_dir(),
        ] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                info!(path = %dir.display(), "Created directory");
            }
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join("cdrc.db")
    }

    /// Reassembled raw coredumps
    pub fn raws_dir(&self) -> PathBuf {
        self.root.join("coredumps").join("raws")
    }

    /// Decoded text reports
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("coredumps").join("reports")
    }

    pub fn clustering_dir(&self) -> PathBuf {
        self.root.join("clustering")
    }

    /// Scratch directory holding the corpus snapshot during a clustering run
    pub fn processing_dir(&self) -> PathBuf {
        self.clustering_dir().join("processing")
    }

    /// Last successful clustering run timestamp
    pub fn trigger_state_path(&self) -> PathBuf {
        self.clustering_dir().join("state.txt")
    }

    /// Label CSV produced by the external clusterer
    pub fn cluster_output_path(&self) -> PathBuf {
        self.clustering_dir().join("clusters.csv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
    struct SampleConfig {
        #[serde(default)]
        root_folder: Option<PathBuf>,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_missing_config_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config: SampleConfig = load_toml_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.root_folder, None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_malformed_config_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "root_folder = [unterminated").unwrap();

        let result: Result<SampleConfig> = load_toml_config(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_write_then_load_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cdrc.toml");
        let config = SampleConfig {
            root_folder: Some(PathBuf::from("/srv/cdrc")),
            logging: LoggingConfig {
                level: "debug".to_string(),
                file: None,
            },
        };

        write_toml_config(&path, &config).unwrap();
        let loaded: SampleConfig = load_toml_config(&path).unwrap();

        assert_eq!(loaded, config);
        assert!(!path.with_file_name("cdrc.toml.tmp").exists());
    }

    #[test]
    fn test_atomic_write_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.txt");

        atomic_write(&path, b"1.5").unwrap();
        atomic_write(&path, b"2.5").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "2.5");
    }

    #[test]
    #[serial]
    fn test_root_folder_priority() {
        std::env::set_var(ROOT_FOLDER_ENV, "/from/env");

        let cli = resolve_root_folder(Some(Path::new("/from/cli")), Some(Path::new("/from/toml")));
        assert_eq!(cli, PathBuf::from("/from/cli"));

        let env = resolve_root_folder(None, Some(Path::new("/from/toml")));
        assert_eq!(env, PathBuf::from("/from/env"));

        std::env::remove_var(ROOT_FOLDER_ENV);

        let toml_root = resolve_root_folder(None, Some(Path::new("/from/toml")));
        assert_eq!(toml_root, PathBuf::from("/from/toml"));

        let fallback = resolve_root_folder(None, None);
        assert!(fallback.ends_with("cdrc") || fallback.ends_with("cdrc_data"));
    }

    #[test]
    fn test_root_folder_layout_created() {
        let dir = TempDir::new().unwrap();
        let root = RootFolder::new(dir.path().join("root"));
        root.ensure_directory_exists().unwrap();

        assert!(root.raws_dir().is_dir());
        assert!(root.reports_dir().is_dir());
        assert!(root.clustering_dir().is_dir());
        assert_eq!(root.database_path(), dir.path().join("root").join("cdrc.db"));
    }
}
