//! Configuration for maestro paths and engine defaults.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MAESTRO_HOME)
//! 2. Config file (.maestro/config.yaml)
//! 3. Defaults (~/.maestro)
//!
//! Config file discovery searches the current directory and parents for
//! .maestro/config.yaml; paths in the file are relative to its parent.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub engine: Option<EngineConfig>,
    /// Subprocess executors available to tasks
    #[serde(default)]
    pub executors: Vec<ExecutorDef>,
}

/// One configured subprocess executor
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorDef {
    /// Name tasks reference via `executor:`
    pub name: String,
    /// Binary to spawn
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to config file)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub default_task_timeout_ms: Option<u64>,
    pub criteria_ttl_seconds: Option<u64>,
    pub review_retry_limit: Option<u32>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to maestro home (engine state)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Engine settings
    pub engine: EngineSettings,
    /// Configured subprocess executors
    pub executors: Vec<ExecutorDef>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Default per-task timeout applied when a request omits one
    pub default_task_timeout_ms: u64,
    /// Criteria cache TTL
    pub criteria_ttl_seconds: u64,
    /// Orchestration-level retry ceiling after review rejections
    pub review_retry_limit: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_task_timeout_ms: 30_000,
            criteria_ttl_seconds: 60,
            review_retry_limit: 1,
        }
    }
}

impl EngineSettings {
    pub fn criteria_ttl(&self) -> Duration {
        Duration::from_secs(self.criteria_ttl_seconds)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".maestro").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".maestro");

    let config_file = find_config_file();

    let (home, engine, executors) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        let home = if let Ok(env_home) = std::env::var("MAESTRO_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            // home is relative to the .maestro/ directory
            let maestro_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(maestro_dir, home_path)
        } else {
            default_home.clone()
        };

        let defaults = EngineSettings::default();
        let engine = EngineSettings {
            default_task_timeout_ms: config
                .engine
                .as_ref()
                .and_then(|e| e.default_task_timeout_ms)
                .unwrap_or(defaults.default_task_timeout_ms),
            criteria_ttl_seconds: config
                .engine
                .as_ref()
                .and_then(|e| e.criteria_ttl_seconds)
                .unwrap_or(defaults.criteria_ttl_seconds),
            review_retry_limit: config
                .engine
                .as_ref()
                .and_then(|e| e.review_retry_limit)
                .unwrap_or(defaults.review_retry_limit),
        };

        (home, engine, config.executors)
    } else {
        let home = std::env::var("MAESTRO_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        (home, EngineSettings::default(), Vec::new())
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        engine,
        executors,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the maestro home directory (engine state).
pub fn maestro_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the orchestrations directory ($MAESTRO_HOME/orchestrations)
pub fn orchestrations_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("orchestrations"))
}

/// Get the criteria directory ($MAESTRO_HOME/criteria)
pub fn criteria_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("criteria"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let maestro_dir = temp.path().join(".maestro");
        std::fs::create_dir_all(&maestro_dir).unwrap();

        let config_path = maestro_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
engine:
  default_task_timeout_ms: 10000
  criteria_ttl_seconds: 30
  review_retry_limit: 2
executors:
  - name: summarize
    command: fabric
    args: ["-p", "summarize"]
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./".to_string()));
        let engine = config.engine.unwrap();
        assert_eq!(engine.default_task_timeout_ms, Some(10_000));
        assert_eq!(engine.criteria_ttl_seconds, Some(30));
        assert_eq!(engine.review_retry_limit, Some(2));
        assert_eq!(config.executors.len(), 1);
        assert_eq!(config.executors[0].name, "summarize");
        assert_eq!(config.executors[0].args, vec!["-p", "summarize"]);
    }

    #[test]
    fn test_default_engine_settings() {
        let settings = EngineSettings::default();
        assert_eq!(settings.default_task_timeout_ms, 30_000);
        assert_eq!(settings.criteria_ttl(), Duration::from_secs(60));
        assert_eq!(settings.review_retry_limit, 1);
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        // Relative paths that do not exist keep the joined form
        assert_eq!(
            resolve_path(&base, "state"),
            PathBuf::from("/home/user/project/state")
        );
    }
}
