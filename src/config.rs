use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_error, HotloadError, HotloadResult};

/// Bounded exponential backoff for reads that may hit editor file locks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 1_000,
        }
    }
}

/// Hotload configuration, usually read from `hotload.toml`.
/// Relative paths resolve against `project_root`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotloadConfig {
    pub project_root: PathBuf,
    pub source_dir: PathBuf,
    pub descriptor: PathBuf,
    /// Cargo target directory; `target/hotload` below the project when unset
    pub target_dir: Option<PathBuf>,
    /// Where loaded images are shadow-copied; a temp dir when unset
    pub shadow_dir: Option<PathBuf>,
    pub debounce_ms: u64,
    pub references: Vec<PathBuf>,
    pub release: bool,
    pub retry: RetryPolicy,
}

impl Default for HotloadConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            source_dir: PathBuf::from("src"),
            descriptor: PathBuf::from("Cargo.toml"),
            target_dir: None,
            shadow_dir: None,
            debounce_ms: 100,
            references: Vec::new(),
            release: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl HotloadConfig {
    pub fn load(path: impl AsRef<Path>) -> HotloadResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        let mut config = Self::from_toml_str(&text)?;

        // A relative project root is relative to the config file
        if config.project_root.is_relative() {
            if let Some(dir) = path.parent() {
                config.project_root = dir.join(&config.project_root);
            }
        }
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> HotloadResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| HotloadError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> HotloadResult<()> {
        if self.retry.attempts == 0 {
            return Err(HotloadError::InvalidConfig("retry.attempts must be at least 1".to_string()));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(HotloadError::InvalidConfig(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    pub fn source_root(&self) -> PathBuf {
        self.resolve(&self.source_dir)
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.resolve(&self.descriptor)
    }

    pub fn target_dir_path(&self) -> PathBuf {
        match &self.target_dir {
            Some(dir) => self.resolve(dir),
            None => self.project_root.join("target").join("hotload"),
        }
    }

    pub fn shadow_dir_path(&self) -> Option<PathBuf> {
        self.shadow_dir.as_deref().map(|dir| self.resolve(dir))
    }

    pub fn reference_paths(&self) -> Vec<PathBuf> {
        self.references.iter().map(|r| self.resolve(r)).collect()
    }

    pub fn debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HotloadConfig::from_toml_str("").unwrap();
        assert_eq!(config, HotloadConfig::default());
        assert_eq!(config.debounce_ms, 100);
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.source_root(), PathBuf::from("./src"));
    }

    #[test]
    fn test_partial_override() {
        let config = HotloadConfig::from_toml_str(
            r#"
            project_root = "/work/game"
            debounce_ms = 250
            references = ["deps", "/opt/engine/lib"]

            [retry]
            attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.initial_backoff_ms, 50);
        assert_eq!(
            config.reference_paths(),
            vec![PathBuf::from("/work/game/deps"), PathBuf::from("/opt/engine/lib")]
        );
        assert_eq!(config.target_dir_path(), PathBuf::from("/work/game/target/hotload"));
    }

    #[test]
    fn test_invalid_retry_rejected() {
        let result = HotloadConfig::from_toml_str("[retry]\nattempts = 0\n");
        assert!(matches!(result, Err(HotloadError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_resolves_root_against_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("hotload.toml");
        fs::write(&path, "project_root = \"game\"\n").unwrap();

        let config = HotloadConfig::load(&path).unwrap();
        assert_eq!(config.descriptor_path(), temp_dir.path().join("game").join("Cargo.toml"));
    }
}
