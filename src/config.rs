use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Knobs for one compilation session.
///
/// Every field has a default, so a TOML file only needs the keys it wants to
/// change:
///
/// ```toml
/// module_name = "Game"
/// eliminate_dead_code = false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Name of the class holding top-level functions and the implicit main.
    pub module_name: String,
    /// Keep comments as tokens (token dumps only; the parser skips them).
    pub preserve_comments: bool,
    pub fold_constants: bool,
    pub eliminate_dead_code: bool,
    /// Run slot allocation as a pass. When off, the generator allocates slots
    /// itself.
    pub annotate_slots: bool,
    /// Resolve `print`/`println` against the builtin fallback.
    pub builtins: bool,
    pub version_major: u16,
    pub version_minor: u16,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            module_name: "Main".to_string(),
            preserve_comments: false,
            fold_constants: true,
            eliminate_dead_code: true,
            annotate_slots: true,
            builtins: true,
            version_major: 1,
            version_minor: 0,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl CompilerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CompilerConfig::from_toml_str("module_name = \"Game\"\nfold_constants = false\n")
            .expect("valid config");
        assert_eq!(config.module_name, "Game");
        assert!(!config.fold_constants);
        assert!(config.eliminate_dead_code);
        assert_eq!(config.version_major, 1);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = CompilerConfig::from_toml_str("optimise = true").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = CompilerConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("not/here.toml"));
    }
}
