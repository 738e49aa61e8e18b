//! 引擎配置
//!
//! JSON 文件中缺省的字段取默认值，例如只写 `{"editor": {"join_tolerance": 8}}` 即可。

use crate::editor::EditorConfig;
use crate::error::Result;
use crate::formula::FormulaConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub editor: EditorConfig,
    pub formula: FormulaConfig,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        tracing::info!(path = %path.display(), "loaded engine config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TakeoffError;
    use std::io::Write;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{"editor": {"join_tolerance": 8.0}}"#).unwrap();
        assert_eq!(config.editor.join_tolerance, 8.0);
        assert_eq!(config.editor.split_endpoint_margin, 1.0);
        assert_eq!(config.formula, FormulaConfig::default());
    }

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(
            EngineConfig::from_json_str("{}").unwrap(),
            EngineConfig::default()
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"formula": {{"max_depth": 8}}}}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.formula.max_depth, 8);
        assert_eq!(config.formula.max_length, 2000);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, TakeoffError::Io(_)));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(TakeoffError::Json(_))
        ));
    }
}
