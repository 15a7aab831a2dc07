//! Whiteboard Config - 통합 설정
//!
//! 글로벌 설정 파일과 명시적으로 지정한 파일을 병합한다.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 설정 파일명
pub const WHITEBOARD_CONFIG_FILE: &str = "config.json";

// ============================================================================
// Whiteboard Config (통합)
// ============================================================================

/// Whiteboard 인스턴스 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhiteboardConfig {
    /// 인스턴스 이름 (로그/스냅샷 표시용)
    #[serde(default = "default_name")]
    pub name: String,

    /// 기본 Application 설정
    #[serde(default)]
    pub default_application: DefaultApplicationConfig,

    /// 상태 변경 브로드캐스트 채널 용량
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// 보관할 상태 변경 히스토리 개수
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for WhiteboardConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            default_application: DefaultApplicationConfig::default(),
            event_capacity: default_event_capacity(),
            history_size: default_history_size(),
        }
    }
}

impl WhiteboardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// 글로벌 설정 로드 (없으면 기본값)
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        if let Some(path) = Self::global_path() {
            if path.exists() {
                debug!(path = %path.display(), "Loading global whiteboard config");
                config.merge(Self::load_from(&path)?);
            }
        }

        Ok(config)
    }

    /// 파일에서 로드 (확장자로 JSON / TOML 구분)
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") | None => serde_json::from_str(&content)?,
            Some(other) => {
                return Err(Error::Config(format!(
                    "Unsupported config format '{}': {}",
                    other,
                    path.display()
                )))
            }
        };

        Ok(config)
    }

    /// 글로벌 설정 파일 경로 (<config_dir>/whiteboard/config.json)
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("whiteboard").join(WHITEBOARD_CONFIG_FILE))
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::Config("eventCapacity must be greater than 0".into()));
        }
        if self.default_application.enabled && self.default_application.name.is_empty() {
            return Err(Error::Config("defaultApplication.name must not be empty".into()));
        }
        Ok(())
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// 다른 설정과 병합 (other가 우선)
    pub fn merge(&mut self, other: WhiteboardConfig) {
        if other.name != default_name() {
            self.name = other.name;
        }
        if other.event_capacity != default_event_capacity() {
            self.event_capacity = other.event_capacity;
        }
        if other.history_size != default_history_size() {
            self.history_size = other.history_size;
        }
        self.default_application.merge(other.default_application);
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn without_default_application(mut self) -> Self {
        self.default_application.enabled = false;
        self
    }
}

// ============================================================================
// Default Application Config
// ============================================================================

/// 내장 기본 Application 설정
///
/// 선택 필터가 없는 Extension/Resource는 이 이름의 Application에 붙는다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultApplicationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_application_name")]
    pub name: String,

    #[serde(default = "default_application_base")]
    pub base: String,
}

impl Default for DefaultApplicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: default_application_name(),
            base: default_application_base(),
        }
    }
}

impl DefaultApplicationConfig {
    fn merge(&mut self, other: DefaultApplicationConfig) {
        self.enabled = other.enabled;
        if other.name != default_application_name() {
            self.name = other.name;
        }
        if other.base != default_application_base() {
            self.base = other.base;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn default_name() -> String {
    "default".to_string()
}

fn default_event_capacity() -> usize {
    256
}

fn default_history_size() -> usize {
    100
}

fn default_application_name() -> String {
    ".default".to_string()
}

fn default_application_base() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = WhiteboardConfig::new();
        assert_eq!(config.name, "default");
        assert!(config.default_application.enabled);
        assert_eq!(config.default_application.name, ".default");
        assert_eq!(config.event_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_merge() {
        let mut base = WhiteboardConfig::new().name("edge");

        let overlay = WhiteboardConfig {
            history_size: 10,
            ..WhiteboardConfig::new()
        };
        base.merge(overlay);

        assert_eq!(base.name, "edge");
        assert_eq!(base.history_size, 10);
    }

    #[test]
    fn test_load_json_and_toml() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("wb.json");
        let mut file = std::fs::File::create(&json_path).unwrap();
        write!(
            file,
            r#"{{"name": "json", "defaultApplication": {{"enabled": false}}}}"#
        )
        .unwrap();

        let config = WhiteboardConfig::load_from(&json_path).unwrap();
        assert_eq!(config.name, "json");
        assert!(!config.default_application.enabled);
        assert_eq!(config.default_application.base, "/");

        let toml_path = dir.path().join("wb.toml");
        std::fs::write(&toml_path, "name = \"toml\"\neventCapacity = 16\n").unwrap();

        let config = WhiteboardConfig::load_from(&toml_path).unwrap();
        assert_eq!(config.name, "toml");
        assert_eq!(config.event_capacity, 16);
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wb.yaml");
        std::fs::write(&path, "name: x").unwrap();

        assert!(matches!(
            WhiteboardConfig::load_from(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_validate() {
        let config = WhiteboardConfig {
            event_capacity: 0,
            ..WhiteboardConfig::new()
        };
        assert!(config.validate().is_err());
    }
}
