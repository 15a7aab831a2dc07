//! Scenario - 재생할 생명주기 이벤트 파일

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use whiteboard_foundation::LifecycleEvent;

/// 시나리오 파일 형식
///
/// 이벤트 배열만 있거나, 이름과 이벤트 배열을 가진 객체일 수 있다.
///
/// ```json
/// {"name": "shadowing", "events": [{"event": "added", "id": 1}]}
/// ```
#[derive(Deserialize)]
#[serde(untagged)]
enum ScenarioFile {
    Events(Vec<LifecycleEvent>),
    Named {
        #[serde(default)]
        name: Option<String>,
        events: Vec<LifecycleEvent>,
    },
}

/// 로드된 시나리오
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub events: Vec<LifecycleEvent>,
}

impl Scenario {
    /// 파일에서 로드 (이름이 없으면 파일명)
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let fallback = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("scenario");

        Self::parse(&content, fallback)
            .with_context(|| format!("Invalid scenario {}", path.display()))
    }

    pub fn parse(content: &str, fallback_name: &str) -> anyhow::Result<Self> {
        let scenario = match serde_json::from_str(content)? {
            ScenarioFile::Events(events) => Self {
                name: fallback_name.to_string(),
                events,
            },
            ScenarioFile::Named { name, events } => Self {
                name: name.unwrap_or_else(|| fallback_name.to_string()),
                events,
            },
        };
        Ok(scenario)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whiteboard_foundation::ProviderId;

    #[test]
    fn test_parse_plain_array() {
        let scenario = Scenario::parse(
            r#"[{"event": "added", "id": 1, "attributes": {"whiteboard.name": "svc"}},
                {"event": "removed", "id": 1}]"#,
            "plain",
        )
        .unwrap();

        assert_eq!(scenario.name, "plain");
        assert_eq!(scenario.events.len(), 2);
        assert_eq!(scenario.events[1].id(), ProviderId(1));
    }

    #[test]
    fn test_load_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shadow.json");
        std::fs::write(
            &path,
            r#"{"name": "shadowing", "events": [{"event": "added", "id": 3}]}"#,
        )
        .unwrap();

        let scenario = Scenario::load(&path).unwrap();
        assert_eq!(scenario.name, "shadowing");
        assert_eq!(scenario.events[0].kind(), "added");
    }

    #[test]
    fn test_invalid_scenario_is_error() {
        assert!(Scenario::parse(r#"{"events": 3}"#, "bad").is_err());
    }
}
