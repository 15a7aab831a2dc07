//! Event Types - 생명주기 이벤트 정의

use crate::attribute::Attributes;
use crate::provider::ProviderId;
use serde::{Deserialize, Serialize};

// ============================================================================
// LifecycleEvent
// ============================================================================

/// Provider 생명주기 이벤트
///
/// JSON 표현:
///
/// ```json
/// {"event": "added", "id": 7, "attributes": {"whiteboard.name": "svc"}}
/// {"event": "modified", "id": 7, "attributes": {"whiteboard.name": "svc2"}}
/// {"event": "removed", "id": 7}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// 새 Provider 발행
    Added {
        id: ProviderId,
        #[serde(default)]
        attributes: Attributes,
    },
    /// 속성 변경 (내부적으로 제거 후 추가)
    Modified {
        id: ProviderId,
        #[serde(default)]
        attributes: Attributes,
    },
    /// Provider 철회
    Removed { id: ProviderId },
}

impl LifecycleEvent {
    /// 대상 Provider identity
    pub fn id(&self) -> ProviderId {
        match self {
            Self::Added { id, .. } | Self::Modified { id, .. } | Self::Removed { id } => *id,
        }
    }

    /// 이벤트 종류 문자열
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Modified { .. } => "modified",
            Self::Removed { .. } => "removed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeValue;

    #[test]
    fn test_lifecycle_event_json() {
        let events: Vec<LifecycleEvent> = serde_json::from_str(
            r#"[
                {"event": "added", "id": 1, "attributes": {"whiteboard.name": "svc", "service.ranking": 5}},
                {"event": "modified", "id": 1},
                {"event": "removed", "id": 1}
            ]"#,
        )
        .unwrap();

        assert_eq!(events.len(), 3);
        match &events[0] {
            LifecycleEvent::Added { id, attributes } => {
                assert_eq!(*id, ProviderId(1));
                assert_eq!(attributes.get("service.ranking"), Some(&AttributeValue::Integer(5)));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(events[1].kind(), "modified");
        assert_eq!(events[2].id(), ProviderId(1));
    }
}
