//! Provider - 호스팅 프레임워크가 발행한 컴포넌트
//!
//! Provider는 불변 값이다. 속성이 바뀌면 같은 identity를 가진 새 Provider가
//! 제거 후 다시 등록된다.

use crate::attribute::{AttributeValue, Attributes};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// 속성 키
// ============================================================================

/// 논리적 이름
pub const NAME_KEY: &str = "whiteboard.name";
/// 순위 (정수, 없으면 0)
pub const RANK_KEY: &str = "service.ranking";
/// Application 표식 + base 경로
pub const APPLICATION_BASE_KEY: &str = "whiteboard.application.base";
/// Extension 표식
pub const EXTENSION_KEY: &str = "whiteboard.extension";
/// Extension이 제공하는 타입 목록
pub const EXTENSION_TYPES_KEY: &str = "whiteboard.extension.types";
/// Resource 표식
pub const RESOURCE_KEY: &str = "whiteboard.resource";
/// 대상 Application 선택 필터
pub const APPLICATION_SELECT_KEY: &str = "whiteboard.application.select";
/// 필요한 Extension 필터 목록
pub const EXTENSION_SELECT_KEY: &str = "whiteboard.extension.select";
/// 일반 의존성 필터 목록
pub const DEPENDENCIES_KEY: &str = "whiteboard.dependencies";

// ============================================================================
// ProviderId
// ============================================================================

/// 호스팅 프레임워크가 부여한 Provider identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub u64);

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider-{}", self.0)
    }
}

impl From<u64> for ProviderId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ============================================================================
// Provider
// ============================================================================

/// 등록된 Provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provider {
    id: ProviderId,
    attributes: Attributes,
    rank: i32,
    name: String,
    name_generated: bool,
    sequence: u64,
}

impl Provider {
    /// 속성에서 rank와 name을 유도하여 생성
    ///
    /// `sequence`는 Capability Registry가 등록 시점에 부여하는 단조 증가 값이다.
    pub fn new(id: ProviderId, attributes: Attributes, sequence: u64) -> Self {
        let rank = derive_rank(&attributes);
        let (name, name_generated) = match attributes.get(NAME_KEY).and_then(|v| v.as_str()) {
            Some(name) if !name.is_empty() => (name.to_string(), false),
            _ => (generated_name(id), true),
        };

        Self {
            id,
            attributes,
            rank,
            name,
            name_generated,
            sequence,
        }
    }

    pub fn id(&self) -> ProviderId {
        self.id
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn rank(&self) -> i32 {
        self.rank
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 이름이 속성이 아닌 identity에서 생성되었는지
    pub fn is_name_generated(&self) -> bool {
        self.name_generated
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, rank {})", self.name, self.id, self.rank)
    }
}

/// 이름이 없는 Provider용 이름 (identity 기반이라 수정 후에도 같다)
pub fn generated_name(id: ProviderId) -> String {
    format!("provider.{}", id.0)
}

fn derive_rank(attributes: &Attributes) -> i32 {
    attributes
        .get(RANK_KEY)
        .and_then(AttributeValue::as_i64)
        .map(|rank| rank.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
        .unwrap_or(0)
}
