//! Outcome - 등록 시도의 결과 분류
//!
//! 바인딩되지 못한 Provider는 정확히 하나의 [`FailureCategory`]에 기록된다.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 실패 카테고리 (닫힌 열거형)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureCategory {
    /// 같은 이름, 같은 rank를 가진 Provider에게 밀림
    DuplicateName,
    /// 필요한 의존성이 활성 상태가 아님
    RequiredDependencyUnavailable,
    /// 붙을 Application(컨텍스트)이 활성 상태가 아님
    RequiredContextUnavailable,
    /// 호스팅 프레임워크가 인스턴스를 만들지 못함
    ServiceNotRetrievable,
    /// Extension 타입을 선언하지 않음
    NotAnExtensionType,
    /// 속성이 해당 kind에 맞지 않음
    ValidationFailed,
    /// 더 높은 rank의 Provider에게 밀림
    ShadowedByOtherProvider,
    /// 그 외 바인딩 중 발생한 에러
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateName => "duplicate_name",
            Self::RequiredDependencyUnavailable => "required_dependency_unavailable",
            Self::RequiredContextUnavailable => "required_context_unavailable",
            Self::ServiceNotRetrievable => "service_not_retrievable",
            Self::NotAnExtensionType => "not_an_extension_type",
            Self::ValidationFailed => "validation_failed",
            Self::ShadowedByOtherProvider => "shadowed_by_other_provider",
            Self::Unknown => "unknown",
        }
    }

    /// 바인딩 중 발생한 에러를 카테고리로 변환
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::NotRetrievable(_) => Self::ServiceNotRetrievable,
            Error::NotAnExtensionType(_) => Self::NotAnExtensionType,
            e if e.is_configuration_error() => Self::ValidationFailed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
