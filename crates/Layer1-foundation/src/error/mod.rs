//! Error types for the whiteboard runtime
//!
//! 모든 에러를 중앙에서 관리

use crate::provider::ProviderId;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Whiteboard 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Predicate 관련
    // ========================================================================
    #[error("Malformed predicate '{filter}' at {position}: {reason}")]
    MalformedPredicate {
        filter: String,
        position: usize,
        reason: String,
    },

    // ========================================================================
    // Attribute / Provider 관련
    // ========================================================================
    #[error("Attribute keys '{first}' and '{second}' differ only by case")]
    AttributeKeyConflict { first: String, second: String },

    #[error("Provider already registered: {0}")]
    DuplicateProvider(ProviderId),

    #[error("Provider not found: {0}")]
    ProviderNotFound(ProviderId),

    #[error("Provider could not be retrieved: {0}")]
    NotRetrievable(String),

    #[error("Not an extension type: {0}")]
    NotAnExtensionType(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // 바인딩 관련
    // ========================================================================
    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Closed: {0}")]
    Closed(String),

    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Predicate 파싱 에러 생성 헬퍼
    pub fn malformed(
        filter: impl Into<String>,
        position: usize,
        reason: impl Into<String>,
    ) -> Self {
        Error::MalformedPredicate {
            filter: filter.into(),
            position,
            reason: reason.into(),
        }
    }

    /// Provider 설정 문제로 인한 에러인지 확인
    ///
    /// 이런 에러는 재시도해도 같은 결과이므로 기록만 하고 바인딩을 포기한다.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedPredicate { .. }
                | Error::AttributeKeyConflict { .. }
                | Error::NotAnExtensionType(_)
                | Error::Validation(_)
        )
    }
}
