//! # whiteboard-foundation
//!
//! Foundation layer for the whiteboard runtime:
//! - Attribute: Provider 속성 맵 (문자열/숫자/불리언/배열)
//! - Provider: 불변 Provider 값 (identity, rank, name, sequence)
//! - Predicate: LDAP 스타일 질의식 파서 + 매처
//! - Outcome: 실패 카테고리
//! - Event: 호스팅 프레임워크 생명주기 이벤트
//! - Config: 통합 설정 (WhiteboardConfig)
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  LifecycleEvent (added / modified / removed)            │
//! │                     │                                   │
//! │                     ▼                                   │
//! │   Provider { id, Attributes, rank, name, sequence }     │
//! │                     │                                   │
//! │          ┌─────────┴─────────┐                         │
//! │          ▼                   ▼                         │
//! │   Predicate::matches   FailureCategory                 │
//! │   (Exact / IgnoreCase)  (outcome records)              │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod attribute;
pub mod config;
pub mod error;
pub mod event;
pub mod outcome;
pub mod predicate;
pub mod provider;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Attribute / Provider
// ============================================================================
pub use attribute::{AttributeValue, Attributes};
pub use provider::{
    generated_name,
    Provider,
    ProviderId,
    // 속성 키
    APPLICATION_BASE_KEY,
    APPLICATION_SELECT_KEY,
    DEPENDENCIES_KEY,
    EXTENSION_KEY,
    EXTENSION_SELECT_KEY,
    EXTENSION_TYPES_KEY,
    NAME_KEY,
    RANK_KEY,
    RESOURCE_KEY,
};

// ============================================================================
// Predicate (질의식)
// ============================================================================
pub use predicate::{Comparison, KeyMatch, Predicate};

// ============================================================================
// Outcome / Event
// ============================================================================
pub use event::LifecycleEvent;
pub use outcome::FailureCategory;

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{DefaultApplicationConfig, WhiteboardConfig, WHITEBOARD_CONFIG_FILE};
