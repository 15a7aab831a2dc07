//! whiteboard-core: Dynamic capability runtime
//!
//! Layer2 - Provider 바인딩 결정 레이어
//!
//! # 주요 모듈
//!
//! - `registry`: Capability Registry + Filtered Subscription
//! - `router`: Rank Router (이름별 단일 승자)
//! - `gate`: Dependency Gate (요구사항 체인)
//! - `state`: Runtime State 집계 + 스냅샷
//! - `endpoint`: 외부 엔드포인트 빌더 경계
//! - `whiteboard`: 위 구성요소를 엮는 오케스트레이터
//!
//! # 사용 예시
//!
//! ```ignore
//! use whiteboard_core::{LoggingEndpointBuilder, Whiteboard};
//! use whiteboard_foundation::{Attributes, ProviderId, WhiteboardConfig};
//!
//! let whiteboard = Whiteboard::new(
//!     WhiteboardConfig::default(),
//!     Arc::new(LoggingEndpointBuilder::new()),
//! )?;
//!
//! // 이름이 같으면 rank가 높은 쪽만 바인딩된다
//! whiteboard.on_provider_added(ProviderId(1), Attributes::new().with("whiteboard.name", "svc"))?;
//! whiteboard.on_provider_added(
//!     ProviderId(2),
//!     Attributes::new().with("whiteboard.name", "svc").with("service.ranking", 5),
//! )?;
//!
//! let snapshot = whiteboard.snapshot();
//! println!("{}", serde_json::to_string_pretty(&snapshot)?);
//! ```

mod dispatch;

// Core modules
pub mod endpoint;
pub mod gate;
pub mod registry;
pub mod router;
pub mod state;
pub mod whiteboard;

// Re-exports: Registry
pub use registry::{
    publication_fn, sink_fn, CapabilityRegistry, FilteredSubscription, NoopPublication,
    ProviderSink, Publication, RegistryStats, SubscriptionHandle, SubscriptionId,
};

// Re-exports: Router / Gate
pub use gate::{DependencyGate, GateTarget, Requirement, RequirementKind};
pub use router::{RankRouter, RouterSink};

// Re-exports: State
pub use state::{FailureSummary, Outcome, ProviderSummary, RuntimeState, Snapshot, StateChange};

// Re-exports: Endpoint / Orchestrator
pub use endpoint::{BindRequest, EndpointBuilder, EndpointHandle, LoggingEndpointBuilder};
pub use whiteboard::{ProviderKind, Whiteboard, DEFAULT_APPLICATION_ID};
