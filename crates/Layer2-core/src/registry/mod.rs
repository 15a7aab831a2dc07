//! # Capability Registry
//!
//! Provider 저장소와 질의식 구독
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CapabilityRegistry                          │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │  SerialCell<{ providers, subscriptions }>               ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │           │ register / unregister / subscribe(replay)        │
//! │           ▼                                                  │
//! │  ┌──────────────────────┐   ┌──────────────────────┐        │
//! │  │ FilteredSubscription │   │ FilteredSubscription │  ...   │
//! │  │  Predicate + sink    │   │  Predicate + sink    │        │
//! │  └──────────┬───────────┘   └──────────┬───────────┘        │
//! │             ▼ publish / retract         ▼                    │
//! │        ProviderSink                ProviderSink              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 사용 예시
//!
//! ```ignore
//! let registry = CapabilityRegistry::new("announced");
//!
//! let handle = registry.subscribe(
//!     Predicate::parse("(kind=auth)")?,
//!     KeyMatch::Exact,
//!     sink_fn(|provider| {
//!         println!("bound {}", provider);
//!         Ok(publication_fn(|| println!("unbound")))
//!     }),
//! );
//!
//! registry.register(ProviderId(1), Attributes::new().with("kind", "auth"))?;
//! handle.close();
//! ```

mod capability;
mod sink;
mod subscription;

pub use capability::{CapabilityRegistry, RegistryStats, SubscriptionHandle};
pub use sink::{publication_fn, sink_fn, FnPublication, FnSink, NoopPublication, ProviderSink, Publication};
pub use subscription::{FilteredSubscription, SubscriptionId};
