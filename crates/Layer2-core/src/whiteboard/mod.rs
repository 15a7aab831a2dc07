//! # Whiteboard
//!
//! 호스팅 프레임워크의 생명주기 이벤트를 받아 구성요소를 엮는 오케스트레이터
//!
//! ## 아키텍처
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Whiteboard                             │
//! │                                                                  │
//! │  LifecycleEvent ──▶ announced: CapabilityRegistry                │
//! │                          │ selection (IgnoreCase)                │
//! │       ┌──────────────┬───┴──────────┬──────────────┐             │
//! │       ▼              ▼              ▼              ▼             │
//! │  Application     Extension      Resource      Capability         │
//! │  KindPipeline    KindPipeline   KindPipeline  KindPipeline       │
//! │       │ gate (Exact) / router / bind                             │
//! │       ▼                                                          │
//! │  active: CapabilityRegistry ◀── 바인딩된 Provider                │
//! │  RuntimeState ──▶ snapshot()                                     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 사용 예시
//!
//! ```ignore
//! let whiteboard = Whiteboard::new(WhiteboardConfig::load()?, Arc::new(LoggingEndpointBuilder::new()))?;
//!
//! whiteboard.on_provider_added(ProviderId(1), Attributes::new().with("whiteboard.name", "svc"))?;
//! let snapshot = whiteboard.snapshot();
//! assert!(snapshot.is_bound(ProviderId(1)));
//!
//! whiteboard.close();
//! ```

mod kind;
mod pipeline;

pub use kind::ProviderKind;

use crate::endpoint::EndpointBuilder;
use crate::registry::{CapabilityRegistry, SubscriptionHandle};
use crate::state::{RuntimeState, Snapshot};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use pipeline::KindPipeline;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use whiteboard_foundation::{
    Attributes, Error, KeyMatch, LifecycleEvent, Provider, ProviderId, Result, WhiteboardConfig,
    APPLICATION_BASE_KEY, NAME_KEY, RANK_KEY,
};

/// 내장 기본 Application의 identity (호스팅 프레임워크 id와 겹치지 않는 값)
pub const DEFAULT_APPLICATION_ID: ProviderId = ProviderId(u64::MAX);

/// Whiteboard 오케스트레이터
pub struct Whiteboard {
    config: WhiteboardConfig,
    announced: Arc<CapabilityRegistry>,
    active: Arc<CapabilityRegistry>,
    state: Arc<RuntimeState>,
    pipelines: Vec<Arc<KindPipeline>>,
    selections: Mutex<Vec<SubscriptionHandle>>,
    /// 생명주기 이벤트 직렬화
    ingress: Mutex<()>,
    closed: AtomicBool,
}

impl Whiteboard {
    /// 오케스트레이터 생성
    ///
    /// 설정에 따라 기본 Application을 등록한 상태로 반환한다.
    pub fn new(config: WhiteboardConfig, endpoints: Arc<dyn EndpointBuilder>) -> Result<Arc<Self>> {
        config.validate()?;

        let announced = CapabilityRegistry::new(format!("{}-announced", config.name));
        let active = CapabilityRegistry::new(format!("{}-active", config.name));
        let state = Arc::new(RuntimeState::from_config(&config));

        let pipelines: Vec<_> = ProviderKind::ALL
            .into_iter()
            .map(|kind| {
                KindPipeline::new(
                    kind,
                    active.clone(),
                    state.clone(),
                    endpoints.clone(),
                    config.default_application.name.clone(),
                )
            })
            .collect();

        let selections: Vec<_> = pipelines
            .iter()
            .map(|pipeline| {
                announced.subscribe(
                    pipeline.kind().selection(),
                    KeyMatch::IgnoreCase,
                    pipeline.selection_sink(),
                )
            })
            .collect();

        let whiteboard = Arc::new(Self {
            config,
            announced,
            active,
            state,
            pipelines,
            selections: Mutex::new(selections),
            ingress: Mutex::new(()),
            closed: AtomicBool::new(false),
        });

        if whiteboard.config.default_application.enabled {
            let app = &whiteboard.config.default_application;
            let attributes = Attributes::new()
                .with(NAME_KEY, app.name.as_str())
                .with(APPLICATION_BASE_KEY, app.base.as_str())
                .with(RANK_KEY, i64::from(i32::MIN));
            whiteboard.on_provider_added(DEFAULT_APPLICATION_ID, attributes)?;
        }

        info!(whiteboard = %whiteboard.config.name, "Whiteboard started");
        Ok(whiteboard)
    }

    // ========================================================================
    // Inbound - 생명주기 이벤트
    // ========================================================================

    /// 새 Provider 발행
    pub fn on_provider_added(&self, id: ProviderId, attributes: Attributes) -> Result<Arc<Provider>> {
        let _ingress = self.ingress.lock();
        self.ensure_open()?;
        self.add(id, attributes)
    }

    /// Provider 속성 변경 (제거 후 추가)
    pub fn on_provider_modified(&self, id: ProviderId, attributes: Attributes) -> Result<Arc<Provider>> {
        let _ingress = self.ingress.lock();
        self.ensure_open()?;
        self.remove(id);
        self.add(id, attributes)
    }

    /// Provider 철회
    pub fn on_provider_removed(&self, id: ProviderId) -> Option<Arc<Provider>> {
        let _ingress = self.ingress.lock();
        if self.is_closed() {
            return None;
        }
        self.remove(id)
    }

    /// 이벤트 하나 처리
    pub fn handle(&self, event: LifecycleEvent) -> Result<()> {
        match event {
            LifecycleEvent::Added { id, attributes } => self.on_provider_added(id, attributes).map(|_| ()),
            LifecycleEvent::Modified { id, attributes } => {
                self.on_provider_modified(id, attributes).map(|_| ())
            }
            LifecycleEvent::Removed { id } => self
                .on_provider_removed(id)
                .map(|_| ())
                .ok_or(Error::ProviderNotFound(id)),
        }
    }

    /// 이벤트 스트림 처리
    ///
    /// 한 이벤트의 실패는 기록만 하고 다음 이벤트로 넘어간다. 스트림이 끝나거나
    /// 오케스트레이터가 닫히면 반환하며, 성공적으로 처리한 이벤트 수를 돌려준다.
    pub async fn run<S>(&self, mut events: S) -> usize
    where
        S: Stream<Item = LifecycleEvent> + Unpin,
    {
        let mut handled = 0;
        while let Some(event) = events.next().await {
            let kind = event.kind();
            let id = event.id();
            match self.handle(event) {
                Ok(()) => handled += 1,
                Err(e) => warn!(event = kind, provider_id = %id, error = %e, "Lifecycle event failed"),
            }
            if self.is_closed() {
                break;
            }
        }
        handled
    }

    fn add(&self, id: ProviderId, attributes: Attributes) -> Result<Arc<Provider>> {
        let provider = self.announced.register(id, attributes)?;
        debug!(provider = %provider, kind = %ProviderKind::classify(provider.attributes()), "Provider added");
        Ok(provider)
    }

    fn remove(&self, id: ProviderId) -> Option<Arc<Provider>> {
        let provider = self.announced.unregister(id)?;
        self.state.clear(id);
        debug!(provider = %provider, "Provider removed");
        Some(provider)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed(format!("whiteboard '{}'", self.config.name)));
        }
        Ok(())
    }

    // ========================================================================
    // Outbound - 조회
    // ========================================================================

    /// 현재 상태 스냅샷
    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    pub fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }

    /// 발행된 모든 Provider
    pub fn announced(&self) -> &Arc<CapabilityRegistry> {
        &self.announced
    }

    /// 바인딩된 Provider
    pub fn active(&self) -> &Arc<CapabilityRegistry> {
        &self.active
    }

    pub fn config(&self) -> &WhiteboardConfig {
        &self.config
    }

    /// 종류와 이름으로 현재 승자 조회
    pub fn winner(&self, kind: ProviderKind, name: &str) -> Option<Arc<Provider>> {
        self.pipelines
            .iter()
            .find(|p| p.kind() == kind)
            .and_then(|p| p.router().active(&name.to_string()))
    }

    // ========================================================================
    // 종료
    // ========================================================================

    /// 모든 바인딩 해제 후 종료. 멱등이다.
    pub fn close(&self) {
        let _ingress = self.ingress.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // 의존하는 쪽부터: Capability → Resource → Extension → Application
        for pipeline in self.pipelines.iter().rev() {
            pipeline.close();
        }
        for handle in std::mem::take(&mut *self.selections.lock()) {
            handle.close();
        }
        for provider in self.announced.providers() {
            self.state.clear(provider.id());
        }

        info!(whiteboard = %self.config.name, "Whiteboard closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{BindRequest, EndpointHandle, LoggingEndpointBuilder};
    use whiteboard_foundation::{
        FailureCategory, DEPENDENCIES_KEY, EXTENSION_KEY, EXTENSION_TYPES_KEY, RESOURCE_KEY,
    };

    fn whiteboard() -> (Arc<Whiteboard>, Arc<LoggingEndpointBuilder>) {
        let endpoints = Arc::new(LoggingEndpointBuilder::new());
        let whiteboard = Whiteboard::new(WhiteboardConfig::default(), endpoints.clone()).unwrap();
        (whiteboard, endpoints)
    }

    #[test]
    fn test_default_application_is_bound() {
        let (wb, endpoints) = whiteboard();
        let snapshot = wb.snapshot();

        assert!(snapshot.is_bound(DEFAULT_APPLICATION_ID));
        assert_eq!(snapshot.bound(".default").len(), 1);
        assert!(endpoints.bound().contains_key(&DEFAULT_APPLICATION_ID));
    }

    #[test]
    fn test_resource_binds_to_default_application() {
        let (wb, endpoints) = whiteboard();
        wb.on_provider_added(
            ProviderId(1),
            Attributes::new()
                .with(NAME_KEY, "users")
                .with(RESOURCE_KEY, true),
        )
        .unwrap();

        let snapshot = wb.snapshot();
        let names: Vec<_> = snapshot.bound(".default").iter().map(|p| p.name.clone()).collect();
        assert!(names.contains(&"users".to_string()));
        assert_eq!(endpoints.bound().get(&ProviderId(1)).map(String::as_str), Some(".default"));
    }

    #[test]
    fn test_resource_waits_for_selected_application() {
        let (wb, _) = whiteboard();
        wb.on_provider_added(
            ProviderId(1),
            Attributes::new()
                .with(RESOURCE_KEY, true)
                .with("whiteboard.application.select", "(whiteboard.name=shop)"),
        )
        .unwrap();

        let snapshot = wb.snapshot();
        assert_eq!(
            snapshot.category_of(ProviderId(1)).and_then(|o| o.failure()),
            Some(FailureCategory::RequiredContextUnavailable)
        );

        wb.on_provider_added(
            ProviderId(2),
            Attributes::new()
                .with(NAME_KEY, "shop")
                .with(APPLICATION_BASE_KEY, "/shop"),
        )
        .unwrap();

        let snapshot = wb.snapshot();
        assert_eq!(snapshot.bound("shop").len(), 2);

        wb.on_provider_removed(ProviderId(2));
        assert_eq!(
            wb.snapshot().category_of(ProviderId(1)).and_then(|o| o.failure()),
            Some(FailureCategory::RequiredContextUnavailable)
        );
    }

    #[test]
    fn test_invalid_extension_is_recorded() {
        let (wb, endpoints) = whiteboard();
        wb.on_provider_added(ProviderId(1), Attributes::new().with(EXTENSION_KEY, true))
            .unwrap();

        let snapshot = wb.snapshot();
        assert_eq!(snapshot.failures(FailureCategory::NotAnExtensionType).len(), 1);
        assert!(!endpoints.bound().contains_key(&ProviderId(1)));

        wb.on_provider_modified(
            ProviderId(1),
            Attributes::new()
                .with(EXTENSION_KEY, true)
                .with(EXTENSION_TYPES_KEY, vec!["filter"]),
        )
        .unwrap();
        assert!(wb.snapshot().is_bound(ProviderId(1)));
        assert!(wb
            .snapshot()
            .failures(FailureCategory::NotAnExtensionType)
            .is_empty());
    }

    #[test]
    fn test_refused_binding_is_not_retrievable() {
        let endpoints = Arc::new(LoggingEndpointBuilder::new().refuse([ProviderId(7)]));
        let wb = Whiteboard::new(WhiteboardConfig::default(), endpoints).unwrap();

        wb.on_provider_added(ProviderId(7), Attributes::new().with(NAME_KEY, "svc"))
            .unwrap();
        wb.on_provider_added(
            ProviderId(8),
            Attributes::new().with(DEPENDENCIES_KEY, "(whiteboard.name=svc)"),
        )
        .unwrap();

        let snapshot = wb.snapshot();
        assert_eq!(snapshot.failures(FailureCategory::ServiceNotRetrievable).len(), 1);
        // 바인딩되지 않았으므로 의존성으로도 보이지 않는다
        assert_eq!(
            snapshot.category_of(ProviderId(8)).and_then(|o| o.failure()),
            Some(FailureCategory::RequiredDependencyUnavailable)
        );
    }

    struct PanickingBuilder;

    impl EndpointBuilder for PanickingBuilder {
        fn bind_endpoint(&self, request: &BindRequest) -> Result<Box<dyn EndpointHandle>> {
            panic!("cannot bind {}", request.provider.name());
        }
    }

    #[test]
    fn test_panicking_builder_is_unknown() {
        let config = WhiteboardConfig::default().without_default_application();
        let wb = Whiteboard::new(config, Arc::new(PanickingBuilder)).unwrap();

        wb.on_provider_added(ProviderId(1), Attributes::new().with(NAME_KEY, "a"))
            .unwrap();
        wb.on_provider_added(ProviderId(2), Attributes::new().with(NAME_KEY, "b"))
            .unwrap();

        let snapshot = wb.snapshot();
        assert_eq!(snapshot.failures(FailureCategory::Unknown).len(), 2);
        assert_eq!(snapshot.bound_count(), 0);
    }

    #[test]
    fn test_duplicate_add_and_closed_errors() {
        let (wb, _) = whiteboard();
        wb.on_provider_added(ProviderId(1), Attributes::new()).unwrap();
        assert!(matches!(
            wb.on_provider_added(ProviderId(1), Attributes::new()),
            Err(Error::DuplicateProvider(_))
        ));

        wb.close();
        assert!(matches!(
            wb.on_provider_added(ProviderId(2), Attributes::new()),
            Err(Error::Closed(_))
        ));
    }

    #[test]
    fn test_close_unbinds_everything() {
        let (wb, endpoints) = whiteboard();
        wb.on_provider_added(ProviderId(1), Attributes::new().with(NAME_KEY, "a"))
            .unwrap();
        wb.on_provider_added(ProviderId(2), Attributes::new().with(RESOURCE_KEY, true))
            .unwrap();
        assert_eq!(endpoints.bound().len(), 3);

        wb.close();
        wb.close();

        assert!(endpoints.bound().is_empty());
        assert!(wb.active().is_empty());
        let snapshot = wb.snapshot();
        assert_eq!(snapshot.bound_count() + snapshot.failure_count(), 0);
    }
}
