//! Kind Pipeline - 종류별 처리 경로
//!
//! ```text
//! announced registry ──selection──▶ validate ──▶ DependencyGate(active registry)
//!                                                   │ satisfied
//!                                                   ▼
//!                                  RankRouter(name) ──activate──▶ Binder
//!                                                                  │ bind_endpoint
//!                                                                  ▼
//!                                               active registry + RuntimeState
//! ```

use super::kind::ProviderKind;
use crate::endpoint::{BindRequest, EndpointBuilder, EndpointHandle};
use crate::gate::{DependencyGate, GateTarget, Requirement, RequirementKind};
use crate::registry::{
    publication_fn, sink_fn, CapabilityRegistry, NoopPublication, ProviderSink, Publication,
};
use crate::router::{RankRouter, RouterSink};
use crate::state::RuntimeState;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};
use whiteboard_foundation::{
    AttributeValue, Error, FailureCategory, KeyMatch, Predicate, Provider, ProviderId, Result,
    APPLICATION_BASE_KEY, APPLICATION_SELECT_KEY, DEPENDENCIES_KEY, EXTENSION_SELECT_KEY,
    EXTENSION_TYPES_KEY, NAME_KEY,
};

// ============================================================================
// Validation / Requirements
// ============================================================================

/// 종류별 검증 후 게이트 요구사항 목록 생성
///
/// 순서: Application 컨텍스트 → Extension 선택 → 일반 의존성
pub(crate) fn requirements(
    kind: ProviderKind,
    provider: &Provider,
    default_application: &str,
) -> Result<Vec<Requirement>> {
    let attributes = provider.attributes();
    attributes.check_key_case()?;

    match kind {
        ProviderKind::Application => {
            let base = attributes
                .get_ignore_case(APPLICATION_BASE_KEY)
                .and_then(AttributeValue::as_str)
                .unwrap_or_default();
            if base.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "{}: {} must be a non-empty string",
                    provider.name(),
                    APPLICATION_BASE_KEY
                )));
            }
        }
        ProviderKind::Extension => {
            let declared = attributes
                .get_ignore_case(EXTENSION_TYPES_KEY)
                .and_then(AttributeValue::as_str_list)
                .is_some_and(|types| types.iter().any(|t| !t.trim().is_empty()));
            if !declared {
                return Err(Error::NotAnExtensionType(format!(
                    "{} does not declare {}",
                    provider.name(),
                    EXTENSION_TYPES_KEY
                )));
            }
        }
        ProviderKind::Resource | ProviderKind::Capability => {}
    }

    let mut requirements = Vec::new();
    if let Some(context) = context_requirement(kind, provider, default_application)? {
        requirements.push(context);
    }
    for key in [EXTENSION_SELECT_KEY, DEPENDENCIES_KEY] {
        for filter in filters(provider, key)? {
            requirements.push(Requirement::dependency(Predicate::parse(filter)?));
        }
    }
    Ok(requirements)
}

/// Extension/Resource가 붙을 Application 조건
pub(crate) fn context_requirement(
    kind: ProviderKind,
    provider: &Provider,
    default_application: &str,
) -> Result<Option<Requirement>> {
    if !kind.needs_context() {
        return Ok(None);
    }

    let select = match provider.attributes().get_ignore_case(APPLICATION_SELECT_KEY) {
        None => Predicate::equal(NAME_KEY, default_application),
        Some(value) => match value.as_str() {
            Some(filter) => Predicate::parse(filter)?,
            None => {
                return Err(Error::Validation(format!(
                    "{}: {} must be a filter string",
                    provider.name(),
                    APPLICATION_SELECT_KEY
                )))
            }
        },
    };

    Ok(Some(Requirement::context(Predicate::And(vec![
        Predicate::Present(APPLICATION_BASE_KEY.to_string()),
        select,
    ]))))
}

fn filters<'a>(provider: &'a Provider, key: &str) -> Result<Vec<&'a str>> {
    match provider.attributes().get_ignore_case(key) {
        None => Ok(Vec::new()),
        Some(value) => value.as_str_list().ok_or_else(|| {
            Error::Validation(format!(
                "{}: {} must be a filter string or a list of filter strings",
                provider.name(),
                key
            ))
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("endpoint builder panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("endpoint builder panicked: {s}")
    } else {
        "endpoint builder panicked".to_string()
    }
}

// ============================================================================
// Binder - RouterSink
// ============================================================================

/// 라우터 승자를 엔드포인트로 바인딩하고 결과를 기록
pub(crate) struct Binder {
    kind: ProviderKind,
    active: Arc<CapabilityRegistry>,
    state: Arc<RuntimeState>,
    endpoints: Arc<dyn EndpointBuilder>,
    default_application: String,
    bindings: Mutex<HashMap<ProviderId, Box<dyn EndpointHandle>>>,
}

impl Binder {
    /// 바인딩이 속할 owner
    fn owner_of(&self, provider: &Arc<Provider>) -> String {
        match context_requirement(self.kind, provider, &self.default_application) {
            Ok(Some(context)) => self
                .active
                .matching(&context.predicate, KeyMatch::Exact)
                .first()
                .map(|app| app.name().to_string())
                .unwrap_or_else(|| self.default_application.clone()),
            _ => provider.name().to_string(),
        }
    }

    fn record_bind_failure(&self, provider: &Arc<Provider>, category: FailureCategory, context: String) {
        warn!(kind = %self.kind, provider = %provider, category = %category, "{}", context);
        self.state.record_failure(category, provider, Some(context));
    }
}

impl RouterSink<String> for Binder {
    /// 바인딩에 실패하면 실패를 기록하고 `false`를 반환해 라우터 후보에서 빠진다
    fn activate(&self, _name: &String, provider: &Arc<Provider>) -> bool {
        let request = BindRequest {
            provider: provider.clone(),
            kind: self.kind,
            owner: self.owner_of(provider),
        };

        let handle = match catch_unwind(AssertUnwindSafe(|| self.endpoints.bind_endpoint(&request))) {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                self.record_bind_failure(provider, FailureCategory::from_error(&e), e.to_string());
                return false;
            }
            Err(panic) => {
                self.record_bind_failure(provider, FailureCategory::Unknown, panic_message(panic.as_ref()));
                return false;
            }
        };

        if let Some(stale) = self.bindings.lock().insert(provider.id(), handle) {
            stale.unbind();
        }
        self.state.record_bound(&request.owner, provider);

        // 다른 Provider의 의존성 대상으로 공개
        if let Err(e) = self.active.register(provider.id(), provider.attributes().clone()) {
            warn!(provider = %provider, error = %e, "Failed to publish active provider");
        }
        true
    }

    fn deactivate(&self, _name: &String, provider: &Arc<Provider>) {
        let handle = self.bindings.lock().remove(&provider.id());
        if let Some(handle) = handle {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handle.unbind())) {
                warn!(provider = %provider, "{}", panic_message(panic.as_ref()));
            }
        }
        self.active.unregister(provider.id());
        debug!(kind = %self.kind, provider = %provider, "Deactivated");
    }

    fn shadowed(&self, name: &String, loser: &Arc<Provider>, winner: &Arc<Provider>) {
        let category = if loser.rank() == winner.rank() {
            FailureCategory::DuplicateName
        } else {
            FailureCategory::ShadowedByOtherProvider
        };
        debug!(kind = %self.kind, name = %name, loser = %loser, winner = %winner, "Shadowed");
        self.state
            .record_failure(category, loser, Some(format!("lost '{}' to {}", name, winner)));
    }
}

// ============================================================================
// KindPipeline
// ============================================================================

/// 종류 하나의 처리 경로
pub(crate) struct KindPipeline {
    kind: ProviderKind,
    router: RankRouter<String>,
    binder: Arc<Binder>,
}

impl KindPipeline {
    pub(crate) fn new(
        kind: ProviderKind,
        active: Arc<CapabilityRegistry>,
        state: Arc<RuntimeState>,
        endpoints: Arc<dyn EndpointBuilder>,
        default_application: String,
    ) -> Arc<Self> {
        let binder = Arc::new(Binder {
            kind,
            active,
            state,
            endpoints,
            default_application,
            bindings: Mutex::new(HashMap::new()),
        });
        let router = RankRouter::new(
            format!("{}-router", kind),
            |provider: &Provider| provider.name().to_string(),
            binder.clone(),
        );

        Arc::new(Self {
            kind,
            router,
            binder,
        })
    }

    pub(crate) fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// 선택 구독에 연결할 sink
    pub(crate) fn selection_sink(self: &Arc<Self>) -> Arc<dyn ProviderSink> {
        let pipeline = self.clone();
        sink_fn(move |provider| Ok(pipeline.admit(provider)))
    }

    /// 선택된 Provider를 게이트에 태운다
    ///
    /// 검증 실패는 기록만 하고 아무 효과도 남기지 않는다.
    fn admit(self: &Arc<Self>, provider: &Arc<Provider>) -> Box<dyn Publication> {
        let binder = &self.binder;
        let requirements = match requirements(self.kind, provider, &binder.default_application) {
            Ok(requirements) => requirements,
            Err(e) => {
                warn!(kind = %self.kind, provider = %provider, error = %e, "Provider rejected");
                binder
                    .state
                    .record_failure(FailureCategory::from_error(&e), provider, Some(e.to_string()));
                return Box::new(NoopPublication);
            }
        };

        debug!(
            kind = %self.kind,
            provider = %provider,
            requirements = requirements.len(),
            "Admitting provider"
        );

        let target = Arc::new(RouteTarget {
            pipeline: self.clone(),
            provider: provider.clone(),
        });
        let gate = DependencyGate::open(
            format!("{}:{}", self.kind, provider),
            &binder.active,
            requirements,
            target,
        );

        publication_fn(move || gate.close())
    }

    pub(crate) fn router(&self) -> &RankRouter<String> {
        &self.router
    }

    pub(crate) fn close(&self) {
        self.router.close();
    }
}

// ============================================================================
// RouteTarget - GateTarget
// ============================================================================

/// 게이트가 열리면 라우터 후보가 된다
struct RouteTarget {
    pipeline: Arc<KindPipeline>,
    provider: Arc<Provider>,
}

impl GateTarget for RouteTarget {
    fn satisfied(&self) -> Result<Box<dyn Publication>> {
        self.pipeline.router.add(self.provider.clone());

        let pipeline = self.pipeline.clone();
        let id = self.provider.id();
        Ok(publication_fn(move || {
            pipeline.router.remove(id);
        }))
    }

    fn waiting(&self, requirement: &Requirement) {
        let category = match requirement.kind {
            RequirementKind::Dependency => FailureCategory::RequiredDependencyUnavailable,
            RequirementKind::Context => FailureCategory::RequiredContextUnavailable,
        };
        self.pipeline.binder.state.record_failure(
            category,
            &self.provider,
            Some(requirement.predicate.to_string()),
        );
    }
}
