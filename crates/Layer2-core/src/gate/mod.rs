//! # Dependency Gate
//!
//! 요구사항 목록이 모두 만족될 때만 대상(target)을 발행한다.
//!
//! ```text
//! Requirement[0] ──match──▶ Requirement[1] ──match──▶ ... ──▶ target.satisfied()
//!       │                          │
//!       └── last match lost ───────┴──▶ close downstream stages + retract target
//!                                        target.waiting(requirement)
//! ```
//!
//! 각 단계는 활성 레지스트리에 대한 Filtered Subscription이며 현재 매칭 수를
//! 센다. 단계 i의 첫 매칭이 단계 i+1을 열고, 마지막 단계의 첫 매칭이 target을
//! 발행한다. 늦게 도착한 이전 세대의 통보는 세대 번호로 걸러낸다.

use crate::registry::{publication_fn, sink_fn, CapabilityRegistry, Publication, SubscriptionHandle};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};
use whiteboard_foundation::{KeyMatch, Predicate, Result};

// ============================================================================
// Requirement
// ============================================================================

/// 요구사항 종류 (실패 카테고리 결정에 쓰인다)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequirementKind {
    /// 일반 의존성
    Dependency,
    /// 붙을 Application
    Context,
}

/// 활성 레지스트리에 매칭되는 Provider가 하나 이상 있어야 한다는 조건
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub predicate: Predicate,
    pub kind: RequirementKind,
}

impl Requirement {
    pub fn dependency(predicate: Predicate) -> Self {
        Self {
            predicate,
            kind: RequirementKind::Dependency,
        }
    }

    pub fn context(predicate: Predicate) -> Self {
        Self {
            predicate,
            kind: RequirementKind::Context,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RequirementKind::Dependency => "dependency",
            RequirementKind::Context => "context",
        };
        write!(f, "{} {}", kind, self.predicate)
    }
}

// ============================================================================
// GateTarget
// ============================================================================

/// 게이트가 열리고 닫힐 때 호출되는 대상
pub trait GateTarget: Send + Sync {
    /// 모든 요구사항 충족. 반환한 Publication은 조건이 깨지면 철회된다.
    fn satisfied(&self) -> Result<Box<dyn Publication>>;

    /// 이 요구사항이 충족되지 않아 대기 중
    fn waiting(&self, requirement: &Requirement);
}

// ============================================================================
// DependencyGate
// ============================================================================

struct Stage {
    generation: u64,
    matches: usize,
    /// 한 번이라도 매칭된 적이 있는지 (잃으면 on_unmatch가 대기를 알린다)
    matched: bool,
    handle: Option<SubscriptionHandle>,
}

#[derive(Default)]
struct GateState {
    stages: Vec<Stage>,
    publication: Option<Box<dyn Publication>>,
    generations: u64,
    closed: bool,
}

impl GateState {
    fn is_current(&self, index: usize, generation: u64) -> bool {
        !self.closed
            && self
                .stages
                .get(index)
                .is_some_and(|stage| stage.generation == generation)
    }
}

struct GateInner {
    label: String,
    registry: Arc<CapabilityRegistry>,
    requirements: Vec<Requirement>,
    target: Arc<dyn GateTarget>,
    state: Mutex<GateState>,
}

/// 의존성 게이트
///
/// 내부 락은 sink/target 호출 중에 잡고 있지 않는다.
pub struct DependencyGate {
    inner: Arc<GateInner>,
}

impl DependencyGate {
    /// 게이트 생성 및 첫 단계 열기
    ///
    /// 요구사항이 없으면 즉시 target을 발행한다.
    pub fn open(
        label: impl Into<String>,
        registry: &Arc<CapabilityRegistry>,
        requirements: Vec<Requirement>,
        target: Arc<dyn GateTarget>,
    ) -> Self {
        let inner = Arc::new(GateInner {
            label: label.into(),
            registry: registry.clone(),
            requirements,
            target,
            state: Mutex::new(GateState::default()),
        });

        trace!(gate = %inner.label, requirements = inner.requirements.len(), "Opening gate");

        if inner.requirements.is_empty() {
            GateInner::satisfy(&inner, None);
        } else {
            GateInner::open_stage(&inner, 0);
        }

        Self { inner }
    }

    /// 게이트 종료 - 열린 단계를 모두 닫고 target 발행을 철회한다. 멱등이다.
    pub fn close(&self) {
        let (handles, publication) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let handles: Vec<_> = state.stages.drain(..).filter_map(|s| s.handle).collect();
            (handles, state.publication.take())
        };

        debug!(gate = %self.inner.label, stages = handles.len(), "Closing gate");

        if let Some(publication) = publication {
            publication.retract();
        }
        for handle in handles.into_iter().rev() {
            handle.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// target이 현재 발행 중인지
    pub fn is_satisfied(&self) -> bool {
        self.inner.state.lock().publication.is_some()
    }

    /// 현재 막고 있는 요구사항
    pub fn blocking(&self) -> Option<Requirement> {
        let state = self.inner.state.lock();
        if state.closed || state.publication.is_some() {
            return None;
        }
        let index = state
            .stages
            .iter()
            .position(|s| s.matches == 0)
            .unwrap_or(state.stages.len());
        self.inner.requirements.get(index).cloned()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.inner.requirements
    }
}

impl fmt::Debug for DependencyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyGate")
            .field("label", &self.inner.label)
            .field("requirements", &self.inner.requirements.len())
            .finish()
    }
}

impl GateInner {
    /// 단계 index 열기
    fn open_stage(this: &Arc<Self>, index: usize) {
        let generation = {
            let mut state = this.state.lock();
            if state.closed || state.stages.len() != index {
                return;
            }
            state.generations += 1;
            let generation = state.generations;
            state.stages.push(Stage {
                generation,
                matches: 0,
                matched: false,
                handle: None,
            });
            generation
        };

        let requirement = &this.requirements[index];
        trace!(gate = %this.label, stage = index, requirement = %requirement, "Opening stage");

        let weak = Arc::downgrade(this);
        let sink = sink_fn(move |_provider| {
            if let Some(inner) = weak.upgrade() {
                GateInner::on_match(&inner, index, generation);
            }
            let weak = weak.clone();
            Ok(publication_fn(move || {
                if let Some(inner) = weak.upgrade() {
                    GateInner::on_unmatch(&inner, index, generation);
                }
            }))
        });

        // 재생 전달이 이 호출 안에서 on_match를 부를 수 있으므로 락 밖에서 구독
        let handle = this
            .registry
            .subscribe(requirement.predicate.clone(), KeyMatch::Exact, sink);

        let stale = {
            let mut state = this.state.lock();
            if state.is_current(index, generation) {
                state.stages[index].handle = Some(handle);
                None
            } else {
                Some(handle)
            }
        };

        // 구독 중에 이미 무너진 단계
        if let Some(handle) = stale {
            handle.close();
            return;
        }

        // 전달 도중에 열린 단계는 재생이 큐 뒤에 있으므로 그 뒤에 판단한다
        let weak = Arc::downgrade(this);
        this.registry.after_delivery(move || {
            if let Some(inner) = weak.upgrade() {
                GateInner::report_blocked(&inner, index, generation);
            }
        });
    }

    /// 재생이 끝난 단계가 여전히 비어 있으면 대기 통보
    fn report_blocked(this: &Arc<Self>, index: usize, generation: u64) {
        let blocked = {
            let state = this.state.lock();
            state.is_current(index, generation) && {
                let stage = &state.stages[index];
                stage.matches == 0 && !stage.matched
            }
        };
        if blocked {
            this.target.waiting(&this.requirements[index]);
        }
    }

    fn on_match(this: &Arc<Self>, index: usize, generation: u64) {
        let first = {
            let mut state = this.state.lock();
            if !state.is_current(index, generation) {
                return;
            }
            let stage = &mut state.stages[index];
            stage.matches += 1;
            stage.matched = true;
            stage.matches == 1
        };

        if !first {
            return;
        }

        trace!(gate = %this.label, stage = index, "Stage satisfied");
        if index + 1 < this.requirements.len() {
            GateInner::open_stage(this, index + 1);
        } else {
            GateInner::satisfy(this, Some((index, generation)));
        }
    }

    fn on_unmatch(this: &Arc<Self>, index: usize, generation: u64) {
        let (handles, publication) = {
            let mut state = this.state.lock();
            if !state.is_current(index, generation) {
                return;
            }
            let stage = &mut state.stages[index];
            stage.matches = stage.matches.saturating_sub(1);
            if stage.matches > 0 {
                return;
            }
            let handles: Vec<_> = state
                .stages
                .drain(index + 1..)
                .filter_map(|s| s.handle)
                .collect();
            (handles, state.publication.take())
        };

        let requirement = &this.requirements[index];
        debug!(gate = %this.label, stage = index, requirement = %requirement, "Requirement lost");

        if let Some(publication) = publication {
            publication.retract();
        }
        for handle in handles.into_iter().rev() {
            handle.close();
        }
        this.target.waiting(requirement);
    }

    /// target 발행. `last`는 마지막 단계 (요구사항이 없으면 None)
    fn satisfy(this: &Arc<Self>, last: Option<(usize, u64)>) {
        let publication = match this.target.satisfied() {
            Ok(publication) => publication,
            Err(e) => {
                warn!(gate = %this.label, error = %e, "Gate target failed");
                return;
            }
        };

        let mut state = this.state.lock();
        let still_valid = match last {
            Some((index, generation)) => state.is_current(index, generation),
            None => !state.closed,
        };

        if still_valid && state.publication.is_none() {
            state.publication = Some(publication);
            drop(state);
            debug!(gate = %this.label, "Gate satisfied");
        } else {
            drop(state);
            publication.retract();
        }
    }
}
