//! # Runtime State
//!
//! Provider별 결과(바인딩 / 실패 카테고리)를 모아 스냅샷으로 제공한다.
//!
//! - 모든 컬렉션은 하나의 `RwLock` 아래에 있다. 따라서 스냅샷은 일관된다.
//! - 카테고리 이동은 같은 쓰기 락 안에서 제거 후 삽입이다. 한 Provider는
//!   어느 시점에도 최대 한 곳에만 존재한다.
//! - 이동할 때마다 [`StateChange`]를 브로드캐스트하고 최근 이력을 보관한다.

mod snapshot;

pub use snapshot::{FailureSummary, Outcome, ProviderSummary, Snapshot};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use whiteboard_foundation::{FailureCategory, Provider, ProviderId, WhiteboardConfig};

// ============================================================================
// StateChange
// ============================================================================

/// 카테고리 이동 이벤트
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub epoch: u64,
    pub provider_id: ProviderId,
    pub name: String,
    /// 이전 위치 (처음 기록이면 None)
    pub from: Option<Outcome>,
    /// 새 위치 (clear면 None)
    pub to: Option<Outcome>,
    pub at: DateTime<Utc>,
}

// ============================================================================
// RuntimeState
// ============================================================================

struct Record {
    provider: Arc<Provider>,
    outcome: Outcome,
    context: Option<String>,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<ProviderId, Record>,
    epoch: u64,
    history: VecDeque<StateChange>,
}

/// 런타임 상태 집계기
pub struct RuntimeState {
    inner: RwLock<Inner>,
    changes: broadcast::Sender<StateChange>,
    history_size: usize,
}

impl RuntimeState {
    pub fn new(event_capacity: usize, history_size: usize) -> Self {
        let (changes, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: RwLock::new(Inner::default()),
            changes,
            history_size,
        }
    }

    pub fn from_config(config: &WhiteboardConfig) -> Self {
        Self::new(config.event_capacity, config.history_size)
    }

    // ========================================================================
    // 기록
    // ========================================================================

    /// 바인딩 성공 기록 (다른 위치에 있었다면 이동)
    pub fn record_bound(&self, owner: &str, provider: &Arc<Provider>) {
        self.place(
            provider,
            Outcome::Bound {
                owner: owner.to_string(),
            },
            None,
        );
    }

    /// 실패 기록 (다른 위치에 있었다면 이동)
    pub fn record_failure(
        &self,
        category: FailureCategory,
        provider: &Arc<Provider>,
        context: Option<String>,
    ) {
        self.place(provider, Outcome::Failed { category }, context);
    }

    /// 모든 위치에서 제거
    pub fn clear(&self, id: ProviderId) -> Option<Outcome> {
        let mut inner = self.inner.write();
        let record = inner.records.remove(&id)?;

        inner.epoch += 1;
        let change = StateChange {
            epoch: inner.epoch,
            provider_id: id,
            name: record.provider.name().to_string(),
            from: Some(record.outcome.clone()),
            to: None,
            at: Utc::now(),
        };
        trace!(provider_id = %id, from = %record.outcome, "Cleared runtime state");
        self.publish(&mut inner, change);

        Some(record.outcome)
    }

    fn place(&self, provider: &Arc<Provider>, outcome: Outcome, context: Option<String>) {
        let mut inner = self.inner.write();
        let previous = inner.records.remove(&provider.id());

        let from = previous.as_ref().map(|r| r.outcome.clone());
        let moved = from.as_ref() != Some(&outcome);

        inner.records.insert(
            provider.id(),
            Record {
                provider: provider.clone(),
                outcome: outcome.clone(),
                context,
            },
        );
        inner.epoch += 1;

        if !moved {
            return;
        }

        debug!(
            provider = %provider,
            from = ?from.as_ref().map(ToString::to_string),
            to = %outcome,
            "Runtime state changed"
        );

        let change = StateChange {
            epoch: inner.epoch,
            provider_id: provider.id(),
            name: provider.name().to_string(),
            from,
            to: Some(outcome),
            at: Utc::now(),
        };
        self.publish(&mut inner, change);
    }

    fn publish(&self, inner: &mut Inner, change: StateChange) {
        if self.history_size > 0 {
            while inner.history.len() >= self.history_size {
                inner.history.pop_front();
            }
            inner.history.push_back(change.clone());
        }
        // 수신자가 없으면 에러지만 무시해도 된다
        let _ = self.changes.send(change);
    }

    // ========================================================================
    // 조회
    // ========================================================================

    /// 일관된 스냅샷
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read();

        let mut bound: BTreeMap<String, Vec<ProviderSummary>> = BTreeMap::new();
        let mut failures: BTreeMap<FailureCategory, Vec<FailureSummary>> = BTreeMap::new();

        for record in inner.records.values() {
            match &record.outcome {
                Outcome::Bound { owner } => bound
                    .entry(owner.clone())
                    .or_default()
                    .push(ProviderSummary::from(&record.provider)),
                Outcome::Failed { category } => {
                    failures.entry(*category).or_default().push(FailureSummary {
                        provider: ProviderSummary::from(&record.provider),
                        context: record.context.clone(),
                    })
                }
            }
        }

        Snapshot::new(inner.epoch, bound, failures)
    }

    /// Provider가 현재 놓인 위치
    pub fn category_of(&self, id: ProviderId) -> Option<Outcome> {
        self.inner.read().records.get(&id).map(|r| r.outcome.clone())
    }

    /// 상태 변경 횟수
    pub fn epoch(&self) -> u64 {
        self.inner.read().epoch
    }

    /// 상태 변경 구독
    pub fn changes(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// 최근 변경 이력 (오래된 것부터, 최대 limit개)
    pub fn history(&self, limit: usize) -> Vec<StateChange> {
        let inner = self.inner.read();
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::from_config(&WhiteboardConfig::default())
    }
}
