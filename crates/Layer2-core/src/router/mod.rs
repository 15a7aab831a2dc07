//! # Rank Router
//!
//! 그룹 키(보통 Provider 이름)별로 가장 높은 rank의 Provider 하나만 활성화한다.
//!
//! ## 선택 규칙
//!
//! ```text
//! group "svc":  [ Y(rank 5, seq 2) ▶ active ]
//!               [ Z(rank 5, seq 3)   shadowed (same rank) ]
//!               [ X(rank 1, seq 1)   shadowed (lower rank) ]
//! ```
//!
//! - 순서는 `(rank 내림차순, sequence 오름차순)`. 같은 rank면 먼저 등록된 쪽이 이긴다.
//! - 승자가 바뀌면 이전 승자 `deactivate` → 새 승자 `activate` → 나머지 후보 `shadowed`.
//! - `activate`가 실패하면 그 후보는 그룹에서 빠지고 다음 후보가 승격된다.
//!   다시 `add`될 때까지 후보가 아니다.
//! - 모든 sink 호출은 라우터의 직렬 영역에서 FIFO로 전달된다. `shadowed`는 전달
//!   시점에도 패자가 후보이고 승자가 활성일 때만 전달된다.

use crate::dispatch::{Outbox, SerialCell};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use whiteboard_foundation::{Provider, ProviderId};

// ============================================================================
// RouterSink
// ============================================================================

/// 라우터 결정을 받는 하류
pub trait RouterSink<K>: Send + Sync {
    /// 그룹의 새 승자
    ///
    /// `false`를 반환하면 활성화 실패로 보고 후보에서 제외한다.
    fn activate(&self, key: &K, provider: &Arc<Provider>) -> bool;

    /// 승자 자리를 잃음 (제거되었거나 밀려남)
    fn deactivate(&self, key: &K, provider: &Arc<Provider>);

    /// 후보지만 승자가 아님
    ///
    /// 승자가 바뀔 때마다 남은 후보에 대해 다시 호출된다.
    fn shadowed(&self, key: &K, loser: &Arc<Provider>, winner: &Arc<Provider>);
}

// ============================================================================
// Candidate
// ============================================================================

#[derive(Clone)]
struct Candidate(Arc<Provider>);

impl Candidate {
    fn order_key(&self) -> (Reverse<i32>, u64, ProviderId) {
        (Reverse(self.0.rank()), self.0.sequence(), self.0.id())
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.order_key().cmp(&other.order_key())
    }
}

struct Group {
    candidates: BTreeSet<Candidate>,
    /// 활성 Provider와 활성화 순번
    active: Option<(Arc<Provider>, u64)>,
}

impl Group {
    fn top(&self) -> Option<&Arc<Provider>> {
        self.candidates.iter().next().map(|c| &c.0)
    }

    fn is_active(&self, id: ProviderId) -> bool {
        matches!(&self.active, Some((active, _)) if active.id() == id)
    }
}

struct RouterState<K> {
    groups: BTreeMap<K, Group>,
    keys: HashMap<ProviderId, K>,
    activations: u64,
    closed: bool,
}

// ============================================================================
// RankRouter
// ============================================================================

type KeyFn<K> = Box<dyn Fn(&Provider) -> K + Send + Sync>;

/// rank 기반 승자 선택기
pub struct RankRouter<K> {
    inner: Arc<RouterInner<K>>,
}

/// 큐에 쌓인 sink 호출이 라우터 상태를 다시 볼 수 있도록 공유되는 본체
struct RouterInner<K> {
    name: String,
    key_fn: KeyFn<K>,
    sink: Arc<dyn RouterSink<K>>,
    cell: SerialCell<RouterState<K>>,
}

impl<K> RankRouter<K>
where
    K: Ord + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        key_fn: impl Fn(&Provider) -> K + Send + Sync + 'static,
        sink: Arc<dyn RouterSink<K>>,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                name: name.into(),
                key_fn: Box::new(key_fn),
                sink,
                cell: SerialCell::new(RouterState {
                    groups: BTreeMap::new(),
                    keys: HashMap::new(),
                    activations: 0,
                    closed: false,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 후보 추가
    ///
    /// 이미 후보인 Provider나 닫힌 라우터에 대한 호출은 무시된다.
    pub fn add(&self, provider: Arc<Provider>) {
        self.inner.add(provider);
    }

    /// 후보 제거
    ///
    /// 승자였다면 다음 후보가 승격된다.
    pub fn remove(&self, id: ProviderId) -> Option<Arc<Provider>> {
        self.inner.remove(id)
    }

    /// 라우터 종료
    ///
    /// 모든 승자를 활성화 역순으로 비활성화한다. 멱등이다.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cell.read(|state| state.closed)
    }

    // ========================================================================
    // 조회
    // ========================================================================

    /// 그룹의 현재 승자
    pub fn active(&self, key: &K) -> Option<Arc<Provider>> {
        self.inner.cell.read(|state| {
            state
                .groups
                .get(key)
                .and_then(|g| g.active.as_ref().map(|(p, _)| p.clone()))
        })
    }

    /// 그룹의 후보 목록 (우선순위 순)
    pub fn candidates(&self, key: &K) -> Vec<Arc<Provider>> {
        self.inner.cell.read(|state| {
            state
                .groups
                .get(key)
                .map(|g| g.candidates.iter().map(|c| c.0.clone()).collect())
                .unwrap_or_default()
        })
    }

    /// 전체 승자 목록 (키 순)
    pub fn winners(&self) -> Vec<(K, Arc<Provider>)> {
        self.inner.cell.read(|state| {
            state
                .groups
                .iter()
                .filter_map(|(key, g)| g.active.as_ref().map(|(p, _)| (key.clone(), p.clone())))
                .collect()
        })
    }

    pub fn is_active(&self, id: ProviderId) -> bool {
        self.inner.cell.read(|state| {
            state
                .keys
                .get(&id)
                .and_then(|key| state.groups.get(key))
                .is_some_and(|g| g.is_active(id))
        })
    }
}

impl RankRouter<()> {
    /// 레지스트리 전체에서 하나만 고르는 라우터
    pub fn single(name: impl Into<String>, sink: Arc<dyn RouterSink<()>>) -> Self {
        Self::new(name, |_| (), sink)
    }
}

impl<K> RouterInner<K>
where
    K: Ord + Clone + Debug + Send + Sync + 'static,
{
    // ========================================================================
    // 후보 추가 / 제거
    // ========================================================================

    fn add(self: &Arc<Self>, provider: Arc<Provider>) {
        let key = (self.key_fn)(&provider);

        self.cell.update(|state, outbox| {
            if state.closed {
                warn!(router = %self.name, provider = %provider, "Router closed, ignoring candidate");
                return;
            }
            if state.keys.contains_key(&provider.id()) {
                warn!(router = %self.name, provider = %provider, "Candidate already present");
                return;
            }

            state.keys.insert(provider.id(), key.clone());
            let group = state.groups.entry(key.clone()).or_insert_with(|| Group {
                candidates: BTreeSet::new(),
                active: None,
            });
            group.candidates.insert(Candidate(provider.clone()));

            trace!(router = %self.name, key = ?key, provider = %provider, "Added candidate");

            let winner_changed = match (&group.active, group.top()) {
                (Some((active, _)), Some(top)) => active.id() != top.id(),
                _ => true,
            };

            if winner_changed {
                state.activations += 1;
                let order = state.activations;
                if let Some(group) = state.groups.get_mut(&key) {
                    self.promote(&key, group, order, outbox);
                }
            } else if let Some((winner, _)) = &group.active {
                self.queue_shadowed(outbox, &key, provider, winner.clone());
            }
        });
    }

    fn remove(self: &Arc<Self>, id: ProviderId) -> Option<Arc<Provider>> {
        self.cell.update(|state, outbox| {
            let key = state.keys.remove(&id)?;
            let group = state.groups.get_mut(&key)?;

            let removed = group
                .candidates
                .iter()
                .find(|c| c.0.id() == id)
                .cloned()?;
            group.candidates.remove(&removed);

            trace!(router = %self.name, key = ?key, provider = %removed.0, "Removed candidate");

            if group.is_active(id) {
                if group.candidates.is_empty() {
                    group.active = None;
                    self.queue_deactivate(outbox, &key, removed.0.clone());
                } else {
                    state.activations += 1;
                    let order = state.activations;
                    self.promote(&key, group, order, outbox);
                }
            }

            if group.candidates.is_empty() {
                state.groups.remove(&key);
            }
            Some(removed.0)
        })
    }

    /// 활성화에 실패한 후보를 그룹에서 뺀다
    ///
    /// 이미 바인딩되지 않았으므로 `deactivate`는 보내지 않는다.
    fn reject(self: &Arc<Self>, key: &K, provider: &Arc<Provider>) {
        self.cell.update(|state, outbox| {
            let Some(group) = state.groups.get_mut(key) else {
                return;
            };
            if !group.candidates.remove(&Candidate(provider.clone())) {
                return;
            }
            state.keys.remove(&provider.id());

            warn!(router = %self.name, key = ?key, provider = %provider, "Activation failed, dropping candidate");

            if group.is_active(provider.id()) {
                group.active = None;
                if !group.candidates.is_empty() {
                    state.activations += 1;
                    let order = state.activations;
                    self.promote(key, group, order, outbox);
                }
            }

            if group.candidates.is_empty() {
                state.groups.remove(key);
            }
        });
    }

    /// 그룹의 최상위 후보를 승자로 만들고 sink 호출을 예약
    fn promote(self: &Arc<Self>, key: &K, group: &mut Group, order: u64, outbox: &mut Outbox) {
        let Some(top) = group.top().cloned() else {
            return;
        };

        if let Some((previous, _)) = group.active.take() {
            debug!(
                router = %self.name,
                key = ?key,
                from = %previous,
                to = %top,
                "Switching active provider"
            );
            self.queue_deactivate(outbox, key, previous);
        } else {
            debug!(router = %self.name, key = ?key, provider = %top, "Activating provider");
        }

        group.active = Some((top.clone(), order));

        let inner = self.clone();
        let k = key.clone();
        let winner = top.clone();
        outbox.push(move || {
            if !inner.sink.activate(&k, &winner) {
                inner.reject(&k, &winner);
            }
        });

        for loser in group.candidates.iter().skip(1) {
            self.queue_shadowed(outbox, key, loser.0.clone(), top.clone());
        }
    }

    fn queue_deactivate(&self, outbox: &mut Outbox, key: &K, provider: Arc<Provider>) {
        let sink = self.sink.clone();
        let key = key.clone();
        outbox.push(move || sink.deactivate(&key, &provider));
    }

    fn queue_shadowed(
        self: &Arc<Self>,
        outbox: &mut Outbox,
        key: &K,
        loser: Arc<Provider>,
        winner: Arc<Provider>,
    ) {
        let inner = self.clone();
        let key = key.clone();
        outbox.push(move || {
            if inner.still_shadowed(&key, &loser, &winner) {
                inner.sink.shadowed(&key, &loser, &winner);
            }
        });
    }

    /// 큐에서 기다리는 동안 후보가 빠졌거나 승자가 바뀌지 않았는지
    fn still_shadowed(&self, key: &K, loser: &Arc<Provider>, winner: &Arc<Provider>) -> bool {
        self.cell.read(|state| {
            state.groups.get(key).is_some_and(|group| {
                group.candidates.contains(&Candidate(loser.clone())) && group.is_active(winner.id())
            })
        })
    }

    // ========================================================================
    // 종료
    // ========================================================================

    fn close(&self) {
        self.cell.update(|state, outbox| {
            if state.closed {
                return;
            }
            state.closed = true;

            let mut winners: Vec<(K, Arc<Provider>, u64)> = std::mem::take(&mut state.groups)
                .into_iter()
                .filter_map(|(key, group)| group.active.map(|(p, order)| (key, p, order)))
                .collect();
            state.keys.clear();

            winners.sort_by_key(|(_, _, order)| Reverse(*order));
            debug!(router = %self.name, winners = winners.len(), "Closing router");

            for (key, provider, _) in winners {
                self.queue_deactivate(outbox, &key, provider);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use whiteboard_foundation::Attributes;

    #[derive(Default)]
    struct RecordingSink {
        log: Mutex<Vec<String>>,
        refused: Vec<ProviderId>,
    }

    impl RecordingSink {
        fn refusing(ids: &[u64]) -> Self {
            Self {
                log: Mutex::new(Vec::new()),
                refused: ids.iter().copied().map(ProviderId).collect(),
            }
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.log.lock())
        }
    }

    impl<K: Debug> RouterSink<K> for RecordingSink {
        fn activate(&self, _key: &K, provider: &Arc<Provider>) -> bool {
            if self.refused.contains(&provider.id()) {
                self.log.lock().push(format!("!{}", provider.id().0));
                return false;
            }
            self.log.lock().push(format!("+{}", provider.id().0));
            true
        }

        fn deactivate(&self, _key: &K, provider: &Arc<Provider>) {
            self.log.lock().push(format!("-{}", provider.id().0));
        }

        fn shadowed(&self, _key: &K, loser: &Arc<Provider>, winner: &Arc<Provider>) {
            self.log
                .lock()
                .push(format!("{}<{}", loser.id().0, winner.id().0));
        }
    }

    fn provider(id: u64, name: &str, rank: i64, sequence: u64) -> Arc<Provider> {
        Arc::new(Provider::new(
            ProviderId(id),
            Attributes::new()
                .with("whiteboard.name", name)
                .with("service.ranking", rank),
            sequence,
        ))
    }

    fn router(sink: Arc<RecordingSink>) -> RankRouter<String> {
        RankRouter::new("test", |p: &Provider| p.name().to_string(), sink)
    }

    #[test]
    fn test_higher_rank_replaces_winner() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone());

        router.add(provider(1, "svc", 1, 1));
        assert_eq!(sink.take(), vec!["+1"]);

        router.add(provider(2, "svc", 5, 2));
        assert_eq!(sink.take(), vec!["-1", "+2", "1<2"]);
        assert_eq!(router.active(&"svc".to_string()).unwrap().id(), ProviderId(2));

        router.remove(ProviderId(2));
        assert_eq!(sink.take(), vec!["-2", "+1"]);
        assert_eq!(router.active(&"svc".to_string()).unwrap().id(), ProviderId(1));
    }

    #[test]
    fn test_equal_rank_earlier_wins() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone());

        router.add(provider(1, "svc", 3, 1));
        router.add(provider(2, "svc", 3, 2));

        assert_eq!(sink.take(), vec!["+1", "2<1"]);
        assert!(router.is_active(ProviderId(1)));
        assert!(!router.is_active(ProviderId(2)));
    }

    #[test]
    fn test_groups_are_independent() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone());

        router.add(provider(1, "a", 0, 1));
        router.add(provider(2, "b", 0, 2));

        let winners: Vec<_> = router.winners().into_iter().map(|(k, p)| (k, p.id().0)).collect();
        assert_eq!(winners, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_removing_loser_keeps_winner() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone());

        router.add(provider(1, "svc", 5, 1));
        router.add(provider(2, "svc", 1, 2));
        sink.take();

        assert!(router.remove(ProviderId(2)).is_some());
        assert!(sink.take().is_empty());
        assert_eq!(router.candidates(&"svc".to_string()).len(), 1);
        assert!(router.remove(ProviderId(2)).is_none());
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone());

        let p = provider(1, "svc", 0, 1);
        router.add(p.clone());
        router.add(p);

        assert_eq!(sink.take(), vec!["+1"]);
        assert_eq!(router.candidates(&"svc".to_string()).len(), 1);
    }

    #[test]
    fn test_close_deactivates_in_reverse_order() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone());

        router.add(provider(1, "a", 0, 1));
        router.add(provider(2, "b", 0, 2));
        router.add(provider(3, "c", 0, 3));
        sink.take();

        router.close();
        router.close();
        assert_eq!(sink.take(), vec!["-3", "-2", "-1"]);
        assert!(router.winners().is_empty());

        router.add(provider(4, "d", 0, 4));
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_single_router() {
        let sink = Arc::new(RecordingSink::default());
        let router = RankRouter::single("single", sink.clone());

        router.add(provider(1, "a", 0, 1));
        router.add(provider(2, "b", 10, 2));

        assert_eq!(sink.take(), vec!["+1", "-1", "+2", "1<2"]);
        assert_eq!(router.active(&()).unwrap().id(), ProviderId(2));
    }

    #[test]
    fn test_removing_winner_promotes_next_once() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone());

        router.add(provider(1, "svc", 1, 1));
        router.add(provider(2, "svc", 3, 2));
        router.add(provider(3, "svc", 5, 3));
        sink.take();

        router.remove(ProviderId(3));
        assert_eq!(sink.take(), vec!["-3", "+2", "1<2"]);
        assert!(router.is_active(ProviderId(2)));
        assert_eq!(router.candidates(&"svc".to_string()).len(), 2);

        router.remove(ProviderId(2));
        assert_eq!(sink.take(), vec!["-2", "+1"]);
    }

    #[test]
    fn test_failed_activation_promotes_next() {
        let sink = Arc::new(RecordingSink::refusing(&[2]));
        let router = router(sink.clone());

        router.add(provider(1, "svc", 1, 1));
        router.add(provider(2, "svc", 5, 2));

        // 실패한 후보를 가리키는 shadowed는 전달되지 않는다
        assert_eq!(sink.take(), vec!["+1", "-1", "!2", "+1"]);
        assert!(router.is_active(ProviderId(1)));
        assert_eq!(router.candidates(&"svc".to_string()).len(), 1);
        assert!(router.remove(ProviderId(2)).is_none());

        // 다시 추가되면 다시 시도한다
        router.add(provider(2, "svc", 5, 3));
        assert_eq!(sink.take(), vec!["-1", "!2", "+1"]);
    }

    #[test]
    fn test_failed_sole_candidate_leaves_group_empty() {
        let sink = Arc::new(RecordingSink::refusing(&[1]));
        let router = router(sink.clone());

        router.add(provider(1, "svc", 0, 1));
        assert_eq!(sink.take(), vec!["!1"]);
        assert!(router.winners().is_empty());
        assert!(router.candidates(&"svc".to_string()).is_empty());
    }

    #[test]
    fn test_concurrent_adds_then_remove_winner() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone());

        std::thread::scope(|scope| {
            for id in 1..=8u64 {
                let router = &router;
                scope.spawn(move || router.add(provider(id, "svc", id as i64, id)));
            }
        });

        assert!(router.is_active(ProviderId(8)));
        let log = sink.take();
        let activations = log.iter().filter(|e| e.starts_with('+')).count();
        let deactivations = log.iter().filter(|e| e.starts_with('-')).count();
        assert_eq!(activations, deactivations + 1);
        assert_eq!(log.iter().filter(|e| e.starts_with('+')).last().map(String::as_str), Some("+8"));

        // 승자 제거와 패자 제거가 동시에 일어나도 승격은 한 번
        std::thread::scope(|scope| {
            let r = &router;
            scope.spawn(move || r.remove(ProviderId(8)));
            scope.spawn(move || r.remove(ProviderId(1)));
        });

        assert!(router.is_active(ProviderId(7)));
        let log = sink.take();
        assert_eq!(log.iter().filter(|e| e.starts_with('+')).collect::<Vec<_>>(), vec!["+7"]);
        assert_eq!(log.iter().filter(|e| e.starts_with('-')).collect::<Vec<_>>(), vec!["-8"]);
        assert_eq!(router.candidates(&"svc".to_string()).len(), 6);
    }
}
