//! Capability Registry - Provider 저장소 + 구독 전달
//!
//! 등록/해제와 그에 따른 구독 전달은 하나의 직렬 영역([`SerialCell`])에서
//! FIFO 순서로 처리된다. sink가 레지스트리를 다시 호출해도 교착되지 않는다.

use super::sink::ProviderSink;
use super::subscription::{FilteredSubscription, SubscriptionId};
use crate::dispatch::{Outbox, SerialCell};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};
use whiteboard_foundation::{Attributes, Error, KeyMatch, Predicate, Provider, ProviderId, Result};

// ============================================================================
// CapabilityRegistry
// ============================================================================

#[derive(Default)]
struct RegistryState {
    providers: BTreeMap<ProviderId, Arc<Provider>>,
    subscriptions: BTreeMap<SubscriptionId, Arc<FilteredSubscription>>,
    next_sequence: u64,
    next_subscription: u64,
}

/// Provider 저장소
pub struct CapabilityRegistry {
    /// 레지스트리 이름 (디버깅용)
    name: Arc<str>,
    cell: SerialCell<RegistryState>,
    delivered: Arc<AtomicU64>,
    delivery_failures: Arc<AtomicU64>,
}

impl CapabilityRegistry {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name: String = name.into();
        Arc::new(Self {
            name: Arc::from(name),
            cell: SerialCell::new(RegistryState::default()),
            delivered: Arc::new(AtomicU64::new(0)),
            delivery_failures: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // 등록 / 해제
    // ========================================================================

    /// Provider 등록
    ///
    /// 등록 순서를 나타내는 sequence를 부여하고, 살아있는 모든 구독에 전달한 뒤
    /// 반환한다.
    pub fn register(&self, id: ProviderId, attributes: Attributes) -> Result<Arc<Provider>> {
        self.cell.update(|state, outbox| {
            if state.providers.contains_key(&id) {
                return Err(Error::DuplicateProvider(id));
            }

            state.next_sequence += 1;
            let provider = Arc::new(Provider::new(id, attributes, state.next_sequence));
            state.providers.insert(id, provider.clone());

            debug!(
                registry = %self.name,
                provider = %provider,
                sequence = provider.sequence(),
                "Registered provider"
            );

            for subscription in state.subscriptions.values() {
                self.queue_added(outbox, subscription.clone(), provider.clone());
            }
            Ok(provider)
        })
    }

    /// Provider 해제
    ///
    /// 이 Provider를 발행했던 모든 구독이 철회를 마친 뒤 반환한다.
    pub fn unregister(&self, id: ProviderId) -> Option<Arc<Provider>> {
        self.cell.update(|state, outbox| {
            let provider = state.providers.remove(&id)?;

            debug!(registry = %self.name, provider = %provider, "Unregistered provider");

            for subscription in state.subscriptions.values() {
                let subscription = subscription.clone();
                outbox.push(move || {
                    subscription.on_provider_removed(id);
                });
            }
            Some(provider)
        })
    }

    // ========================================================================
    // 구독
    // ========================================================================

    /// 질의식 구독
    ///
    /// 이미 등록된 Provider 중 매칭되는 것은 반환 전에 모두 전달된다.
    pub fn subscribe(
        self: &Arc<Self>,
        predicate: Predicate,
        key_match: KeyMatch,
        sink: Arc<dyn ProviderSink>,
    ) -> SubscriptionHandle {
        let subscription = self.cell.update(|state, outbox| {
            state.next_subscription += 1;
            let id = SubscriptionId(state.next_subscription);
            let subscription = Arc::new(FilteredSubscription::new(id, predicate, key_match, sink));
            state.subscriptions.insert(id, subscription.clone());

            trace!(
                registry = %self.name,
                subscription = %id,
                filter = %subscription.predicate(),
                replay = state.providers.len(),
                "Subscribed"
            );

            let mut replay: Vec<_> = state.providers.values().cloned().collect();
            replay.sort_by_key(|p| p.sequence());
            for provider in replay {
                self.queue_added(outbox, subscription.clone(), provider);
            }
            subscription
        });

        SubscriptionHandle {
            registry: Arc::downgrade(self),
            subscription,
        }
    }

    fn queue_added(
        &self,
        outbox: &mut Outbox,
        subscription: Arc<FilteredSubscription>,
        provider: Arc<Provider>,
    ) {
        let name = self.name.clone();
        let delivered = self.delivered.clone();
        let failures = self.delivery_failures.clone();

        outbox.push(move || match subscription.on_provider_added(&provider) {
            Ok(true) => {
                delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(e) => {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    registry = %name,
                    subscription = %subscription.id(),
                    provider_id = %provider.id(),
                    error = %e,
                    "Subscription delivery failed"
                );
            }
        });
    }

    /// 이미 큐에 쌓인 전달이 모두 끝난 뒤 job 실행
    ///
    /// 전달 밖에서 호출하면 바로 실행된다.
    pub(crate) fn after_delivery(&self, job: impl FnOnce() + Send + 'static) {
        self.cell.update(|_, outbox| outbox.push(job));
    }

    fn detach(&self, id: SubscriptionId) -> bool {
        self.cell
            .update(|state, _| state.subscriptions.remove(&id).is_some())
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub fn get(&self, id: ProviderId) -> Option<Arc<Provider>> {
        self.cell.read(|state| state.providers.get(&id).cloned())
    }

    pub fn contains(&self, id: ProviderId) -> bool {
        self.cell.read(|state| state.providers.contains_key(&id))
    }

    /// 등록된 Provider 목록 (등록 순서)
    pub fn providers(&self) -> Vec<Arc<Provider>> {
        let mut providers: Vec<_> = self.cell.read(|state| state.providers.values().cloned().collect());
        providers.sort_by_key(|p| p.sequence());
        providers
    }

    /// 질의식에 매칭되는 Provider 목록 (등록 순서)
    pub fn matching(&self, predicate: &Predicate, key_match: KeyMatch) -> Vec<Arc<Provider>> {
        self.providers()
            .into_iter()
            .filter(|p| predicate.matches(p.attributes(), key_match))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cell.read(|state| state.providers.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // 통계
    // ========================================================================

    /// 레지스트리 통계
    pub fn stats(&self) -> RegistryStats {
        let (providers, subscriptions) =
            self.cell.read(|state| (state.providers.len(), state.subscriptions.len()));

        RegistryStats {
            name: self.name.to_string(),
            providers,
            subscriptions,
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("name", &self.name)
            .finish()
    }
}

/// 레지스트리 통계
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub name: String,
    pub providers: usize,
    pub subscriptions: usize,
    /// 누적 발행 횟수
    pub delivered: u64,
    /// 누적 전달 실패 횟수
    pub delivery_failures: u64,
}

// ============================================================================
// SubscriptionHandle
// ============================================================================

/// 구독 핸들
///
/// `close()`를 호출해야 구독이 끝난다. drop만으로는 닫히지 않는다.
pub struct SubscriptionHandle {
    registry: Weak<CapabilityRegistry>,
    subscription: Arc<FilteredSubscription>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    /// 구독 종료
    ///
    /// 살아있는 구독 집합에서 빠지고, 발행했던 효과를 모두 철회한다. 멱등이다.
    pub fn close(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.subscription.id());
        }
        self.subscription.close();
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }

    /// 현재 발행 중인 Provider 목록
    pub fn published(&self) -> Vec<ProviderId> {
        self.subscription.published()
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("subscription", &self.subscription)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::sink::{publication_fn, sink_fn};
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording_sink(tag: &'static str, log: Log) -> Arc<dyn ProviderSink> {
        sink_fn(move |provider| {
            log.lock().push(format!("{}+{}", tag, provider.name()));
            let log = log.clone();
            let name = provider.name().to_string();
            Ok(publication_fn(move || {
                log.lock().push(format!("{}-{}", tag, name));
            }))
        })
    }

    fn attrs(name: &str, kind: &str) -> Attributes {
        Attributes::new()
            .with("whiteboard.name", name)
            .with("kind", kind)
    }

    fn auth() -> Predicate {
        Predicate::parse("(kind=auth)").unwrap()
    }

    #[test]
    fn test_register_assigns_increasing_sequence() {
        let registry = CapabilityRegistry::new("test");
        let a = registry.register(ProviderId(10), attrs("a", "auth")).unwrap();
        let b = registry.register(ProviderId(2), attrs("b", "auth")).unwrap();

        assert!(a.sequence() < b.sequence());
        let names: Vec<_> = registry.providers().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_register_fails() {
        let registry = CapabilityRegistry::new("test");
        registry.register(ProviderId(1), attrs("a", "auth")).unwrap();

        let result = registry.register(ProviderId(1), attrs("a", "auth"));
        assert!(matches!(result, Err(Error::DuplicateProvider(ProviderId(1)))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_subscribe_replays_existing_providers() {
        let registry = CapabilityRegistry::new("test");
        let log: Log = Arc::default();

        registry.register(ProviderId(1), attrs("a", "auth")).unwrap();
        registry.register(ProviderId(2), attrs("b", "log")).unwrap();

        let handle = registry.subscribe(auth(), KeyMatch::Exact, recording_sink("s", log.clone()));
        assert_eq!(*log.lock(), vec!["s+a"]);
        assert_eq!(handle.published(), vec![ProviderId(1)]);
    }

    #[test]
    fn test_unregister_retracts_before_return() {
        let registry = CapabilityRegistry::new("test");
        let log: Log = Arc::default();

        let _handle = registry.subscribe(auth(), KeyMatch::Exact, recording_sink("s", log.clone()));
        registry.register(ProviderId(1), attrs("a", "auth")).unwrap();

        let removed = registry.unregister(ProviderId(1)).unwrap();
        assert_eq!(removed.name(), "a");
        assert_eq!(*log.lock(), vec!["s+a", "s-a"]);

        assert!(registry.unregister(ProviderId(1)).is_none());
    }

    #[test]
    fn test_handle_close_detaches_and_retracts() {
        let registry = CapabilityRegistry::new("test");
        let log: Log = Arc::default();

        registry.register(ProviderId(1), attrs("a", "auth")).unwrap();
        let handle = registry.subscribe(auth(), KeyMatch::Exact, recording_sink("s", log.clone()));

        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert_eq!(registry.stats().subscriptions, 0);

        registry.register(ProviderId(2), attrs("b", "auth")).unwrap();
        assert_eq!(*log.lock(), vec!["s+a", "s-a"]);
    }

    #[test]
    fn test_failing_sink_does_not_block_others() {
        let registry = CapabilityRegistry::new("test");
        let log: Log = Arc::default();

        let _bad = registry.subscribe(
            auth(),
            KeyMatch::Exact,
            sink_fn(|_| Err(Error::Sink("boom".into()))),
        );
        let _good = registry.subscribe(auth(), KeyMatch::Exact, recording_sink("g", log.clone()));

        registry.register(ProviderId(1), attrs("a", "auth")).unwrap();

        assert_eq!(*log.lock(), vec!["g+a"]);
        let stats = registry.stats();
        assert_eq!(stats.delivery_failures, 1);
        assert_eq!(stats.delivered, 1);
    }

    #[test]
    fn test_reentrant_sink_keeps_fifo_order() {
        let registry = CapabilityRegistry::new("test");
        let log: Log = Arc::default();

        // "a"가 발행되면 sink 안에서 "b"를 등록한다
        let inner = Arc::downgrade(&registry);
        let l = log.clone();
        let _chain = registry.subscribe(
            Predicate::parse("(whiteboard.name=a)").unwrap(),
            KeyMatch::Exact,
            sink_fn(move |_| {
                l.lock().push("chain+a".into());
                if let Some(registry) = inner.upgrade() {
                    registry.register(ProviderId(2), attrs("b", "auth"))?;
                }
                Ok(publication_fn(|| {}))
            }),
        );
        let _watch = registry.subscribe(auth(), KeyMatch::Exact, recording_sink("w", log.clone()));

        registry.register(ProviderId(1), attrs("a", "auth")).unwrap();

        // "a"에 대한 전달이 모두 끝난 뒤에야 "b"가 전달된다
        assert_eq!(*log.lock(), vec!["chain+a", "w+a", "w+b"]);
        assert!(registry.contains(ProviderId(2)));
    }

    #[test]
    fn test_concurrent_subscribe_sees_each_provider_once() {
        use std::collections::BTreeMap;
        use std::sync::atomic::AtomicBool;

        const PROVIDERS: u64 = 40;
        const SUBSCRIBERS: usize = 4;

        let registry = CapabilityRegistry::new("test");
        let duplicate = Arc::new(AtomicBool::new(false));

        let handles = std::thread::scope(|scope| {
            scope.spawn(|| {
                for id in 1..=PROVIDERS {
                    registry.register(ProviderId(id), attrs("p", "auth")).unwrap();
                }
                for id in (1..=PROVIDERS).filter(|id| id % 2 == 1) {
                    registry.unregister(ProviderId(id));
                }
            });

            let subscribers: Vec<_> = (0..SUBSCRIBERS)
                .map(|_| {
                    let registry = &registry;
                    let duplicate = duplicate.clone();
                    scope.spawn(move || {
                        // Provider별 현재 발행 수
                        let live: Arc<Mutex<BTreeMap<ProviderId, i32>>> = Arc::default();
                        let l = live.clone();
                        let sink = sink_fn(move |provider| {
                            let id = provider.id();
                            let mut live = l.lock();
                            let count = live.entry(id).or_insert(0);
                            *count += 1;
                            if *count > 1 {
                                duplicate.store(true, Ordering::SeqCst);
                            }
                            let l = l.clone();
                            Ok(publication_fn(move || {
                                *l.lock().entry(id).or_insert(0) -= 1;
                            }))
                        });
                        let handle = registry.subscribe(auth(), KeyMatch::Exact, sink);
                        (handle, live)
                    })
                })
                .collect();

            subscribers
                .into_iter()
                .map(|s| s.join().unwrap())
                .collect::<Vec<_>>()
        });

        let expected: Vec<_> = (1..=PROVIDERS)
            .filter(|id| id % 2 == 0)
            .map(ProviderId)
            .collect();

        assert!(!duplicate.load(Ordering::SeqCst));
        assert_eq!(registry.stats().subscriptions, SUBSCRIBERS);
        for (handle, live) in &handles {
            assert_eq!(handle.published(), expected);
            let live: Vec<_> = live
                .lock()
                .iter()
                .filter(|(_, count)| **count != 0)
                .map(|(id, count)| {
                    assert_eq!(*count, 1);
                    *id
                })
                .collect();
            assert_eq!(live, expected);
        }
    }

    #[test]
    fn test_matching_respects_key_match() {
        let registry = CapabilityRegistry::new("test");
        registry
            .register(ProviderId(1), Attributes::new().with("Kind", "auth"))
            .unwrap();

        assert!(registry.matching(&auth(), KeyMatch::Exact).is_empty());
        assert_eq!(registry.matching(&auth(), KeyMatch::IgnoreCase).len(), 1);
    }
}
