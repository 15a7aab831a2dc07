//! Filtered Subscription - 질의식 → sink 바인딩
//!
//! Provider 추가/제거 이벤트마다 질의식을 평가하여 sink에 발행/철회한다.
//! 발행한 Provider를 기억하므로 철회는 정확하고 멱등이다.

use super::sink::{ProviderSink, Publication};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use whiteboard_foundation::{KeyMatch, Predicate, Provider, ProviderId, Result};

/// 구독 ID (레지스트리 안에서 유일, 생성 순서대로 증가)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription-{}", self.0)
    }
}

/// 질의식과 sink를 묶은 구독
pub struct FilteredSubscription {
    id: SubscriptionId,
    predicate: Predicate,
    key_match: KeyMatch,
    sink: Arc<dyn ProviderSink>,
    /// 발행된 Provider → 철회 핸들
    published: Mutex<BTreeMap<ProviderId, Box<dyn Publication>>>,
    closed: AtomicBool,
}

impl FilteredSubscription {
    pub fn new(
        id: SubscriptionId,
        predicate: Predicate,
        key_match: KeyMatch,
        sink: Arc<dyn ProviderSink>,
    ) -> Self {
        Self {
            id,
            predicate,
            key_match,
            sink,
            published: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Provider 추가 통보
    ///
    /// 매칭되면 sink에 발행하고 `true`를 반환한다. sink 에러는 그대로 전파되며
    /// 이 경우 아무 것도 기억하지 않는다.
    pub fn on_provider_added(&self, provider: &Arc<Provider>) -> Result<bool> {
        if self.is_closed() || !self.predicate.matches(provider.attributes(), self.key_match) {
            return Ok(false);
        }
        if self.published.lock().contains_key(&provider.id()) {
            return Ok(false);
        }

        let publication = self.sink.publish(provider)?;

        let mut published = self.published.lock();
        if self.is_closed() || published.contains_key(&provider.id()) {
            // close()와 경합했거나 이미 발행됨: 방금 만든 효과는 바로 철회
            drop(published);
            publication.retract();
            return Ok(false);
        }
        published.insert(provider.id(), publication);

        trace!(subscription = %self.id, provider_id = %provider.id(), "Published provider");
        Ok(true)
    }

    /// Provider 제거 통보
    ///
    /// 발행했던 Provider면 철회하고 `true`를 반환한다.
    pub fn on_provider_removed(&self, id: ProviderId) -> bool {
        let publication = self.published.lock().remove(&id);
        match publication {
            Some(publication) => {
                publication.retract();
                trace!(subscription = %self.id, provider_id = %id, "Retracted provider");
                true
            }
            None => false,
        }
    }

    /// 구독 종료 - 발행했던 모든 효과를 한 번씩 철회
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained = std::mem::take(&mut *self.published.lock());
        debug!(
            subscription = %self.id,
            filter = %self.predicate,
            retracted = drained.len(),
            "Closing subscription"
        );

        for (_, publication) in drained {
            publication.retract();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 현재 발행 중인 Provider 목록
    pub fn published(&self) -> Vec<ProviderId> {
        self.published.lock().keys().copied().collect()
    }
}

impl fmt::Debug for FilteredSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteredSubscription")
            .field("id", &self.id)
            .field("predicate", &self.predicate.to_string())
            .field("key_match", &self.key_match)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::sink::{publication_fn, sink_fn};
    use std::sync::atomic::AtomicUsize;
    use whiteboard_foundation::{Attributes, Error};

    struct Counters {
        published: AtomicUsize,
        retracted: AtomicUsize,
    }

    fn counting_sink() -> (Arc<Counters>, Arc<dyn ProviderSink>) {
        let counters = Arc::new(Counters {
            published: AtomicUsize::new(0),
            retracted: AtomicUsize::new(0),
        });
        let c = counters.clone();
        let sink = sink_fn(move |_| {
            c.published.fetch_add(1, Ordering::SeqCst);
            let c = c.clone();
            Ok(publication_fn(move || {
                c.retracted.fetch_add(1, Ordering::SeqCst);
            }))
        });
        (counters, sink)
    }

    fn provider(id: u64, kind: &str) -> Arc<Provider> {
        Arc::new(Provider::new(
            ProviderId(id),
            Attributes::new().with("kind", kind),
            id,
        ))
    }

    fn subscription(sink: Arc<dyn ProviderSink>) -> FilteredSubscription {
        FilteredSubscription::new(
            SubscriptionId(1),
            Predicate::parse("(kind=auth)").unwrap(),
            KeyMatch::Exact,
            sink,
        )
    }

    #[test]
    fn test_publish_only_matching() {
        let (counters, sink) = counting_sink();
        let sub = subscription(sink);

        assert!(sub.on_provider_added(&provider(1, "auth")).unwrap());
        assert!(!sub.on_provider_added(&provider(2, "log")).unwrap());
        // 같은 Provider 재통보는 무시
        assert!(!sub.on_provider_added(&provider(1, "auth")).unwrap());

        assert_eq!(counters.published.load(Ordering::SeqCst), 1);
        assert_eq!(sub.published(), vec![ProviderId(1)]);
    }

    #[test]
    fn test_remove_is_exact_and_idempotent() {
        let (counters, sink) = counting_sink();
        let sub = subscription(sink);

        sub.on_provider_added(&provider(1, "auth")).unwrap();
        assert!(!sub.on_provider_removed(ProviderId(2)));
        assert!(sub.on_provider_removed(ProviderId(1)));
        assert!(!sub.on_provider_removed(ProviderId(1)));

        assert_eq!(counters.retracted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_twice_retracts_once() {
        let (counters, sink) = counting_sink();
        let sub = subscription(sink);

        sub.on_provider_added(&provider(1, "auth")).unwrap();
        sub.on_provider_added(&provider(2, "auth")).unwrap();

        sub.close();
        sub.close();

        assert!(sub.is_closed());
        assert_eq!(counters.retracted.load(Ordering::SeqCst), 2);
        assert!(sub.published().is_empty());

        // 닫힌 뒤에는 발행하지 않는다
        assert!(!sub.on_provider_added(&provider(3, "auth")).unwrap());
        assert_eq!(counters.published.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sink_error_propagates_without_record() {
        let sink = sink_fn(|_| Err(Error::Sink("refused".into())));
        let sub = subscription(sink);

        let result = sub.on_provider_added(&provider(1, "auth"));
        assert!(matches!(result, Err(Error::Sink(_))));
        assert!(sub.published().is_empty());
    }

    #[test]
    fn test_close_during_publish_retracts_fresh_handle() {
        let counters = Arc::new(Counters {
            published: AtomicUsize::new(0),
            retracted: AtomicUsize::new(0),
        });

        // sink가 발행 도중 구독을 닫는 상황 (동시 close 경합 재현)
        let slot: Arc<Mutex<Option<Arc<FilteredSubscription>>>> = Arc::new(Mutex::new(None));
        let c = counters.clone();
        let s = slot.clone();
        let sink = sink_fn(move |_| {
            if let Some(sub) = s.lock().clone() {
                sub.close();
            }
            c.published.fetch_add(1, Ordering::SeqCst);
            let c = c.clone();
            Ok(publication_fn(move || {
                c.retracted.fetch_add(1, Ordering::SeqCst);
            }))
        });

        let sub = Arc::new(subscription(sink));
        *slot.lock() = Some(sub.clone());

        assert!(!sub.on_provider_added(&provider(1, "auth")).unwrap());
        assert_eq!(counters.published.load(Ordering::SeqCst), 1);
        assert_eq!(counters.retracted.load(Ordering::SeqCst), 1);
        assert!(sub.published().is_empty());
    }

    #[test]
    fn test_close_from_other_thread_during_publish() {
        let counters = Arc::new(Counters {
            published: AtomicUsize::new(0),
            retracted: AtomicUsize::new(0),
        });
        let entered = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));

        // 발행이 진행 중인 동안 다른 스레드가 close()를 끝낸다
        let c = counters.clone();
        let (e, d) = (entered.clone(), done.clone());
        let sink = sink_fn(move |_| {
            e.store(true, Ordering::SeqCst);
            while !d.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }
            c.published.fetch_add(1, Ordering::SeqCst);
            let c = c.clone();
            Ok(publication_fn(move || {
                c.retracted.fetch_add(1, Ordering::SeqCst);
            }))
        });
        let sub = subscription(sink);

        let added = std::thread::scope(|scope| {
            let publisher = scope.spawn(|| sub.on_provider_added(&provider(1, "auth")));
            scope.spawn(|| {
                while !entered.load(Ordering::SeqCst) {
                    std::thread::yield_now();
                }
                sub.close();
                done.store(true, Ordering::SeqCst);
            });
            publisher.join().unwrap()
        });

        assert!(!added.unwrap());
        assert!(sub.is_closed());
        assert_eq!(counters.published.load(Ordering::SeqCst), 1);
        assert_eq!(counters.retracted.load(Ordering::SeqCst), 1);
        assert!(sub.published().is_empty());
    }
}
