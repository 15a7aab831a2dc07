//! Sink - 구독이 매칭된 Provider를 넘기는 하류 인터페이스

use std::sync::Arc;
use whiteboard_foundation::{Provider, Result};

// ============================================================================
// Publication - 발행 결과 핸들
// ============================================================================

/// 하류에 발행된 효과 하나
///
/// `retract`는 값을 소비하므로 같은 효과를 두 번 철회할 수 없다.
pub trait Publication: Send + Sync {
    /// 발행 효과 철회
    fn retract(self: Box<Self>);
}

/// 아무 것도 하지 않는 Publication
pub struct NoopPublication;

impl Publication for NoopPublication {
    fn retract(self: Box<Self>) {}
}

/// 클로저 기반 Publication
pub struct FnPublication<F: FnOnce() + Send + Sync> {
    on_retract: F,
}

impl<F: FnOnce() + Send + Sync> Publication for FnPublication<F> {
    fn retract(self: Box<Self>) {
        (self.on_retract)()
    }
}

/// 철회 시 클로저를 실행하는 Publication 생성
pub fn publication_fn<F>(on_retract: F) -> Box<dyn Publication>
where
    F: FnOnce() + Send + Sync + 'static,
{
    Box::new(FnPublication { on_retract })
}

// ============================================================================
// ProviderSink - 하류 sink
// ============================================================================

/// Filtered Subscription의 하류
pub trait ProviderSink: Send + Sync {
    /// 매칭된 Provider 발행
    ///
    /// 실패하면 아무 효과도 남기지 않아야 한다.
    fn publish(&self, provider: &Arc<Provider>) -> Result<Box<dyn Publication>>;
}

/// 클로저 기반 sink
pub struct FnSink<F> {
    publish: F,
}

impl<F> ProviderSink for FnSink<F>
where
    F: Fn(&Arc<Provider>) -> Result<Box<dyn Publication>> + Send + Sync,
{
    fn publish(&self, provider: &Arc<Provider>) -> Result<Box<dyn Publication>> {
        (self.publish)(provider)
    }
}

/// 클로저로 sink 생성
pub fn sink_fn<F>(publish: F) -> Arc<dyn ProviderSink>
where
    F: Fn(&Arc<Provider>) -> Result<Box<dyn Publication>> + Send + Sync + 'static,
{
    Arc::new(FnSink { publish })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use whiteboard_foundation::{Attributes, ProviderId};

    #[test]
    fn test_fn_sink_and_publication() {
        let retracted = Arc::new(AtomicUsize::new(0));
        let counter = retracted.clone();

        let sink = sink_fn(move |_provider| {
            let counter = counter.clone();
            Ok(publication_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
        });

        let provider = Arc::new(Provider::new(ProviderId(1), Attributes::new(), 0));
        let publication = sink.publish(&provider).unwrap();
        assert_eq!(retracted.load(Ordering::SeqCst), 0);

        publication.retract();
        assert_eq!(retracted.load(Ordering::SeqCst), 1);
    }
}
