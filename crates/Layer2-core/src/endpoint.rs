//! Endpoint - 외부 엔드포인트 빌더와의 경계
//!
//! 활성화된 Provider는 [`EndpointBuilder`]를 통해 실제 엔드포인트로 바인딩된다.
//! 빌더는 느리거나 실패할 수 있다. 실패는 런타임 상태에 기록될 뿐 전파되지 않는다.

use crate::whiteboard::ProviderKind;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::info;
use whiteboard_foundation::{Error, Provider, ProviderId, Result};

// ============================================================================
// Contract
// ============================================================================

/// 바인딩 요청
#[derive(Debug, Clone)]
pub struct BindRequest {
    pub provider: Arc<Provider>,
    pub kind: ProviderKind,
    /// 바인딩이 속할 Application (Application/Capability는 자기 이름)
    pub owner: String,
}

/// 바인딩된 엔드포인트
pub trait EndpointHandle: Send + Sync {
    /// 바인딩 해제 (한 번만 호출된다)
    fn unbind(self: Box<Self>);
}

/// 엔드포인트 빌더
pub trait EndpointBuilder: Send + Sync {
    fn bind_endpoint(&self, request: &BindRequest) -> Result<Box<dyn EndpointHandle>>;
}

// ============================================================================
// LoggingEndpointBuilder
// ============================================================================

/// 바인딩을 로그로만 남기는 빌더
///
/// 지정한 Provider는 인스턴스를 만들 수 없는 것처럼 거부한다.
#[derive(Default)]
pub struct LoggingEndpointBuilder {
    refused: HashSet<ProviderId>,
    bound: Arc<Mutex<BTreeMap<ProviderId, String>>>,
}

impl LoggingEndpointBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 거부할 Provider 지정
    pub fn refuse(mut self, ids: impl IntoIterator<Item = ProviderId>) -> Self {
        self.refused.extend(ids);
        self
    }

    /// 현재 바인딩된 Provider → owner
    pub fn bound(&self) -> BTreeMap<ProviderId, String> {
        self.bound.lock().clone()
    }
}

impl EndpointBuilder for LoggingEndpointBuilder {
    fn bind_endpoint(&self, request: &BindRequest) -> Result<Box<dyn EndpointHandle>> {
        let provider = &request.provider;
        if self.refused.contains(&provider.id()) {
            return Err(Error::NotRetrievable(format!(
                "{} could not be materialized",
                provider
            )));
        }

        info!(
            kind = %request.kind,
            owner = %request.owner,
            provider = %provider,
            "Endpoint bound"
        );
        self.bound.lock().insert(provider.id(), request.owner.clone());

        Ok(Box::new(LoggingHandle {
            id: provider.id(),
            label: provider.to_string(),
            bound: self.bound.clone(),
        }))
    }
}

struct LoggingHandle {
    id: ProviderId,
    label: String,
    bound: Arc<Mutex<BTreeMap<ProviderId, String>>>,
}

impl EndpointHandle for LoggingHandle {
    fn unbind(self: Box<Self>) {
        self.bound.lock().remove(&self.id);
        info!(provider = %self.label, "Endpoint unbound");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whiteboard_foundation::Attributes;

    fn request(id: u64) -> BindRequest {
        BindRequest {
            provider: Arc::new(Provider::new(ProviderId(id), Attributes::new(), id)),
            kind: ProviderKind::Capability,
            owner: "owner".into(),
        }
    }

    #[test]
    fn test_bind_and_unbind() {
        let builder = LoggingEndpointBuilder::new();
        let handle = builder.bind_endpoint(&request(1)).unwrap();
        assert_eq!(builder.bound().get(&ProviderId(1)).map(String::as_str), Some("owner"));

        handle.unbind();
        assert!(builder.bound().is_empty());
    }

    #[test]
    fn test_refused_provider() {
        let builder = LoggingEndpointBuilder::new().refuse([ProviderId(2)]);
        let result = builder.bind_endpoint(&request(2));
        assert!(matches!(result, Err(Error::NotRetrievable(_))));
        assert!(builder.bound().is_empty());
    }
}
