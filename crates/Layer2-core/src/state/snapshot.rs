//! Snapshot - 런타임 상태의 특정 시점 사본
//!
//! 직렬화 가능하며 원본 상태와 독립적이다.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;
use whiteboard_foundation::{Attributes, FailureCategory, Provider, ProviderId};

// ============================================================================
// Outcome
// ============================================================================

/// Provider 하나가 놓인 위치
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
    /// 바인딩됨 (owner 아래)
    Bound { owner: String },
    /// 실패 카테고리에 기록됨
    Failed { category: FailureCategory },
}

impl Outcome {
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound { .. })
    }

    pub fn failure(&self) -> Option<FailureCategory> {
        match self {
            Self::Failed { category } => Some(*category),
            Self::Bound { .. } => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bound { owner } => write!(f, "bound({})", owner),
            Self::Failed { category } => write!(f, "{}", category),
        }
    }
}

// ============================================================================
// Summaries
// ============================================================================

/// 스냅샷에 담기는 Provider 요약
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    pub id: ProviderId,
    pub name: String,
    /// 이름이 `whiteboard.name`이 아닌 identity에서 생성됨
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub name_generated: bool,
    pub rank: i32,
    pub attributes: Attributes,
}

impl From<&Arc<Provider>> for ProviderSummary {
    fn from(provider: &Arc<Provider>) -> Self {
        Self {
            id: provider.id(),
            name: provider.name().to_string(),
            name_generated: provider.is_name_generated(),
            rank: provider.rank(),
            attributes: provider.attributes().clone(),
        }
    }
}

/// 실패 기록 요약
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSummary {
    pub provider: ProviderSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

// ============================================================================
// Snapshot
// ============================================================================

/// 런타임 상태 스냅샷
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// 스냅샷 ID
    pub id: Uuid,
    /// 스냅샷 시점의 상태 epoch
    pub epoch: u64,
    /// 생성 시간
    pub taken_at: DateTime<Utc>,
    /// owner → 바인딩된 Provider (id 순)
    pub bound: BTreeMap<String, Vec<ProviderSummary>>,
    /// 실패 카테고리 → Provider (id 순)
    pub failures: BTreeMap<FailureCategory, Vec<FailureSummary>>,
}

impl Snapshot {
    pub(crate) fn new(
        epoch: u64,
        bound: BTreeMap<String, Vec<ProviderSummary>>,
        failures: BTreeMap<FailureCategory, Vec<FailureSummary>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            taken_at: Utc::now(),
            bound,
            failures,
        }
    }

    /// owner 아래 바인딩된 Provider
    pub fn bound(&self, owner: &str) -> &[ProviderSummary] {
        self.bound.get(owner).map(Vec::as_slice).unwrap_or_default()
    }

    /// 카테고리에 기록된 실패
    pub fn failures(&self, category: FailureCategory) -> &[FailureSummary] {
        self.failures
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_bound(&self, id: ProviderId) -> bool {
        self.bound.values().flatten().any(|p| p.id == id)
    }

    /// Provider가 놓인 위치
    pub fn category_of(&self, id: ProviderId) -> Option<Outcome> {
        for (owner, providers) in &self.bound {
            if providers.iter().any(|p| p.id == id) {
                return Some(Outcome::Bound {
                    owner: owner.clone(),
                });
            }
        }
        self.failures.iter().find_map(|(category, records)| {
            records
                .iter()
                .any(|r| r.provider.id == id)
                .then_some(Outcome::Failed {
                    category: *category,
                })
        })
    }

    /// 바인딩된 Provider 수
    pub fn bound_count(&self) -> usize {
        self.bound.values().map(Vec::len).sum()
    }

    /// 실패로 기록된 Provider 수
    pub fn failure_count(&self) -> usize {
        self.failures.values().map(Vec::len).sum()
    }
}
