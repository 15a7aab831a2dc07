//! Provider Kind - Provider 종류와 선택 필터

use serde::{Deserialize, Serialize};
use std::fmt;
use whiteboard_foundation::{
    Attributes, KeyMatch, Predicate, APPLICATION_BASE_KEY, EXTENSION_KEY, RESOURCE_KEY,
};

/// Provider 종류 (닫힌 집합)
///
/// 각 Provider는 속성에 따라 정확히 하나의 종류로 분류된다.
/// 우선순위: Application > Extension > Resource > Capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `whiteboard.application.base` 보유
    Application,
    /// `whiteboard.extension=true`
    Extension,
    /// `whiteboard.resource=true`
    Resource,
    /// 그 외 (다른 Provider의 의존성 대상)
    Capability,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        Self::Application,
        Self::Extension,
        Self::Resource,
        Self::Capability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Extension => "extension",
            Self::Resource => "resource",
            Self::Capability => "capability",
        }
    }

    /// 이 종류를 고르는 선택 필터 (키는 대소문자 무시로 평가한다)
    pub fn selection(&self) -> Predicate {
        let application = Predicate::Present(APPLICATION_BASE_KEY.to_string());
        let extension = Predicate::equal(EXTENSION_KEY, "true");
        let resource = Predicate::equal(RESOURCE_KEY, "true");
        let not = |p: &Predicate| Predicate::Not(Box::new(p.clone()));

        match self {
            Self::Application => application,
            Self::Extension => Predicate::And(vec![extension.clone(), not(&application)]),
            Self::Resource => Predicate::And(vec![
                resource.clone(),
                not(&extension),
                not(&application),
            ]),
            Self::Capability => Predicate::Not(Box::new(Predicate::Or(vec![
                application,
                extension,
                resource,
            ]))),
        }
    }

    /// 속성으로 종류 판정
    pub fn classify(attributes: &Attributes) -> Self {
        Self::ALL
            .into_iter()
            .find(|kind| kind.selection().matches(attributes, KeyMatch::IgnoreCase))
            .unwrap_or(Self::Capability)
    }

    /// Application에 붙는 종류인지
    pub fn needs_context(&self) -> bool {
        matches!(self, Self::Extension | Self::Resource)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
