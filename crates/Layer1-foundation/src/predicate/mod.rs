//! # Predicate - 속성 맵에 대한 질의식
//!
//! LDAP 스타일 필터를 파싱하여 [`Predicate`] 트리로 만들고,
//! Provider의 [`Attributes`]에 대해 평가한다.
//!
//! ## 문법
//!
//! ```text
//! filter     = "(" body ")"
//! body       = "&" filter+ | "|" filter+ | "!" filter | item
//! item       = key op value
//! op         = "=" | ">=" | "<=" | "~="
//! value      = "*"            (presence)
//!            | a*b*c          (wildcard, "=" 에서만)
//! ```
//!
//! `\` 는 값 안의 `(`, `)`, `*`, `\` 를 이스케이프한다.
//!
//! ## 키 대소문자
//!
//! 키 비교 방식은 호출하는 쪽이 [`KeyMatch`]로 정한다. Provider 속성에 대한
//! 선택 필터는 `IgnoreCase`, 레지스트리 의존성 식은 `Exact`를 쓴다.
//!
//! ```ignore
//! let predicate = Predicate::parse("(&(kind=auth)(!(region=eu*)))")?;
//! assert!(predicate.matches(&attrs, KeyMatch::Exact));
//! ```

mod parser;

use crate::attribute::{AttributeValue, Attributes};
use crate::error::Result;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// KeyMatch
// ============================================================================

/// 속성 키 비교 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyMatch {
    /// 정확히 같은 키만
    #[default]
    Exact,
    /// ASCII 대소문자 무시
    IgnoreCase,
}

// ============================================================================
// Predicate
// ============================================================================

/// 비교 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    GreaterOrEqual,
    LessOrEqual,
    Approximate,
}

impl Comparison {
    fn symbol(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::Approximate => "~=",
        }
    }
}

/// 파싱된 질의식 (불변)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// `(key=*)`
    Present(String),
    /// `(key op value)`
    Compare {
        key: String,
        op: Comparison,
        value: String,
    },
    /// `(key=a*b*c)` - 조각 사이는 임의의 문자열
    Wildcard { key: String, parts: Vec<String> },
}

impl Predicate {
    /// 필터 문자열 파싱
    pub fn parse(filter: &str) -> Result<Self> {
        parser::parse(filter)
    }

    /// 단순 동등 비교 생성 헬퍼
    pub fn equal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Compare {
            key: key.into(),
            op: Comparison::Equal,
            value: value.into(),
        }
    }

    /// 속성 맵에 대해 평가
    pub fn matches(&self, attributes: &Attributes, key_match: KeyMatch) -> bool {
        match self {
            Self::And(items) => items.iter().all(|p| p.matches(attributes, key_match)),
            Self::Or(items) => items.iter().any(|p| p.matches(attributes, key_match)),
            Self::Not(inner) => !inner.matches(attributes, key_match),
            Self::Present(key) => lookup(attributes, key, key_match).is_some(),
            Self::Compare { key, op, value } => lookup(attributes, key, key_match)
                .map(|actual| compare_value(actual, *op, value))
                .unwrap_or(false),
            Self::Wildcard { key, parts } => lookup(attributes, key, key_match)
                .map(|actual| wildcard_value(actual, parts))
                .unwrap_or(false),
        }
    }
}

impl FromStr for Predicate {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(items) => {
                write!(f, "(&")?;
                for item in items {
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Self::Or(items) => {
                write!(f, "(|")?;
                for item in items {
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Self::Not(inner) => write!(f, "(!{})", inner),
            Self::Present(key) => write!(f, "({}=*)", key),
            Self::Compare { key, op, value } => {
                write!(f, "({}{}{})", key, op.symbol(), escape(value))
            }
            Self::Wildcard { key, parts } => {
                let rendered: Vec<String> = parts.iter().map(|p| escape(p)).collect();
                write!(f, "({}={})", key, rendered.join("*"))
            }
        }
    }
}

// ============================================================================
// 평가 헬퍼
// ============================================================================

fn lookup<'a>(attributes: &'a Attributes, key: &str, key_match: KeyMatch) -> Option<&'a AttributeValue> {
    match key_match {
        KeyMatch::Exact => attributes.get(key),
        KeyMatch::IgnoreCase => attributes.get_ignore_case(key),
    }
}

fn compare_value(actual: &AttributeValue, op: Comparison, operand: &str) -> bool {
    match actual {
        AttributeValue::List(items) => items.iter().any(|item| compare_value(item, op, operand)),
        AttributeValue::String(s) => match op {
            Comparison::Equal => s == operand,
            Comparison::GreaterOrEqual => s.as_str() >= operand,
            Comparison::LessOrEqual => s.as_str() <= operand,
            Comparison::Approximate => normalize(s) == normalize(operand),
        },
        AttributeValue::Integer(i) => match operand.trim().parse::<i64>() {
            Ok(rhs) => match op {
                Comparison::Equal | Comparison::Approximate => *i == rhs,
                Comparison::GreaterOrEqual => *i >= rhs,
                Comparison::LessOrEqual => *i <= rhs,
            },
            Err(_) => false,
        },
        AttributeValue::Float(x) => match operand.trim().parse::<f64>() {
            Ok(rhs) => match op {
                Comparison::Equal | Comparison::Approximate => *x == rhs,
                Comparison::GreaterOrEqual => *x >= rhs,
                Comparison::LessOrEqual => *x <= rhs,
            },
            Err(_) => false,
        },
        AttributeValue::Bool(b) => match op {
            Comparison::Equal | Comparison::Approximate => {
                AttributeValue::from(operand.trim()).as_bool() == Some(*b)
            }
            _ => false,
        },
    }
}

fn wildcard_value(actual: &AttributeValue, parts: &[String]) -> bool {
    match actual {
        AttributeValue::List(items) => items.iter().any(|item| wildcard_value(item, parts)),
        AttributeValue::String(s) => wildcard_match(s, parts),
        _ => false,
    }
}

/// `parts`는 `*`로 나뉜 조각들. 첫 조각은 접두사, 마지막은 접미사로 고정된다.
fn wildcard_match(text: &str, parts: &[String]) -> bool {
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return true,
    };
    let Some(mut remaining) = text.strip_prefix(first.as_str()) else {
        return false;
    };
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return remaining.is_empty(),
    };

    for part in middle {
        match remaining.find(part.as_str()) {
            Some(pos) => remaining = &remaining[pos + part.len()..],
            None => return false,
        }
    }

    remaining.ends_with(last.as_str())
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
