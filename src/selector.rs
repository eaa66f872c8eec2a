//! Label selectors
//!
//! Transformers are picked, overridden and linked to each other through
//! Kubernetes style label selectors. Two spellings are accepted:
//!
//! - the string form used on the command line: `app=web,tier!=db,env in (dev,qa),!legacy`
//! - the structured form used in transformer YAML (`matchLabels` / `matchExpressions`)
//!
//! Both compile down to a [`Selector`], a conjunction of [`Requirement`]s.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Labels attached to a transformer
pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Invalid label key '{0}'")]
    InvalidKey(String),

    #[error("Invalid label value '{value}' for key '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("Unsupported selector operator '{0}'")]
    UnknownOperator(String),

    #[error("Malformed selector requirement '{0}'")]
    Malformed(String),

    #[error("Operator '{operator}' on key '{key}' requires at least one value")]
    MissingValues { key: String, operator: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// A single `key <op> values` clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: Vec<String>,
}

impl Requirement {
    pub fn new(key: &str, operator: Operator, values: Vec<String>) -> Result<Self, SelectorError> {
        if !key_regex().is_match(key) {
            return Err(SelectorError::InvalidKey(key.to_string()));
        }
        for value in &values {
            if !value_regex().is_match(value) {
                return Err(SelectorError::InvalidValue {
                    key: key.to_string(),
                    value: value.clone(),
                });
            }
        }
        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(SelectorError::MissingValues {
                    key: key.to_string(),
                    operator: format!("{:?}", operator),
                });
            }
            Operator::Equals | Operator::NotEquals if values.len() != 1 => {
                return Err(SelectorError::Malformed(key.to_string()));
            }
            _ => {}
        }
        Ok(Self {
            key: key.to_string(),
            operator,
            values,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        let actual = labels.get(&self.key);
        match self.operator {
            Operator::Exists => actual.is_some(),
            Operator::DoesNotExist => actual.is_none(),
            Operator::Equals | Operator::In => actual.map_or(false, |v| self.values.contains(v)),
            Operator::NotEquals | Operator::NotIn => {
                actual.map_or(true, |v| !self.values.contains(v))
            }
        }
    }

    fn parse(raw: &str) -> Result<Self, SelectorError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SelectorError::Malformed(raw.to_string()));
        }

        if let Some(key) = raw.strip_prefix('!') {
            return Self::new(key.trim(), Operator::DoesNotExist, Vec::new());
        }

        if let Some(caps) = set_regex().captures(raw) {
            let operator = match &caps[2] {
                "in" => Operator::In,
                _ => Operator::NotIn,
            };
            let values = caps[3]
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            return Self::new(&caps[1], operator, values);
        }

        for (token, operator) in [
            ("!=", Operator::NotEquals),
            ("==", Operator::Equals),
            ("=", Operator::Equals),
        ] {
            if let Some((key, value)) = raw.split_once(token) {
                return Self::new(key.trim(), operator, vec![value.trim().to_string()]);
            }
        }

        if raw.contains(char::is_whitespace) || raw.contains('(') {
            return Err(SelectorError::Malformed(raw.to_string()));
        }
        Self::new(raw, Operator::Exists, Vec::new())
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::Equals => write!(f, "{}={}", self.key, self.values[0]),
            Operator::NotEquals => write!(f, "{}!={}", self.key, self.values[0]),
            Operator::In => write!(f, "{} in ({})", self.key, self.values.join(",")),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, self.values.join(",")),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// Conjunction of requirements. The empty selector matches every label set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn from_requirements(requirements: Vec<Requirement>) -> Self {
        Self { requirements }
    }

    pub fn parse(expr: &str) -> Result<Self, SelectorError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(Self::everything());
        }
        let requirements = split_top_level(expr)
            .into_iter()
            .map(Requirement::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Returns a selector requiring both `self` and `other`
    pub fn and(mut self, other: &Selector) -> Self {
        self.requirements.extend(other.requirements.iter().cloned());
        self
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Structured selector as written in transformer YAML
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: Labels,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelector {
    pub fn to_selector(&self) -> Result<Selector, SelectorError> {
        let mut requirements = Vec::with_capacity(self.match_labels.len() + self.match_expressions.len());
        for (key, value) in &self.match_labels {
            requirements.push(Requirement::new(key, Operator::Equals, vec![value.clone()])?);
        }
        for expr in &self.match_expressions {
            let operator = match expr.operator.as_str() {
                "In" => Operator::In,
                "NotIn" => Operator::NotIn,
                "Exists" => Operator::Exists,
                "DoesNotExist" => Operator::DoesNotExist,
                other => return Err(SelectorError::UnknownOperator(other.to_string())),
            };
            let values = match operator {
                Operator::Exists | Operator::DoesNotExist => Vec::new(),
                _ => expr.values.clone(),
            };
            requirements.push(Requirement::new(&expr.key, operator, values)?);
        }
        Ok(Selector::from_requirements(requirements))
    }
}

/// Either spelling of a selector, as accepted in configuration files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorSpec {
    Expression(String),
    Structured(LabelSelector),
}

impl SelectorSpec {
    pub fn to_selector(&self) -> Result<Selector, SelectorError> {
        match self {
            SelectorSpec::Expression(expr) => Selector::parse(expr),
            SelectorSpec::Structured(selector) => selector.to_selector(),
        }
    }
}

fn split_top_level(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expr[start..]);
    parts
}

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([a-zA-Z0-9]([-a-zA-Z0-9.]*[a-zA-Z0-9])?/)?[a-zA-Z0-9]([-a-zA-Z0-9_.]*[a-zA-Z0-9])?$")
            .expect("label key regex is valid")
    })
}

fn value_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([a-zA-Z0-9]([-a-zA-Z0-9_.]*[a-zA-Z0-9])?)?$").expect("label value regex is valid")
    })
}

fn set_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\S+)\s+(in|notin)\s*\((.*)\)$").expect("set requirement regex is valid")
    })
}
