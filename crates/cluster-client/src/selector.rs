//! Label and pod queries
//!
//! A small label selector model shared by the real client (rendered into
//! API selector strings) and the mock (evaluated in memory), so both agree
//! on which objects a query returns.

use std::collections::BTreeMap;
use std::fmt;

/// Single label requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelRequirement {
    /// `key=value`
    Equals(String, String),
    /// `key`
    Exists(String),
}

impl LabelRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(key, value) => labels.get(key) == Some(value),
            Self::Exists(key) => labels.contains_key(key),
        }
    }
}

impl fmt::Display for LabelRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(key, value) => write!(f, "{}={}", key, value),
            Self::Exists(key) => write!(f, "{}", key),
        }
    }
}

/// Conjunction of label requirements. An empty query matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelQuery {
    requirements: Vec<LabelRequirement>,
}

impl LabelQuery {
    /// Query matching every object.
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Equality match on every entry of `labels`.
    #[must_use]
    pub fn from_map(labels: &BTreeMap<String, String>) -> Self {
        Self {
            requirements: labels
                .iter()
                .map(|(k, v)| LabelRequirement::Equals(k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Objects carrying `key`, whatever its value.
    #[must_use]
    pub fn has_key(key: impl Into<String>) -> Self {
        Self {
            requirements: vec![LabelRequirement::Exists(key.into())],
        }
    }

    #[must_use]
    pub fn and_equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(LabelRequirement::Equals(key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn and_exists(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(LabelRequirement::Exists(key.into()));
        self
    }

    /// Evaluates the query against an object's labels.
    #[must_use]
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let empty = BTreeMap::new();
        let labels = labels.unwrap_or(&empty);
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Renders the query in API server selector syntax.
    #[must_use]
    pub fn to_selector_string(&self) -> String {
        self.requirements
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Pod listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodQuery {
    /// Restrict to a namespace; `None` lists across all namespaces
    pub namespace: Option<String>,
    pub labels: LabelQuery,
    /// Restrict to pods bound to this node
    pub node_name: Option<String>,
}

impl PodQuery {
    /// Every pod bound to `node`, in any namespace.
    #[must_use]
    pub fn on_node(node: impl Into<String>) -> Self {
        Self {
            node_name: Some(node.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: LabelQuery) -> Self {
        self.labels = labels;
        self
    }

    /// Field selector for the node restriction, if any.
    #[must_use]
    pub fn field_selector(&self) -> Option<String> {
        self.node_name.as_ref().map(|n| format!("spec.nodeName={}", n))
    }
}
