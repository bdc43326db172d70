//! Label-based resource discovery.
//!
//! Both backends resolve resources the same way: a direct native-id lookup
//! first, then a label query on the feature name. The query itself is a
//! pure value so the matching rules stay testable without a live backend.

use crate::runtime::error::RuntimeError;
use crate::runtime::labels;
use std::collections::HashMap;

/// A discovery query scoped to the platform namespace, optionally narrowed
/// to a feature name and a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuery {
    pub namespace: String,
    pub feature_name: Option<String>,
    pub project: Option<String>,
}

impl ResourceQuery {
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            feature_name: None,
            project: None,
        }
    }

    pub fn feature_name(mut self, name: impl Into<String>) -> Self {
        self.feature_name = Some(name.into());
        self
    }

    pub fn project(mut self, project: Option<impl Into<String>>) -> Self {
        self.project = project.map(Into::into);
        self
    }

    /// `key=value` pairs for native filter APIs (Docker label filters,
    /// Kubernetes label selectors share the same encoding).
    pub fn label_pairs(&self) -> Vec<String> {
        let mut pairs = vec![format!("{}={}", labels::NAMESPACE, self.namespace)];
        if let Some(name) = &self.feature_name {
            pairs.push(format!("{}={}", labels::FEATURE_NAME, name));
        }
        if let Some(project) = &self.project {
            pairs.push(format!("{}={}", labels::PROJECT, project));
        }
        pairs
    }

    /// Comma-joined selector string, the Kubernetes wire encoding.
    pub fn label_selector(&self) -> String {
        self.label_pairs().join(",")
    }

    /// Whether a labelled resource satisfies this query.
    pub fn matches(&self, resource_labels: &HashMap<String, String>) -> bool {
        let has = |key: &str, value: &str| resource_labels.get(key).map(String::as_str) == Some(value);
        if !has(labels::NAMESPACE, &self.namespace) {
            return false;
        }
        if let Some(name) = &self.feature_name {
            if !has(labels::FEATURE_NAME, name) {
                return false;
            }
        }
        if let Some(project) = &self.project {
            if !has(labels::PROJECT, project) {
                return false;
            }
        }
        true
    }
}

/// Strict-one-match rule shared by both backends and both lookup paths:
/// zero matches or more than one match is `NotFound`. Ambiguity is logged,
/// never silently resolved by picking a winner.
pub fn exactly_one<T>(mut matches: Vec<T>, what: &str) -> Result<T, RuntimeError> {
    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(RuntimeError::not_found(what)),
        n => {
            tracing::warn!("{} matched {} resources, refusing to pick one", what, n);
            Err(RuntimeError::not_found(what))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labelled(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn query_matches_namespace_and_feature_name() {
        let query = ResourceQuery::namespaced("mlspace").feature_name("workspace-jane");
        let labels = labelled(&[
            (labels::NAMESPACE, "mlspace"),
            (labels::FEATURE_NAME, "workspace-jane"),
        ]);
        assert!(query.matches(&labels));
    }

    #[test]
    fn query_rejects_foreign_namespace() {
        let query = ResourceQuery::namespaced("mlspace");
        let labels = labelled(&[(labels::NAMESPACE, "other-install")]);
        assert!(!query.matches(&labels));
    }

    #[test]
    fn project_scope_narrows_matches() {
        let query = ResourceQuery::namespaced("mlspace")
            .feature_name("trainer")
            .project(Some("genomics"));
        let wrong_project = labelled(&[
            (labels::NAMESPACE, "mlspace"),
            (labels::FEATURE_NAME, "trainer"),
            (labels::PROJECT, "vision"),
        ]);
        assert!(!query.matches(&wrong_project));
    }

    #[test]
    fn selector_encoding() {
        let query = ResourceQuery::namespaced("mlspace")
            .feature_name("trainer")
            .project(Some("genomics"));
        assert_eq!(
            query.label_selector(),
            format!(
                "{}=mlspace,{}=trainer,{}=genomics",
                labels::NAMESPACE,
                labels::FEATURE_NAME,
                labels::PROJECT
            )
        );
    }

    #[test]
    fn exactly_one_rejects_zero_and_many() {
        assert!(exactly_one(Vec::<u8>::new(), "svc").is_err());
        assert!(exactly_one(vec![1, 2], "svc").is_err());
        assert_eq!(exactly_one(vec![7], "svc").unwrap(), 7);
    }
}
