// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Materialized view definitions.
//!
//! A view projects rows out of an array field of every document in one
//! collection. Each row becomes a term string referencing the parent
//! document, and backends answer exact-term queries with the ids of the
//! documents that emitted it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One projection: emits a row per element of the array at `path`.
///
/// With `case_insensitive` set, field values are lower-cased before they
/// become terms, so queries must fold their values the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexProjection {
    pub name: String,
    pub path: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub case_insensitive: bool,
}

/// A view over a single collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub collection: String,
    pub separator: char,
    pub projections: Vec<IndexProjection>,
}

impl IndexDefinition {
    /// Whether documents with this id feed the view.
    pub fn applies_to(&self, document_id: &str) -> bool {
        document_id
            .strip_prefix(self.collection.as_str())
            .is_some_and(|rest| rest.starts_with(self.separator))
    }

    /// Terms emitted for one document body, sorted and deduplicated.
    pub fn terms_for(&self, body: &Value) -> Vec<String> {
        let mut terms = Vec::new();

        for projection in &self.projections {
            let Some(rows) = body.get(&projection.path).and_then(Value::as_array) else {
                continue;
            };

            for row in rows {
                let values: Vec<String> = projection
                    .fields
                    .iter()
                    .map(|field| row.get(field).and_then(Value::as_str).unwrap_or(""))
                    .map(|value| {
                        if projection.case_insensitive {
                            value.to_lowercase()
                        } else {
                            value.to_string()
                        }
                    })
                    .collect();
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                terms.push(index_term(&projection.name, &values));
            }
        }

        terms.sort();
        terms.dedup();
        terms
    }
}

/// Build the term a projection emits for the given field values.
pub fn index_term(projection: &str, values: &[&str]) -> String {
    let mut term = projection.to_string();
    for value in values {
        term.push('/');
        term.push_str(&urlencoding::encode(value));
    }
    term
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags_view() -> IndexDefinition {
        IndexDefinition {
            name: "Posts/Tags".to_string(),
            collection: "Posts".to_string(),
            separator: '/',
            projections: vec![IndexProjection {
                name: "Tags".to_string(),
                path: "tags".to_string(),
                fields: vec!["kind".to_string(), "label".to_string()],
                case_insensitive: false,
            }],
        }
    }

    #[test]
    fn test_applies_to_collection_only() {
        let view = tags_view();
        assert!(view.applies_to("Posts/1"));
        assert!(!view.applies_to("PostsArchive/1"));
        assert!(!view.applies_to("Users/1"));
    }

    #[test]
    fn test_terms_are_encoded_and_deduplicated() {
        let view = tags_view();
        let body = json!({
            "tags": [
                { "kind": "topic", "label": "a/b" },
                { "kind": "topic", "label": "a/b" },
                { "kind": "lang", "label": "rust" }
            ]
        });

        let terms = view.terms_for(&body);
        assert_eq!(terms, vec!["Tags/lang/rust", "Tags/topic/a%2Fb"]);
    }

    #[test]
    fn test_case_insensitive_projection_folds_values() {
        let mut view = tags_view();
        view.projections[0].case_insensitive = true;
        let body = json!({
            "tags": [
                { "kind": "Topic", "label": "Rust" },
                { "kind": "topic", "label": "RUST" }
            ]
        });

        assert_eq!(view.terms_for(&body), vec!["Tags/topic/rust"]);
    }

    #[test]
    fn test_missing_array_emits_nothing() {
        assert!(tags_view().terms_for(&json!({ "title": "x" })).is_empty());
    }
}
