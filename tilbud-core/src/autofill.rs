//! Data-driven follow-up requests.
//!
//! An [`AutoFillSpec`] inspects a parsed response and decides which child
//! requests must complete before the parent is delivered. A classic case is a
//! store list that only carries `dealer_id`: the spec issues one dealer
//! request covering every referenced dealer, then writes each dealer into
//! the stores that reference it before the list is delivered.
//!
//! ```
//! use serde_json::json;
//! use tilbud_core::AutoFillSpec;
//!
//! let spec = AutoFillSpec::fill_missing("dealers", "dealer", "dealer_id", "/v2/dealers", "dealer_ids");
//! let stores = json!([
//!     {"id": "s1", "dealer_id": "d2"},
//!     {"id": "s2", "dealer_id": "d1", "dealer": {"id": "d1"}},
//!     {"id": "s3", "dealer_id": "d2"},
//! ]);
//!
//! assert!(spec.applies(&stores));
//! let children = spec.children(&stores);
//! assert_eq!(children.len(), 1);
//! assert_eq!(children[0].request().params().get("dealer_ids").unwrap().joined(), "d2");
//!
//! let mut stores = stores;
//! spec.merge(&mut stores, &[json!([{"id": "d2", "name": "Netto"}])]);
//! assert_eq!(stores[0]["dealer"]["name"], "Netto");
//! assert_eq!(stores[1]["dealer"], json!({"id": "d1"}));
//! ```

use serde_json::Value;
use smol_str::SmolStr;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::request::{LIMIT, OFFSET, Request};

type Predicate = dyn Fn(&Value) -> bool + Send + Sync;
type Factory = dyn Fn(&Value) -> Vec<AutoFillChild> + Send + Sync;
type Merge = dyn Fn(&mut Value, &[Value]) + Send + Sync;

/// A child request produced by an auto-fill spec.
#[derive(Debug, Clone)]
pub struct AutoFillChild {
    request: Request,
    mandatory: bool,
}

impl AutoFillChild {
    /// A child whose failure fails the parent.
    pub fn mandatory(request: Request) -> Self {
        AutoFillChild {
            request,
            mandatory: true,
        }
    }

    /// A child whose failure is ignored.
    pub fn optional(request: Request) -> Self {
        AutoFillChild {
            request,
            mandatory: false,
        }
    }

    /// The child request.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Whether a failure of this child fails the parent.
    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    /// Consumes the child and returns its request.
    pub fn into_request(self) -> Request {
        self.request
    }
}

/// Decides, from a parent's parsed response, which children to issue.
#[derive(Clone)]
pub struct AutoFillSpec {
    name: SmolStr,
    predicate: Arc<Predicate>,
    factory: Arc<Factory>,
    merge: Option<Arc<Merge>>,
}

impl fmt::Debug for AutoFillSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoFillSpec")
            .field("name", &self.name)
            .field("merges", &self.merge.is_some())
            .finish_non_exhaustive()
    }
}

impl AutoFillSpec {
    /// Creates a spec from a predicate and a child factory.
    pub fn new<P, F>(name: impl Into<SmolStr>, predicate: P, factory: F) -> Self
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
        F: Fn(&Value) -> Vec<AutoFillChild> + Send + Sync + 'static,
    {
        AutoFillSpec {
            name: name.into(),
            predicate: Arc::new(predicate),
            factory: Arc::new(factory),
            merge: None,
        }
    }

    /// Sets a step that folds the children's parsed bodies into the parent's
    /// body before delivery.
    ///
    /// `merge` receives the bodies of the delivered children in the order the
    /// factory produced them. Without a merge step the parent body is
    /// delivered as received.
    pub fn with_merge<M>(mut self, merge: M) -> Self
    where
        M: Fn(&mut Value, &[Value]) + Send + Sync + 'static,
    {
        self.merge = Some(Arc::new(merge));
        self
    }

    /// A spec whose predicate always holds.
    pub fn always<F>(name: impl Into<SmolStr>, factory: F) -> Self
    where
        F: Fn(&Value) -> Vec<AutoFillChild> + Send + Sync + 'static,
    {
        Self::new(name, |_| true, factory)
    }

    /// Fills `missing_field` on the elements of an array response.
    ///
    /// Applies when at least one element lacks `missing_field` (or has it set
    /// to null). Issues one mandatory `GET collection_url` filtered by the
    /// distinct values of `id_field` on those elements, then sets
    /// `missing_field` on each of them to the fetched object whose `id`
    /// equals its `id_field`.
    pub fn fill_missing(
        name: impl Into<SmolStr>,
        missing_field: &str,
        id_field: &str,
        collection_url: &str,
        filter_param: &str,
    ) -> Self {
        let missing = SmolStr::new(missing_field);
        let missing_for_factory = missing.clone();
        let missing_for_merge = missing.clone();
        let id_field = SmolStr::new(id_field);
        let id_field_for_merge = id_field.clone();
        let collection_url = SmolStr::new(collection_url);
        let filter_param = SmolStr::new(filter_param);

        Self::new(
            name,
            move |value| has_missing(value, &missing),
            move |value| {
                let ids = missing_ids(value, &missing_for_factory, &id_field);
                if ids.is_empty() {
                    return Vec::new();
                }
                let limit = ids.len() as u32;
                let request = Request::get(collection_url.clone())
                    .filter(filter_param.clone(), ids)
                    .param(OFFSET, 0u32)
                    .param(LIMIT, limit);
                vec![AutoFillChild::mandatory(request)]
            },
        )
        .with_merge(move |parent, children| {
            fill_by_id(parent, children, &missing_for_merge, &id_field_for_merge);
        })
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the parent response needs filling.
    pub fn applies(&self, value: &Value) -> bool {
        (self.predicate)(value)
    }

    /// Child requests for the parent response.
    pub fn children(&self, value: &Value) -> Vec<AutoFillChild> {
        (self.factory)(value)
    }

    /// Whether a merge step was set.
    pub fn merges(&self) -> bool {
        self.merge.is_some()
    }

    /// Runs the merge step, if any, on `parent`.
    pub fn merge(&self, parent: &mut Value, children: &[Value]) {
        if let Some(merge) = &self.merge {
            merge(parent, children);
        }
    }
}

fn field_missing(element: &Value, field: &str) -> bool {
    element.get(field).is_none_or(Value::is_null)
}

fn has_missing(value: &Value, field: &str) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().any(|item| field_missing(item, field)))
}

fn id_of(value: &Value) -> Option<SmolStr> {
    match value {
        Value::String(id) => Some(SmolStr::new(id)),
        Value::Number(id) => Some(SmolStr::from(id.to_string())),
        _ => None,
    }
}

/// Sets `field` on every parent element missing it, from the child object
/// whose `id` matches the element's `id_field`.
fn fill_by_id(parent: &mut Value, children: &[Value], field: &str, id_field: &str) {
    let by_id: HashMap<SmolStr, &Value> = children
        .iter()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|object| Some((id_of(object.get("id")?)?, object)))
        .collect();
    let Some(items) = parent.as_array_mut() else {
        return;
    };
    for item in items.iter_mut().filter(|item| field_missing(item, field)) {
        let Some(found) = item.get(id_field).and_then(id_of).and_then(|id| by_id.get(&id)) else {
            continue;
        };
        if let Some(object) = item.as_object_mut() {
            object.insert(field.to_owned(), (*found).clone());
        }
    }
}

/// Distinct ids of the elements missing `field`.
fn missing_ids(value: &Value, field: &str, id_field: &str) -> BTreeSet<SmolStr> {
    let Some(items) = value.as_array() else {
        return BTreeSet::new();
    };
    items
        .iter()
        .filter(|item| field_missing(item, field))
        .filter_map(|item| id_of(item.get(id_field)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dealers_spec() -> AutoFillSpec {
        AutoFillSpec::fill_missing("dealers", "dealer", "dealer_id", "/v2/dealers", "dealer_ids")
    }

    #[test]
    fn test_complete_list_needs_no_fill() {
        let stores = json!([{"id": "s1", "dealer_id": "d1", "dealer": {"id": "d1"}}]);
        assert!(!dealers_spec().applies(&stores));
        assert!(dealers_spec().children(&stores).is_empty());
    }

    #[test]
    fn test_non_array_does_not_apply() {
        assert!(!dealers_spec().applies(&json!({"id": "s1"})));
    }

    #[test]
    fn test_child_covers_distinct_ids() {
        let stores = json!([
            {"id": "s1", "dealer_id": "d2"},
            {"id": "s2", "dealer_id": "d1", "dealer": null},
            {"id": "s3", "dealer_id": "d2"},
        ]);
        let children = dealers_spec().children(&stores);
        assert_eq!(children.len(), 1);
        let request = children[0].request();
        assert!(children[0].is_mandatory());
        assert_eq!(request.url(), "/v2/dealers");
        assert_eq!(request.params().get("dealer_ids").unwrap().joined(), "d1,d2");
        assert_eq!(request.params().get("limit").unwrap().joined(), "2");
    }

    #[test]
    fn test_merge_sets_missing_objects_by_id() {
        let mut stores = json!([
            {"id": "s1", "dealer_id": "d2"},
            {"id": "s2", "dealer_id": 7},
            {"id": "s3", "dealer_id": "d9"},
            {"id": "s4", "dealer_id": "d2", "dealer": {"id": "d2", "name": "kept"}},
        ]);
        let dealers = json!([{"id": "d2", "name": "Netto"}, {"id": 7, "name": "Fakta"}]);

        dealers_spec().merge(&mut stores, &[dealers]);

        assert_eq!(stores[0]["dealer"]["name"], "Netto");
        assert_eq!(stores[1]["dealer"]["name"], "Fakta");
        assert!(stores[2].get("dealer").is_none());
        assert_eq!(stores[3]["dealer"]["name"], "kept");
    }

    #[test]
    fn test_custom_spec() {
        let spec = AutoFillSpec::always("catalog", |value| {
            let id = value["catalog_id"].as_str().unwrap_or_default().to_owned();
            vec![AutoFillChild::optional(Request::get(format!("/v2/catalogs/{id}")))]
        });
        let children = spec.children(&json!({"catalog_id": "c9"}));
        assert_eq!(children[0].request().url(), "/v2/catalogs/c9");
        assert!(!children[0].is_mandatory());
        assert!(!spec.merges());
        assert!(dealers_spec().merges());
    }
}
