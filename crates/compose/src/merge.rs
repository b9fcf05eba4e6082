//! Override-biased structural merge shared by status, context and
//! connection-detail folding.
//!
//! Contract: overlay keys win at every depth, keys only in the base are
//! kept, arrays are replaced wholesale, and a `null` overlay value leaves
//! the base value in place. Not associative across conflicting keys.

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("cannot merge {overlay} into {base}: both sides must be objects")]
    Shape { base: &'static str, overlay: &'static str },
}

/// `merge(base, overlay) -> result`.
pub trait Merge: Sized {
    fn merge(self, overlay: Self) -> Result<Self, MergeError>;
}

impl Merge for Json {
    fn merge(self, overlay: Json) -> Result<Json, MergeError> {
        match (self, overlay) {
            (base, Json::Null) if base.is_null() || base.is_object() => Ok(base),
            (Json::Null, Json::Object(o)) => Ok(Json::Object(o)),
            (Json::Object(b), Json::Object(o)) => Ok(Json::Object(b.merge(o)?)),
            (base, overlay) => Err(MergeError::Shape { base: shape(&base), overlay: shape(&overlay) }),
        }
    }
}

impl Merge for Map<String, Json> {
    fn merge(mut self, overlay: Map<String, Json>) -> Result<Self, MergeError> {
        merge_into(&mut self, overlay);
        Ok(self)
    }
}

/// Flat byte maps: each overlay key replaces the base value.
impl Merge for BTreeMap<String, Vec<u8>> {
    fn merge(mut self, overlay: BTreeMap<String, Vec<u8>>) -> Result<Self, MergeError> {
        self.extend(overlay);
        Ok(self)
    }
}

fn merge_into(base: &mut Map<String, Json>, overlay: Map<String, Json>) {
    for (k, ov) in overlay {
        match ov {
            Json::Object(o) => match base.get_mut(&k) {
                Some(Json::Object(b)) => merge_into(b, o),
                _ => { base.insert(k, Json::Object(o)); }
            },
            Json::Null if base.contains_key(&k) => {}
            ov => { base.insert(k, ov); }
        }
    }
}

pub(crate) fn shape(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
