//! Extra-resource requirements gathered across all directives of one run.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::Deserialize;
use stencil_core::{Match, MatchLabels, Requirements, ResourceSelector};

use crate::error::ComposeError;

/// One entry under `requirements` in an ExtraResources directive.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtraResourcesRequirement {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub match_labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub match_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl ExtraResourcesRequirement {
    /// A non-empty name takes precedence over labels.
    pub fn into_selector(self) -> ResourceSelector {
        let matching = match self.match_name.filter(|n| !n.is_empty()) {
            Some(name) => Match::MatchName(name),
            None => Match::MatchLabels(MatchLabels { labels: self.match_labels.unwrap_or_default() }),
        };
        ResourceSelector {
            api_version: self.api_version,
            kind: self.kind,
            matching,
            namespace: self.namespace.filter(|ns| !ns.is_empty()),
        }
    }
}

/// Keys are unique across the whole invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementSet {
    resources: BTreeMap<String, ResourceSelector>,
}

impl RequirementSet {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, key: String, selector: ResourceSelector) -> Result<(), ComposeError> {
        match self.resources.entry(key) {
            Entry::Occupied(e) => Err(ComposeError::DuplicateRequirement(e.key().clone())),
            Entry::Vacant(v) => {
                v.insert(selector);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize { self.resources.len() }

    /// `None` when nothing was requested, so the response carries no requirements block.
    pub fn into_requirements(self) -> Option<Requirements> {
        if self.resources.is_empty() { return None; }
        Some(Requirements { resources: self.resources })
    }
}
