//! Size and complexity budgets for one rendered stream.

use serde_json::Value as Json;

const DEFAULT_MAX_MANIFEST_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_MAX_DOC_NODES: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Upper bound on the rendered text handed to the decoder.
    pub max_manifest_bytes: usize,
    /// Upper bound on nodes (objects, arrays, scalars) in a single document.
    pub max_doc_nodes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_manifest_bytes: DEFAULT_MAX_MANIFEST_BYTES, max_doc_nodes: DEFAULT_MAX_DOC_NODES }
    }
}

impl Limits {
    /// Read `STENCIL_MAX_MANIFEST_BYTES` / `STENCIL_MAX_DOC_NODES`, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            max_manifest_bytes: env_usize("STENCIL_MAX_MANIFEST_BYTES").unwrap_or(DEFAULT_MAX_MANIFEST_BYTES),
            max_doc_nodes: env_usize("STENCIL_MAX_DOC_NODES").unwrap_or(DEFAULT_MAX_DOC_NODES),
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<usize>().ok()).filter(|n| *n > 0)
}

/// True when `v` holds more than `max` nodes. Stops counting at `max + 1`.
pub(crate) fn node_budget_exceeded(v: &Json, max: usize) -> bool {
    let mut seen = 0usize;
    let mut stack = vec![v];
    while let Some(node) = stack.pop() {
        seen += 1;
        if seen > max { return true; }
        match node {
            Json::Object(map) => stack.extend(map.values()),
            Json::Array(items) => stack.extend(items.iter()),
            _ => {}
        }
    }
    false
}
