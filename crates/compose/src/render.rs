//! Seam to the template engine. The engine itself is pluggable; the
//! pipeline only needs text out of it.

use serde_json::Value as Json;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct RenderError(pub String);

pub trait Render: Send + Sync {
    /// Evaluate `template` with the request (as JSON) as data and return a
    /// multi-document manifest stream.
    fn render(&self, template: &str, data: &Json) -> Result<String, RenderError>;
}

/// Treats the template text as already rendered.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Render for Passthrough {
    fn render(&self, template: &str, _data: &Json) -> Result<String, RenderError> {
        Ok(template.to_string())
    }
}
