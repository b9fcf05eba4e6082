//! Stencil composition pipeline.
//!
//! Takes one function request, renders its template through a pluggable
//! engine and folds the resulting multi-document stream into a response:
//! desired members, composite status and connection details, context,
//! extra-resource requirements and claim conditions. A failure leaves
//! whatever was already written plus exactly one fatal result.

#![forbid(unsafe_code)]

use std::time::Instant;

use metrics::{counter, histogram};
use stencil_core::{Request, Response};
use tracing::{debug, info, info_span, warn};

pub mod classify;
pub mod compose;
pub mod decode;
mod directive;
pub mod error;
pub mod input;
pub mod limits;
pub mod merge;
pub mod render;
pub mod requirements;

pub use classify::{classify, CompositeIdentity, DirectiveKind, Role};
pub use compose::{compose, fold_fetched_resources, Summary};
pub use decode::{decode_stream, DecodeError, Location, RenderedDocument};
pub use directive::TargetedCondition;
pub use error::{ComposeError, MergeSite};
pub use input::{Input, InputError, TemplateSource};
pub use limits::Limits;
pub use merge::{Merge, MergeError};
pub use render::{Passthrough, Render, RenderError};
pub use requirements::{ExtraResourcesRequirement, RequirementSet};

/// Run one invocation end to end. Never fails: errors become the single
/// fatal result on the returned response.
pub fn run_function(request: &Request, renderer: &dyn Render, limits: &Limits) -> Response {
    let span = info_span!("run_function", tag = %request.meta.tag);
    let _enter = span.enter();
    let started = Instant::now();
    counter!("compose_runs_total", 1u64);

    let mut rsp = Response::to(request);
    match run(request, renderer, limits, &mut rsp) {
        Ok(summary) => {
            info!(
                documents = summary.documents,
                members = summary.members,
                directives = summary.directives,
                requirements = summary.requirements,
                conditions = summary.conditions,
                took_ms = %started.elapsed().as_millis(),
                "composed"
            );
        }
        Err(e) => {
            warn!(error = %e, "composition failed");
            counter!("compose_fatal_total", 1u64);
            rsp.fatal(e.to_string());
        }
    }
    histogram!("compose_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
    rsp
}

fn run(request: &Request, renderer: &dyn Render, limits: &Limits, rsp: &mut Response) -> Result<Summary, ComposeError> {
    let source = TemplateSource::from_input(&request.input)?;
    debug!(source = source.label(), "template source");
    let template = source.template(&request.context)?;
    let data = serde_json::to_value(request).map_err(ComposeError::RequestData)?;
    let rendered = renderer.render(&template, &data)?;
    debug!(bytes = rendered.len(), "rendered");
    let summary = compose(request, &rendered, limits, rsp)?;
    fold_fetched_resources(request, rsp)?;
    Ok(summary)
}
