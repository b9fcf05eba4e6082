//! Response assembly. Documents are decoded, classified and handled in
//! stream order; composite, members, requirements and conditions are only
//! written to the response once every document has been handled, while
//! context writes land immediately and survive a later fatal error.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use stencil_core::{Condition, Object, Request, Resource, Response, ANNOTATION_READY, ANNOTATION_RESOURCE_NAME, EXTRA_RESOURCES_CONTEXT_KEY};
use tracing::{debug, trace};

use crate::classify::{classify, CompositeIdentity, Role};
use crate::decode::decode_stream;
use crate::directive::{dispatch, Sinks};
use crate::error::{ComposeError, MergeSite};
use crate::limits::Limits;
use crate::merge::Merge;
use crate::requirements::RequirementSet;

/// Counts for one successful pass, for logs and the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub documents: usize,
    pub directives: usize,
    pub status_updates: usize,
    pub members: usize,
    pub requirements: usize,
    pub conditions: usize,
}

/// Fold `rendered` into `rsp`, which must have been started from `request`.
pub fn compose(request: &Request, rendered: &str, limits: &Limits, rsp: &mut Response) -> Result<Summary, ComposeError> {
    let docs = decode_stream(rendered, limits)?;
    let identity = request.observed.composite.as_ref().and_then(CompositeIdentity::of);

    let mut composite = request.desired.composite.clone().unwrap_or_default();
    let mut members: BTreeMap<String, Resource> = request.desired.resources.clone();
    let mut status_overlays: Vec<Json> = Vec::new();
    let mut requirements = RequirementSet::new();
    let mut conditions: Vec<Condition> = Vec::new();
    let mut summary = Summary { documents: docs.len(), ..Default::default() };

    for doc in docs {
        let role = classify(&doc, identity)?;
        trace!(index = doc.index, line = doc.line, kind = doc.kind(), role = ?role, "classified document");
        match role {
            Role::Directive(kind) => {
                let mut sinks = Sinks {
                    context: &mut rsp.context,
                    connection_details: &mut composite.connection_details,
                    requirements: &mut requirements,
                    conditions: &mut conditions,
                };
                dispatch(kind, doc, &mut sinks)?;
                summary.directives += 1;
            }
            Role::CompositeStatus => {
                let mut object = doc.object;
                status_overlays.push(object.remove("status").unwrap_or(Json::Null));
                summary.status_updates += 1;
            }
            Role::Member { name, ready } => {
                let mut object = doc.object;
                strip_pipeline_annotations(&mut object);
                let member = Resource { resource: object, ready, ..Default::default() };
                if members.insert(name.clone(), member).is_some() {
                    debug!(name = %name, "desired member replaced");
                }
            }
        }
    }

    if !status_overlays.is_empty() {
        let mut status = composite.resource.remove("status").unwrap_or(Json::Null);
        for overlay in status_overlays {
            status = status.merge(overlay).map_err(ComposeError::merge(MergeSite::Status))?;
        }
        if !status.is_null() { composite.resource.insert("status".into(), status); }
    }

    summary.members = members.len();
    summary.requirements = requirements.len();
    summary.conditions = conditions.len();

    rsp.desired.composite = Some(composite);
    rsp.desired.resources = members;
    if let Some(r) = requirements.into_requirements() { rsp.requirements = Some(r); }
    rsp.conditions.extend(conditions);
    Ok(summary)
}

/// Expose resources fetched for earlier requirements to later pipeline
/// steps. No-op when the request carries none.
pub fn fold_fetched_resources(request: &Request, rsp: &mut Response) -> Result<(), ComposeError> {
    let fetched: BTreeMap<&String, _> = request.extra_resources.iter().chain(request.required_resources.iter()).collect();
    if fetched.is_empty() { return Ok(()); }
    let overlay = serde_json::to_value(&fetched).map_err(ComposeError::RequestData)?;
    let base = rsp.context.get(EXTRA_RESOURCES_CONTEXT_KEY).cloned().unwrap_or(Json::Null);
    let merged = base.merge(overlay).map_err(ComposeError::merge(MergeSite::ExtraResources))?;
    rsp.set_context_key(EXTRA_RESOURCES_CONTEXT_KEY, merged);
    Ok(())
}

fn strip_pipeline_annotations(object: &mut Object) {
    if let Some(Json::Object(annotations)) = object.get_mut("metadata").and_then(|m| m.get_mut("annotations")) {
        annotations.remove(ANNOTATION_RESOURCE_NAME);
        annotations.remove(ANNOTATION_READY);
    }
}
