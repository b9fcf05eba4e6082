//! Handlers for meta directives. Each one reads its payload field and
//! writes into a per-invocation sink; nothing here touches the response
//! except the context, which is updated in place.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::Value as Json;
use stencil_core::{is_reserved_condition_type, Condition, ConditionStatus, Object, Target};

use crate::classify::DirectiveKind;
use crate::decode::RenderedDocument;
use crate::error::{ComposeError, MergeSite};
use crate::merge::{shape, Merge};
use crate::requirements::{ExtraResourcesRequirement, RequirementSet};

/// Where directive payloads land.
pub(crate) struct Sinks<'a> {
    pub context: &'a mut Object,
    pub connection_details: &'a mut BTreeMap<String, Vec<u8>>,
    pub requirements: &'a mut RequirementSet,
    pub conditions: &'a mut Vec<Condition>,
}

pub(crate) fn dispatch(kind: DirectiveKind, doc: RenderedDocument, sinks: &mut Sinks<'_>) -> Result<(), ComposeError> {
    let mut object = doc.object;
    match kind {
        DirectiveKind::Context => merge_context(object.remove("data"), sinks.context),
        DirectiveKind::ClaimConditions => claim_conditions(object.remove("conditions"), sinks.conditions),
        DirectiveKind::CompositeConnectionDetails => connection_details(object.remove("data"), sinks.connection_details),
        DirectiveKind::ExtraResources => extra_resources(object.remove("requirements"), sinks.requirements),
    }
}

/// Condition as written in a ClaimConditions directive.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TargetedCondition {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub target: String,
}

impl TargetedCondition {
    pub fn into_condition(self) -> Condition {
        let status = match self.status.as_str() {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        };
        let target = match self.target.as_str() {
            "CompositeAndClaim" => Target::CompositeAndClaim,
            _ => Target::Composite,
        };
        Condition {
            type_: self.type_,
            status,
            reason: self.reason,
            message: Some(self.message).filter(|m| !m.is_empty()),
            target,
        }
    }
}

fn object_payload(kind: DirectiveKind, field: &str, payload: Option<Json>) -> Result<Option<Object>, ComposeError> {
    match payload {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Object(o)) => Ok(Some(o)),
        Some(other) => Err(ComposeError::InvalidDirective {
            kind,
            reason: format!("{field} must be an object, found {}", shape(&other)),
        }),
    }
}

fn merge_context(data: Option<Json>, context: &mut Object) -> Result<(), ComposeError> {
    let Some(data) = object_payload(DirectiveKind::Context, "data", data)? else { return Ok(()) };
    let merged = context.clone().merge(data).map_err(ComposeError::merge(MergeSite::Context))?;
    for (k, v) in merged {
        context.insert(k, v);
    }
    Ok(())
}

fn claim_conditions(payload: Option<Json>, out: &mut Vec<Condition>) -> Result<(), ComposeError> {
    let list: Vec<TargetedCondition> = match payload {
        None | Some(Json::Null) => return Ok(()),
        Some(v) => serde_json::from_value(v).map_err(|e| ComposeError::InvalidDirective {
            kind: DirectiveKind::ClaimConditions,
            reason: format!("conditions: {e}"),
        })?,
    };
    for c in list {
        if is_reserved_condition_type(&c.type_) {
            return Err(ComposeError::ReservedCondition(c.type_));
        }
        out.push(c.into_condition());
    }
    Ok(())
}

fn connection_details(data: Option<Json>, out: &mut BTreeMap<String, Vec<u8>>) -> Result<(), ComposeError> {
    let Some(data) = object_payload(DirectiveKind::CompositeConnectionDetails, "data", data)? else { return Ok(()) };
    let mut decoded = BTreeMap::new();
    for (key, v) in data {
        let Some(encoded) = v.as_str() else {
            return Err(ComposeError::InvalidConnectionDetail {
                reason: format!("expected a base64 string, found {}", shape(&v)),
                key,
            });
        };
        match STANDARD.decode(encoded) {
            Ok(bytes) => { decoded.insert(key, bytes); }
            Err(e) => return Err(ComposeError::InvalidConnectionDetail { key, reason: e.to_string() }),
        }
    }
    *out = std::mem::take(out).merge(decoded).map_err(ComposeError::merge(MergeSite::ConnectionDetails))?;
    Ok(())
}

fn extra_resources(payload: Option<Json>, set: &mut RequirementSet) -> Result<(), ComposeError> {
    let Some(map) = object_payload(DirectiveKind::ExtraResources, "requirements", payload)? else { return Ok(()) };
    for (key, v) in map {
        let req: ExtraResourcesRequirement = serde_json::from_value(v).map_err(|e| ComposeError::InvalidDirective {
            kind: DirectiveKind::ExtraResources,
            reason: format!("requirement {key:?}: {e}"),
        })?;
        set.insert(key, req.into_selector())?;
    }
    Ok(())
}
