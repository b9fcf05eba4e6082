//! Fatal errors for one invocation. Each one ends up as the single fatal
//! result on the response.

use std::fmt;

use stencil_core::{ANNOTATION_READY, ANNOTATION_RESOURCE_NAME, META_API_VERSION};

use crate::classify::DirectiveKind;
use crate::decode::DecodeError;
use crate::input::InputError;
use crate::merge::MergeError;
use crate::render::RenderError;

/// Merge call site, carried on merge failures for triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSite {
    Status,
    Context,
    ConnectionDetails,
    ExtraResources,
}

impl fmt::Display for MergeSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MergeSite::Status => "status",
            MergeSite::Context => "context",
            MergeSite::ConnectionDetails => "connection details",
            MergeSite::ExtraResources => "extra resources",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("invalid function input: {0}")]
    InvalidInput(#[from] InputError),
    #[error("cannot convert request to template data: {0}")]
    RequestData(#[source] serde_json::Error),
    #[error("cannot execute template: {0}")]
    Render(#[from] RenderError),
    #[error("cannot decode manifest: {0}")]
    Decode(#[from] DecodeError),
    #[error("{:?} template is missing required {:?} annotation", .kind, ANNOTATION_RESOURCE_NAME)]
    MissingResourceName { kind: String },
    #[error("invalid {:?} annotation value {:?}: must be True, False, or Unspecified", ANNOTATION_READY, .value)]
    InvalidReady { value: String },
    #[error("invalid kind {:?} for apiVersion {:?} - must be one of {}", .kind, META_API_VERSION, DirectiveKind::expected())]
    InvalidMetaKind { kind: String },
    #[error("cannot set ClaimCondition type: {0} is a reserved Crossplane Condition")]
    ReservedCondition(String),
    #[error("duplicate extra resource key {0:?}")]
    DuplicateRequirement(String),
    #[error("invalid {kind} directive: {reason}")]
    InvalidDirective { kind: DirectiveKind, reason: String },
    #[error("cannot decode connection detail {key:?}: {reason}")]
    InvalidConnectionDetail { key: String, reason: String },
    #[error("cannot merge {site}: {source}")]
    Merge { site: MergeSite, source: MergeError },
}

impl ComposeError {
    pub(crate) fn merge(site: MergeSite) -> impl FnOnce(MergeError) -> ComposeError {
        move |source| ComposeError::Merge { site, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_value() {
        let e = ComposeError::MissingResourceName { kind: "CD".into() };
        assert_eq!(
            e.to_string(),
            "\"CD\" template is missing required \"gotemplating.fn.crossplane.io/composition-resource-name\" annotation"
        );
        let e = ComposeError::InvalidReady { value: "wrongValue".into() };
        assert_eq!(
            e.to_string(),
            "invalid \"gotemplating.fn.crossplane.io/ready\" annotation value \"wrongValue\": must be True, False, or Unspecified"
        );
        let e = ComposeError::DuplicateRequirement("cool-extra-resource".into());
        assert_eq!(e.to_string(), "duplicate extra resource key \"cool-extra-resource\"");
    }

    #[test]
    fn invalid_meta_kind_lists_the_permitted_kinds() {
        let e = ComposeError::InvalidMetaKind { kind: "InvalidMeta".into() };
        assert_eq!(
            e.to_string(),
            "invalid kind \"InvalidMeta\" for apiVersion \"meta.gotemplating.fn.crossplane.io/v1alpha1\" - must be one of ClaimConditions, CompositeConnectionDetails, Context or ExtraResources"
        );
    }

    #[test]
    fn merge_failures_carry_their_site() {
        let e = ComposeError::merge(MergeSite::Status)(MergeError::Shape { base: "object", overlay: "string" });
        assert_eq!(e.to_string(), "cannot merge status: cannot merge string into object: both sides must be objects");
    }
}
