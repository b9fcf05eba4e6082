//! Decide the role of each decoded document before any handler runs.

use std::fmt;

use stencil_core::{Ready, Resource, ANNOTATION_READY, ANNOTATION_RESOURCE_NAME, META_API_VERSION};

use crate::decode::RenderedDocument;
use crate::error::ComposeError;

/// Kinds accepted under the meta apiVersion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    ClaimConditions,
    CompositeConnectionDetails,
    Context,
    ExtraResources,
}

impl DirectiveKind {
    pub const ALL: [DirectiveKind; 4] = [
        DirectiveKind::ClaimConditions,
        DirectiveKind::CompositeConnectionDetails,
        DirectiveKind::Context,
        DirectiveKind::ExtraResources,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DirectiveKind::ClaimConditions => "ClaimConditions",
            DirectiveKind::CompositeConnectionDetails => "CompositeConnectionDetails",
            DirectiveKind::Context => "Context",
            DirectiveKind::ExtraResources => "ExtraResources",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    /// "A, B, C or D"
    pub(crate) fn expected() -> String {
        let names: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
        match names.split_last() {
            Some((last, rest)) if !rest.is_empty() => format!("{} or {}", rest.join(", "), last),
            Some((last, _)) => (*last).to_string(),
            None => String::new(),
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of one rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Directive(DirectiveKind),
    /// Only `status` is kept and merged into the desired composite.
    CompositeStatus,
    Member { name: String, ready: Ready },
}

/// apiVersion/kind of the observed composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeIdentity<'a> {
    pub api_version: &'a str,
    pub kind: &'a str,
}

impl<'a> CompositeIdentity<'a> {
    pub fn of(composite: &'a Resource) -> Option<Self> {
        Some(Self { api_version: composite.api_version()?, kind: composite.kind()? })
    }
}

/// First match wins: directive, composite status, member.
pub fn classify(doc: &RenderedDocument, composite: Option<CompositeIdentity<'_>>) -> Result<Role, ComposeError> {
    let name = doc.annotation(ANNOTATION_RESOURCE_NAME);

    if name.is_none() {
        if doc.api_version() == META_API_VERSION {
            return DirectiveKind::parse(doc.kind())
                .map(Role::Directive)
                .ok_or_else(|| ComposeError::InvalidMetaKind { kind: doc.kind().to_string() });
        }
        if let Some(c) = composite {
            if c.api_version == doc.api_version() && c.kind == doc.kind() {
                return Ok(Role::CompositeStatus);
            }
        }
    }

    let name = match name {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => return Err(ComposeError::MissingResourceName { kind: doc.kind().to_string() }),
    };
    let ready = match doc.annotation(ANNOTATION_READY) {
        None => Ready::Unspecified,
        Some(v) => Ready::from_annotation(v).ok_or_else(|| ComposeError::InvalidReady { value: v.to_string() })?,
    };
    Ok(Role::Member { name, ready })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> RenderedDocument {
        RenderedDocument { object: v.as_object().cloned().unwrap(), line: 1, index: 1 }
    }

    const XR: CompositeIdentity<'static> = CompositeIdentity { api_version: "example.org/v1", kind: "XR" };

    #[test]
    fn meta_documents_are_directives() {
        let d = doc(json!({"apiVersion": META_API_VERSION, "kind": "Context", "data": {}}));
        assert_eq!(classify(&d, Some(XR)).unwrap(), Role::Directive(DirectiveKind::Context));
    }

    #[test]
    fn unknown_meta_kind_is_fatal() {
        let d = doc(json!({"apiVersion": META_API_VERSION, "kind": "InvalidMeta"}));
        let err = classify(&d, Some(XR)).unwrap_err();
        assert!(matches!(err, ComposeError::InvalidMetaKind { ref kind } if kind == "InvalidMeta"));
    }

    #[test]
    fn composite_identity_without_name_is_a_status_update() {
        let d = doc(json!({"apiVersion": "example.org/v1", "kind": "XR", "status": {"a": "b"}}));
        assert_eq!(classify(&d, Some(XR)).unwrap(), Role::CompositeStatus);
        // Same kind under another version is not the composite.
        let d = doc(json!({"apiVersion": "example.org/v2", "kind": "XR"}));
        assert!(matches!(classify(&d, Some(XR)), Err(ComposeError::MissingResourceName { .. })));
    }

    #[test]
    fn named_composite_identity_is_a_member() {
        let d = doc(json!({
            "apiVersion": "example.org/v1",
            "kind": "XR",
            "metadata": {"annotations": {ANNOTATION_RESOURCE_NAME: "recursive-xr"}}
        }));
        assert_eq!(classify(&d, Some(XR)).unwrap(), Role::Member { name: "recursive-xr".into(), ready: Ready::Unspecified });
    }

    #[test]
    fn named_meta_document_is_a_member() {
        let d = doc(json!({
            "apiVersion": META_API_VERSION,
            "kind": "Context",
            "metadata": {"annotations": {ANNOTATION_RESOURCE_NAME: "ctx"}}
        }));
        assert!(matches!(classify(&d, None).unwrap(), Role::Member { .. }));
    }

    #[test]
    fn members_need_a_non_empty_name() {
        let d = doc(json!({"apiVersion": "example.org/v1", "kind": "CD", "metadata": {"name": "cool-cd"}}));
        let err = classify(&d, Some(XR)).unwrap_err();
        assert!(err.to_string().contains("\"CD\""), "{}", err);
        assert!(err.to_string().contains(ANNOTATION_RESOURCE_NAME), "{}", err);

        let d = doc(json!({
            "apiVersion": "example.org/v1",
            "kind": "CD",
            "metadata": {"annotations": {ANNOTATION_RESOURCE_NAME: ""}}
        }));
        assert!(matches!(classify(&d, None), Err(ComposeError::MissingResourceName { .. })));
    }

    #[test]
    fn readiness_annotation_is_validated() {
        let mk = |ready: &str| doc(json!({
            "apiVersion": "example.org/v1",
            "kind": "CD",
            "metadata": {"annotations": {ANNOTATION_RESOURCE_NAME: "cool-cd", ANNOTATION_READY: ready}}
        }));
        assert_eq!(classify(&mk("True"), None).unwrap(), Role::Member { name: "cool-cd".into(), ready: Ready::True });
        assert_eq!(classify(&mk("False"), None).unwrap(), Role::Member { name: "cool-cd".into(), ready: Ready::False });
        let err = classify(&mk("true"), None).unwrap_err();
        assert!(matches!(err, ComposeError::InvalidReady { ref value } if value == "true"));
    }

    #[test]
    fn expected_kinds_read_naturally() {
        assert_eq!(DirectiveKind::expected(), "ClaimConditions, CompositeConnectionDetails, Context or ExtraResources");
        assert_eq!(DirectiveKind::parse("ExtraResources"), Some(DirectiveKind::ExtraResources));
        assert_eq!(DirectiveKind::parse("extraresources"), None);
    }
}
