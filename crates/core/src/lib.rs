//! Stencil core types: the function request/response wire shapes.
//!
//! These mirror the protobuf-JSON encoding the control plane speaks:
//! camelCase fields, enum values by their proto names, bytes as base64.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// apiVersion marking a rendered document as a pipeline directive.
pub const META_API_VERSION: &str = "meta.gotemplating.fn.crossplane.io/v1alpha1";
/// Annotation carrying the member resource's name in the desired set.
pub const ANNOTATION_RESOURCE_NAME: &str = "gotemplating.fn.crossplane.io/composition-resource-name";
/// Annotation carrying the member resource's readiness.
pub const ANNOTATION_READY: &str = "gotemplating.fn.crossplane.io/ready";
/// Context key holding environment data (merge base and template lookup table).
pub const ENVIRONMENT_CONTEXT_KEY: &str = "apiextensions.crossplane.io/environment";
/// Context key receiving extra resources fetched on behalf of earlier requirements.
pub const EXTRA_RESOURCES_CONTEXT_KEY: &str = "apiextensions.crossplane.io/extra-resources";
/// Condition types owned by the control plane; templates may not set them.
pub const RESERVED_CONDITION_TYPES: [&str; 3] = ["Ready", "Synced", "Healthy"];
/// Default response TTL in protobuf-JSON duration form.
pub const DEFAULT_TTL: &str = "60s";

pub fn is_reserved_condition_type(t: &str) -> bool {
    RESERVED_CONDITION_TYPES.contains(&t)
}

/// Generic attribute tree for one resource body.
pub type Object = Map<String, Json>;

/// Readiness tri-state of a desired member resource.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Ready {
    #[default]
    #[serde(rename = "READY_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "READY_TRUE")]
    True,
    #[serde(rename = "READY_FALSE")]
    False,
}

impl Ready {
    pub fn from_annotation(v: &str) -> Option<Self> {
        match v {
            "True" => Some(Ready::True),
            "False" => Some(Ready::False),
            "Unspecified" => Some(Ready::Unspecified),
            _ => None,
        }
    }

    pub fn is_unspecified(&self) -> bool { matches!(self, Ready::Unspecified) }
}

/// A resource as carried on the wire: body, connection secrets, readiness.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub resource: Object,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", with = "base64_map")]
    pub connection_details: BTreeMap<String, Vec<u8>>,
    #[serde(default, skip_serializing_if = "Ready::is_unspecified")]
    pub ready: Ready,
}

impl Resource {
    pub fn new(resource: Object) -> Self {
        Self { resource, ..Default::default() }
    }

    pub fn api_version(&self) -> Option<&str> {
        self.resource.get("apiVersion").and_then(|v| v.as_str())
    }

    pub fn kind(&self) -> Option<&str> {
        self.resource.get("kind").and_then(|v| v.as_str())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.resource
            .get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(|v| v.as_str())
    }
}

/// Composite plus the name-keyed member resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct State {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, Resource>,
}

/// A batch of fetched resources answering one requirement key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Resources {
    #[serde(default)]
    pub items: Vec<Resource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestMeta {
    #[serde(default)]
    pub tag: String,
}

/// One invocation as handed over by the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub meta: RequestMeta,
    /// Function input; see `stencil_compose::input`.
    #[serde(default)]
    pub input: Json,
    #[serde(default)]
    pub observed: State,
    #[serde(default)]
    pub desired: State,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Object,
    /// Resources fetched for requirements declared on a previous invocation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_resources: BTreeMap<String, Resources>,
    /// Newer name for `extra_resources`; both are honoured.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub required_resources: BTreeMap<String, Resources>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    #[serde(rename = "SEVERITY_NORMAL")]
    Normal,
    #[serde(rename = "SEVERITY_WARNING")]
    Warning,
    #[serde(rename = "SEVERITY_FATAL")]
    Fatal,
}

/// Who gets to see a result or condition.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Target {
    #[default]
    #[serde(rename = "TARGET_COMPOSITE")]
    Composite,
    #[serde(rename = "TARGET_COMPOSITE_AND_CLAIM")]
    CompositeAndClaim,
}

/// A diagnostic attached to the response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FnResult {
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub target: Target,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionStatus {
    #[default]
    #[serde(rename = "STATUS_CONDITION_UNKNOWN")]
    Unknown,
    #[serde(rename = "STATUS_CONDITION_TRUE")]
    True,
    #[serde(rename = "STATUS_CONDITION_FALSE")]
    False,
}

/// Externally visible condition set by a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub target: Target,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchLabels {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Exactly one way of matching fetched resources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Match {
    MatchName(String),
    MatchLabels(MatchLabels),
}

/// Request to fetch extra resources on the next invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    pub api_version: String,
    pub kind: String,
    #[serde(flatten)]
    pub matching: Match,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirements {
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSelector>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseMeta {
    #[serde(default)]
    pub tag: String,
    pub ttl: String,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self { tag: String::new(), ttl: DEFAULT_TTL.to_string() }
    }
}

/// Outgoing response. Built from the request, then mutated by the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default)]
    pub meta: ResponseMeta,
    #[serde(default)]
    pub desired: State,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<FnResult>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Object,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Response {
    /// Start a response for `req`: desired state and context carried forward, tag echoed.
    pub fn to(req: &Request) -> Self {
        Self {
            meta: ResponseMeta { tag: req.meta.tag.clone(), ..Default::default() },
            desired: req.desired.clone(),
            context: req.context.clone(),
            ..Default::default()
        }
    }

    pub fn fatal(&mut self, message: impl Into<String>) {
        self.results.push(FnResult { severity: Severity::Fatal, message: message.into(), target: Target::Composite });
    }

    pub fn is_fatal(&self) -> bool {
        self.results.iter().any(|r| r.severity == Severity::Fatal)
    }

    pub fn set_context_key(&mut self, key: impl Into<String>, value: Json) {
        self.context.insert(key.into(), value);
    }
}

/// Base64 encoding for connection-detail values.
mod base64_map {
    use std::collections::BTreeMap;

    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(map: &BTreeMap<String, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: BTreeMap<&str, String> = map.iter().map(|(k, v)| (k.as_str(), STANDARD.encode(v))).collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(&v)
                    .map(|bytes| (k, bytes))
                    .map_err(|e| serde::de::Error::custom(format!("base64 decode error: {e}")))
            })
            .collect()
    }
}
