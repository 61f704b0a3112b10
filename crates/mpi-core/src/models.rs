//! Core data models for the MPI registry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::defaults::{
    LINK_MATCHING_SCORE_URL, MPI_MATCH_URL, POSSIBLE_THRESHOLD, PROBABLE_THRESHOLD,
};
use crate::error::{Error, Result};

// =============================================================================
// RESOURCES
// =============================================================================

/// A versioned resource document from one of the registry collections.
///
/// `body` is the full JSON document as stored, including `resourceType`,
/// `id`, `meta.versionId` and the `link` array. The typed fields mirror
/// the identity parts of the body so callers never need to re-parse them.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub resource_type: String,
    pub id: String,
    pub version_id: i64,
    pub body: JsonValue,
}

impl Resource {
    /// Build a first-version resource, stamping identity fields into the body.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>, body: JsonValue) -> Self {
        let resource_type = resource_type.into();
        let id = id.into();
        let mut body = match body {
            JsonValue::Object(map) => JsonValue::Object(map),
            _ => JsonValue::Object(Map::new()),
        };
        if let Some(obj) = body.as_object_mut() {
            obj.insert("resourceType".into(), JsonValue::String(resource_type.clone()));
            obj.insert("id".into(), JsonValue::String(id.clone()));
        }
        let mut resource = Self {
            resource_type,
            id,
            version_id: 1,
            body,
        };
        resource.stamp_meta(None);
        resource
    }

    /// Parse a stored or submitted document.
    ///
    /// `meta.versionId` may be a string or a number; documents without one
    /// are treated as version 1.
    pub fn from_json(body: JsonValue) -> Result<Self> {
        let obj = body
            .as_object()
            .ok_or_else(|| Error::InvalidInput("resource must be a JSON object".into()))?;

        let resource_type = obj
            .get("resourceType")
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidInput("resource is missing resourceType".into()))?
            .to_string();
        let id = obj
            .get("id")
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidInput("resource is missing id".into()))?
            .to_string();

        let version_id = match obj.get("meta").and_then(|m| m.get("versionId")) {
            None | Some(JsonValue::Null) => 1,
            Some(JsonValue::Number(n)) => n.as_i64().ok_or_else(|| {
                Error::InvalidInput(format!("versionId {} is not an integer", n))
            })?,
            Some(JsonValue::String(s)) => s.parse::<i64>().map_err(|_| {
                Error::InvalidInput(format!("versionId '{}' is not an integer", s))
            })?,
            Some(other) => {
                return Err(Error::InvalidInput(format!(
                    "versionId has unexpected type: {}",
                    other
                )))
            }
        };

        Ok(Self {
            resource_type,
            id,
            version_id,
            body,
        })
    }

    /// Relative reference, e.g. `Patient/123`.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// Decode the `link` array. A missing array is an empty link set.
    pub fn links(&self) -> Result<Vec<ResourceLink>> {
        match self.body.get("link") {
            None | Some(JsonValue::Null) => Ok(Vec::new()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }

    /// Replace the `link` array.
    pub fn set_links(&mut self, links: Vec<ResourceLink>) -> Result<()> {
        let encoded = serde_json::to_value(links)?;
        let obj = self
            .body
            .as_object_mut()
            .ok_or_else(|| Error::InvalidInput("resource body is not a JSON object".into()))?;
        obj.insert("link".into(), encoded);
        Ok(())
    }

    /// Copy of this resource as the next version, with `meta` updated.
    pub fn next_version(&self) -> Self {
        let mut next = self.clone();
        next.version_id = self.version_id + 1;
        next.stamp_meta(Some(Utc::now()));
        next
    }

    /// Consume the resource, returning the stored document.
    pub fn into_json(self) -> JsonValue {
        self.body
    }

    fn stamp_meta(&mut self, last_updated: Option<DateTime<Utc>>) {
        let version = self.version_id.to_string();
        if let Some(obj) = self.body.as_object_mut() {
            let meta = obj
                .entry("meta")
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if !meta.is_object() {
                *meta = JsonValue::Object(Map::new());
            }
            if let Some(meta) = meta.as_object_mut() {
                meta.insert("versionId".into(), JsonValue::String(version));
                if let Some(ts) = last_updated {
                    meta.insert(
                        "lastUpdated".into(),
                        JsonValue::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
                    );
                }
            }
        }
    }
}

// =============================================================================
// LINKS
// =============================================================================

/// Reference to another resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub reference: String,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Reference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            extra: Map::new(),
        }
    }
}

/// Extension element attached to a link edge or search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extension {
    pub url: String,
    #[serde(rename = "valueDecimal", default, skip_serializing_if = "Option::is_none")]
    pub value_decimal: Option<f64>,
    #[serde(rename = "valueCode", default, skip_serializing_if = "Option::is_none")]
    pub value_code: Option<String>,
}

/// One entry of a document's `link` array.
///
/// Links written by other parts of the system (e.g. `replaced-by`) are
/// carried through untouched, including any fields this type does not model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLink {
    pub other: Reference,
    #[serde(rename = "type")]
    pub link_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl ResourceLink {
    /// A duplicate edge pointing at `other` with its matching score.
    pub fn duplicate(other: impl Into<String>, link_type: DuplicateLinkType, score: f64) -> Self {
        Self {
            other: Reference::new(other),
            link_type: link_type.to_string(),
            extension: vec![Extension {
                url: LINK_MATCHING_SCORE_URL.to_string(),
                value_decimal: Some(score),
                value_code: None,
            }],
            extra: Map::new(),
        }
    }

    /// Parsed duplicate type, or `None` for links not owned by matching.
    pub fn duplicate_type(&self) -> Option<DuplicateLinkType> {
        self.link_type.parse().ok()
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate_type().is_some()
    }

    pub fn references(&self, reference: &str) -> bool {
        self.other.reference == reference
    }

    /// Score recorded in the matching-score extension, if any.
    pub fn matching_score(&self) -> Option<f64> {
        self.extension
            .iter()
            .find(|e| e.url == LINK_MATCHING_SCORE_URL)
            .and_then(|e| e.value_decimal)
    }
}

/// Which end of a duplicate relationship a link edge sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    /// Written on a candidate, pointing at the resource that was matched.
    Source,
    /// Written on the matched resource, pointing at a candidate.
    Target,
}

impl LinkRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkRole::Source => "source",
            LinkRole::Target => "target",
        }
    }

    pub fn inverse(&self) -> Self {
        match self {
            LinkRole::Source => LinkRole::Target,
            LinkRole::Target => LinkRole::Source,
        }
    }
}

/// `<classification>-duplicate-<role>` link type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DuplicateLinkType {
    pub classification: MatchClassification,
    pub role: LinkRole,
}

impl DuplicateLinkType {
    pub fn new(classification: MatchClassification, role: LinkRole) -> Self {
        Self {
            classification,
            role,
        }
    }

    /// Same classification, opposite end of the edge.
    pub fn inverse(&self) -> Self {
        Self::new(self.classification, self.role.inverse())
    }
}

impl fmt::Display for DuplicateLinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-duplicate-{}",
            self.classification.code(),
            self.role.as_str()
        )
    }
}

impl FromStr for DuplicateLinkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (classification, role) = s
            .split_once("-duplicate-")
            .ok_or_else(|| Error::InvalidInput(format!("not a duplicate link type: {}", s)))?;
        let classification = match classification {
            "certain" => MatchClassification::Certain,
            "probable" => MatchClassification::Probable,
            "possible" => MatchClassification::Possible,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "unknown duplicate classification: {}",
                    classification
                )))
            }
        };
        let role = match role {
            "source" => LinkRole::Source,
            "target" => LinkRole::Target,
            _ => return Err(Error::InvalidInput(format!("unknown link role: {}", role))),
        };
        Ok(Self::new(classification, role))
    }
}

// =============================================================================
// MATCH RESULTS
// =============================================================================

/// Discrete label derived from a match score via fixed thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchClassification {
    Certain,
    Probable,
    Possible,
    CertainlyNot,
}

impl MatchClassification {
    /// `== 1` certain, `> 0.9` probable, `> 0.5` possible, else certainly-not.
    ///
    /// Uncapped accumulation can produce scores above 1; those are classified
    /// by the same rules and therefore land on `probable`.
    pub fn from_score(score: f64) -> Self {
        if score == 1.0 {
            MatchClassification::Certain
        } else if score > PROBABLE_THRESHOLD {
            MatchClassification::Probable
        } else if score > POSSIBLE_THRESHOLD {
            MatchClassification::Possible
        } else {
            MatchClassification::CertainlyNot
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            MatchClassification::Certain => "certain",
            MatchClassification::Probable => "probable",
            MatchClassification::Possible => "possible",
            MatchClassification::CertainlyNot => "certainly-not",
        }
    }

    /// Whether this classification earns a link edge.
    pub fn is_match(&self) -> bool {
        !matches!(self, MatchClassification::CertainlyNot)
    }
}

/// One scored candidate from a match run. Never persisted directly.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub resource_type: String,
    pub resource_id: String,
    pub score: f64,
    pub classification: MatchClassification,
}

impl MatchCandidate {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>, score: f64) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            score,
            classification: MatchClassification::from_score(score),
        }
    }

    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }

    /// Classification tag consumed by the search layer.
    pub fn search_tag(&self) -> JsonValue {
        serde_json::json!({
            "extension": {
                "url": MPI_MATCH_URL,
                "valueCode": self.classification.code(),
            },
            "score": self.score,
        })
    }
}

/// Ranked candidates plus whether any of them is a certain match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub candidates: Vec<MatchCandidate>,
    pub certain: bool,
}

impl MatchOutcome {
    pub fn new(candidates: Vec<MatchCandidate>) -> Self {
        let certain = candidates.iter().any(|c| c.score == 1.0);
        Self {
            candidates,
            certain,
        }
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Payload of a matching job: a snapshot of the written resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchJobPayload {
    pub resource_type: String,
    pub resource: JsonValue,
}

impl MatchJobPayload {
    pub fn for_resource(resource: &Resource) -> Self {
        Self {
            resource_type: resource.resource_type.clone(),
            resource: resource.body.clone(),
        }
    }

    /// Decode the snapshot, checking it belongs to the declared type.
    pub fn resource(&self) -> Result<Resource> {
        let resource = Resource::from_json(self.resource.clone())?;
        if resource.resource_type != self.resource_type {
            return Err(Error::InvalidInput(format!(
                "payload declares {} but carries a {}",
                self.resource_type, resource.resource_type
            )));
        }
        Ok(resource)
    }
}

/// A claimed job. `ack_token` is minted per delivery.
#[derive(Debug, Clone)]
pub struct MatchJob {
    pub id: Uuid,
    pub payload: MatchJobPayload,
    pub ack_token: Uuid,
    pub delivery_count: i32,
    pub enqueued_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
}

/// Snapshot of queue depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Jobs claimable right now.
    pub visible: i64,
    /// Jobs claimed and still inside their visibility window.
    pub in_flight: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.visible + self.in_flight
    }
}
