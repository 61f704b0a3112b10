//! Static matching configuration and the registry built from it.
//!
//! The configuration document maps each resource type to its
//! `matchingProperties` and `discriminatorProperties`, each a map of dotted
//! path to `{algorithm, weight}`. Every type is validated on its own: a
//! malformed entry fails jobs for that type only.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info};

use mpi_core::defaults::TRANSFORMS_ROOT;
use mpi_core::walker::segments;
use mpi_core::{Error, Result};

/// Scoring algorithm named by a field configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Exact,
    Levenshtein,
    JaroWinkler,
    Soundex,
    /// Declared but not implemented; contributes nothing.
    Unsupported(String),
}

/// How an algorithm compares values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmFamily {
    /// Raw values, set intersection.
    Exact,
    /// Precomputed normalized strings, similarity in `[0, 1]`.
    Distance,
    /// Precomputed phonetic codes, similarity in `[0, 1]`.
    Phonetic,
    Unsupported,
}

impl Algorithm {
    pub fn from_id(id: &str) -> Self {
        match id {
            "exact" => Algorithm::Exact,
            "levenshtein" => Algorithm::Levenshtein,
            "jaro-winkler" => Algorithm::JaroWinkler,
            "soundex" => Algorithm::Soundex,
            other => Algorithm::Unsupported(other.to_string()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Algorithm::Exact => "exact",
            Algorithm::Levenshtein => "levenshtein",
            Algorithm::JaroWinkler => "jaro-winkler",
            Algorithm::Soundex => "soundex",
            Algorithm::Unsupported(id) => id,
        }
    }

    pub fn family(&self) -> AlgorithmFamily {
        match self {
            Algorithm::Exact => AlgorithmFamily::Exact,
            Algorithm::Levenshtein | Algorithm::JaroWinkler => AlgorithmFamily::Distance,
            Algorithm::Soundex => AlgorithmFamily::Phonetic,
            Algorithm::Unsupported(_) => AlgorithmFamily::Unsupported,
        }
    }

    /// Whether values must be precomputed by the before-write hook.
    pub fn uses_representation(&self) -> bool {
        matches!(
            self.family(),
            AlgorithmFamily::Distance | AlgorithmFamily::Phonetic
        )
    }
}

/// One configured field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatchConfig {
    pub path: String,
    pub algorithm: Algorithm,
    pub weight: f64,
}

impl FieldMatchConfig {
    pub fn new(path: impl Into<String>, algorithm: Algorithm, weight: f64) -> Self {
        Self {
            path: path.into(),
            algorithm,
            weight,
        }
    }

    /// Where the precomputed representation lives,
    /// `_transforms.matching.<algorithm>.<path>`.
    pub fn representation_path(&self) -> String {
        format!("{}.{}.{}", TRANSFORMS_ROOT, self.algorithm.id(), self.path)
    }

    /// Path compared by this field: the raw path for exact matching, the
    /// representation path otherwise.
    pub fn value_path(&self) -> String {
        if self.algorithm.uses_representation() {
            self.representation_path()
        } else {
            self.path.clone()
        }
    }
}

/// Validated configuration for one resource type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceMatchConfig {
    pub matching_properties: Vec<FieldMatchConfig>,
    pub discriminator_properties: Vec<FieldMatchConfig>,
}

impl ResourceMatchConfig {
    /// Every configured field, matching properties first.
    pub fn all_fields(&self) -> impl Iterator<Item = &FieldMatchConfig> {
        self.matching_properties
            .iter()
            .chain(self.discriminator_properties.iter())
    }
}

/// How per-field contributions are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreAccumulation {
    /// Sum capped at 1.0.
    #[default]
    Clamped,
    /// Plain sum; can exceed 1.0.
    Uncapped,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMatchingDocument {
    #[serde(default)]
    score_accumulation: ScoreAccumulation,
    #[serde(default)]
    resource_config: BTreeMap<String, JsonValue>,
}

/// Matching configuration for every resource type, built once at startup
/// and shared by the engine, the trigger and the workers.
#[derive(Debug, Clone, Default)]
pub struct MatchingRegistry {
    accumulation: ScoreAccumulation,
    types: BTreeMap<String, std::result::Result<ResourceMatchConfig, String>>,
}

impl MatchingRegistry {
    /// Build from a JSON value.
    pub fn from_value(value: JsonValue) -> Result<Self> {
        let raw: RawMatchingDocument = serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("invalid matching configuration: {}", e)))?;
        Ok(Self::from_raw(raw))
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let raw: RawMatchingDocument = serde_json::from_str(s)
            .map_err(|e| Error::Config(format!("invalid matching configuration: {}", e)))?;
        Ok(Self::from_raw(raw))
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let raw: RawMatchingDocument = serde_yaml::from_str(s)?;
        Ok(Self::from_raw(raw))
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let registry = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents)?,
            _ => Self::from_json_str(&contents)?,
        };
        info!(
            subsystem = "matching",
            component = "registry",
            path = %path.display(),
            resource_types = registry.types.len(),
            "Matching configuration loaded"
        );
        Ok(registry)
    }

    /// Add or replace one type's configuration.
    pub fn with_resource(mut self, resource_type: impl Into<String>, config: ResourceMatchConfig) -> Self {
        self.types.insert(resource_type.into(), Ok(config));
        self
    }

    pub fn with_accumulation(mut self, accumulation: ScoreAccumulation) -> Self {
        self.accumulation = accumulation;
        self
    }

    pub fn accumulation(&self) -> ScoreAccumulation {
        self.accumulation
    }

    /// Validated configuration for a type.
    ///
    /// Fails with [`Error::Config`] when the type has no entry or its entry
    /// is malformed.
    pub fn config_for(&self, resource_type: &str) -> Result<&ResourceMatchConfig> {
        match self.types.get(resource_type) {
            Some(Ok(config)) => Ok(config),
            Some(Err(reason)) => Err(Error::Config(format!(
                "matching configuration for {} is invalid: {}",
                resource_type, reason
            ))),
            None => Err(Error::Config(format!(
                "no matching configuration for resource type {}",
                resource_type
            ))),
        }
    }

    /// Whether the type has an entry, valid or not. Writes to configured
    /// types are enqueued so configuration bugs surface as failing jobs.
    pub fn is_configured(&self, resource_type: &str) -> bool {
        self.types.contains_key(resource_type)
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    fn from_raw(raw: RawMatchingDocument) -> Self {
        let types = raw
            .resource_config
            .into_iter()
            .map(|(resource_type, value)| {
                let parsed = parse_resource_config(&value);
                if let Err(reason) = &parsed {
                    error!(
                        subsystem = "matching",
                        component = "registry",
                        resource_type = %resource_type,
                        error = %reason,
                        "Invalid matching configuration, jobs for this type will fail"
                    );
                }
                (resource_type, parsed)
            })
            .collect();
        Self {
            accumulation: raw.score_accumulation,
            types,
        }
    }
}

fn parse_resource_config(value: &JsonValue) -> std::result::Result<ResourceMatchConfig, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "resource configuration must be an object".to_string())?;

    let matching = obj
        .get("matchingProperties")
        .ok_or_else(|| "missing matchingProperties".to_string())?;
    let matching_properties = parse_properties("matchingProperties", matching)?;

    let discriminator_properties = match obj.get("discriminatorProperties") {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(v) => parse_properties("discriminatorProperties", v)?,
    };

    Ok(ResourceMatchConfig {
        matching_properties,
        discriminator_properties,
    })
}

fn parse_properties(
    section: &str,
    value: &JsonValue,
) -> std::result::Result<Vec<FieldMatchConfig>, String> {
    let props = value
        .as_object()
        .ok_or_else(|| format!("{} must be an object", section))?;

    props
        .iter()
        .map(|(path, def)| {
            if segments(path).is_none() {
                return Err(format!("{}: invalid path '{}'", section, path));
            }
            let algorithm = def
                .get("algorithm")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| format!("{}.{}: missing algorithm", section, path))?;
            let weight = def
                .get("weight")
                .and_then(JsonValue::as_f64)
                .ok_or_else(|| format!("{}.{}: missing numeric weight", section, path))?;
            if !weight.is_finite() || weight < 0.0 {
                return Err(format!(
                    "{}.{}: weight must be a non-negative number",
                    section, path
                ));
            }
            Ok(FieldMatchConfig::new(
                path.clone(),
                Algorithm::from_id(algorithm),
                weight,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> JsonValue {
        json!({
            "resourceConfig": {
                "Patient": {
                    "matchingProperties": {
                        "name.given": {"algorithm": "levenshtein", "weight": 0.3},
                        "identifier.value": {"algorithm": "exact", "weight": 0.5},
                        "name.family": {"algorithm": "double-metaphone", "weight": 0.2}
                    },
                    "discriminatorProperties": {
                        "gender": {"algorithm": "exact", "weight": 1}
                    }
                },
                "Practitioner": {
                    "matchingProperties": {
                        "name.given": {"weight": 0.3}
                    }
                },
                "Location": {
                    "discriminatorProperties": {}
                }
            }
        })
    }

    #[test]
    fn test_algorithm_ids_roundtrip() {
        for id in ["exact", "levenshtein", "jaro-winkler", "soundex", "double-metaphone"] {
            assert_eq!(Algorithm::from_id(id).id(), id);
        }
        assert_eq!(
            Algorithm::from_id("double-metaphone").family(),
            AlgorithmFamily::Unsupported
        );
        assert_eq!(Algorithm::Soundex.family(), AlgorithmFamily::Phonetic);
        assert!(Algorithm::JaroWinkler.uses_representation());
        assert!(!Algorithm::Exact.uses_representation());
    }

    #[test]
    fn test_value_path() {
        let exact = FieldMatchConfig::new("identifier.value", Algorithm::Exact, 1.0);
        assert_eq!(exact.value_path(), "identifier.value");

        let lev = FieldMatchConfig::new("name.given", Algorithm::Levenshtein, 1.0);
        assert_eq!(
            lev.value_path(),
            "_transforms.matching.levenshtein.name.given"
        );
    }

    #[test]
    fn test_registry_parses_valid_type() {
        let registry = MatchingRegistry::from_value(sample()).unwrap();
        let patient = registry.config_for("Patient").unwrap();

        assert_eq!(patient.matching_properties.len(), 3);
        assert_eq!(patient.discriminator_properties.len(), 1);
        let given = patient
            .matching_properties
            .iter()
            .find(|f| f.path == "name.given")
            .unwrap();
        assert_eq!(given.algorithm, Algorithm::Levenshtein);
        assert_eq!(given.weight, 0.3);
        assert_eq!(registry.accumulation(), ScoreAccumulation::Clamped);
    }

    #[test]
    fn test_registry_isolates_malformed_types() {
        let registry = MatchingRegistry::from_value(sample()).unwrap();

        let err = registry.config_for("Practitioner").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("missing algorithm"));

        let err = registry.config_for("Location").unwrap_err();
        assert!(err.to_string().contains("missing matchingProperties"));

        assert!(registry.is_configured("Practitioner"));
        assert!(registry.config_for("Patient").is_ok());
    }

    #[test]
    fn test_registry_unknown_type_is_config_error() {
        let registry = MatchingRegistry::from_value(sample()).unwrap();
        assert!(!registry.is_configured("Encounter"));
        assert!(registry.config_for("Encounter").unwrap_err().is_config());
    }

    #[test]
    fn test_registry_rejects_bad_weights_and_paths() {
        let registry = MatchingRegistry::from_value(json!({
            "resourceConfig": {
                "A": {"matchingProperties": {"x": {"algorithm": "exact", "weight": -0.1}}},
                "B": {"matchingProperties": {"x..y": {"algorithm": "exact", "weight": 0.1}}},
                "C": {"matchingProperties": {"x": {"algorithm": "exact", "weight": "heavy"}}}
            }
        }))
        .unwrap();

        assert!(registry.config_for("A").is_err());
        assert!(registry.config_for("B").is_err());
        assert!(registry.config_for("C").is_err());
    }

    #[test]
    fn test_registry_from_yaml() {
        let yaml = r#"
scoreAccumulation: uncapped
resourceConfig:
  Patient:
    matchingProperties:
      name.given:
        algorithm: jaro-winkler
        weight: 0.4
"#;
        let registry = MatchingRegistry::from_yaml_str(yaml).unwrap();
        assert_eq!(registry.accumulation(), ScoreAccumulation::Uncapped);
        let patient = registry.config_for("Patient").unwrap();
        assert_eq!(patient.matching_properties[0].algorithm, Algorithm::JaroWinkler);
        assert_eq!(registry.resource_types().collect::<Vec<_>>(), vec!["Patient"]);
    }

    #[test]
    fn test_registry_rejects_non_object_document() {
        assert!(MatchingRegistry::from_json_str("[1, 2]").unwrap_err().is_config());
    }

    #[test]
    fn test_registry_builder() {
        let registry = MatchingRegistry::default()
            .with_accumulation(ScoreAccumulation::Uncapped)
            .with_resource(
                "Patient",
                ResourceMatchConfig {
                    matching_properties: vec![FieldMatchConfig::new("gender", Algorithm::Exact, 1.0)],
                    discriminator_properties: Vec::new(),
                },
            );
        assert_eq!(registry.config_for("Patient").unwrap().all_fields().count(), 1);
        assert_eq!(registry.accumulation(), ScoreAccumulation::Uncapped);
    }
}
