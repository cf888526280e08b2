//! Tunable constants for scoring, resolution and conflict arbitration.
//!
//! Built once per run and passed by reference. Every struct deserializes
//! with `#[serde(default)]`, so a config file only needs the values it
//! overrides.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub interface: f64,
    pub superclass: f64,
    pub field_count: f64,
    pub field_type: f64,
    pub field_pattern: f64,
    pub method_count: f64,
    pub method_signature: f64,
    pub method_name: f64,
    pub constructor: f64,
    pub access_modifier: f64,
    pub functional_pattern: f64,
    pub cross_reference: f64,
    pub unique_pattern: f64,
    pub behavioral_signature: f64,
    pub call_graph: f64,
    pub state_manipulation: f64,
    pub iteration: f64,
    pub semantic_methods: f64,
    pub vertex_data_bonus: f64,
    pub texture_data_bonus: f64,
    pub world_data_bonus: f64,
    /// Subtracted when the size ratio exceeds `max_size_ratio`.
    pub size_penalty: f64,
    pub max_size_ratio: f64,
    pub deob_only_crossref_factor: f64,
    pub obf_only_crossref_factor: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            interface: 20.0,
            superclass: 25.0,
            field_count: 5.0,
            field_type: 10.0,
            field_pattern: 8.0,
            method_count: 5.0,
            method_signature: 20.0,
            method_name: 7.0,
            constructor: 5.0,
            access_modifier: 5.0,
            functional_pattern: 12.0,
            cross_reference: 15.0,
            unique_pattern: 8.0,
            behavioral_signature: 12.0,
            call_graph: 10.0,
            state_manipulation: 8.0,
            iteration: 6.0,
            semantic_methods: 8.0,
            vertex_data_bonus: 8.0,
            texture_data_bonus: 6.0,
            world_data_bonus: 5.0,
            size_penalty: 10.0,
            max_size_ratio: 1.5,
            deob_only_crossref_factor: 0.3,
            obf_only_crossref_factor: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverThresholds {
    pub anchor_confidence: f64,
    pub inheritance_confidence: f64,
    pub high_confidence: f64,
    pub crossref_analysis_confidence: f64,
    pub crossref_candidate_floor: f64,
    pub crossref_acceptance: f64,
    pub complexity_ratio_min: f64,
    pub complexity_ratio_max: f64,
    pub low_confidence: f64,
}

impl Default for ResolverThresholds {
    fn default() -> Self {
        Self {
            anchor_confidence: 100.0,
            inheritance_confidence: 85.0,
            high_confidence: 85.0,
            crossref_analysis_confidence: 75.0,
            crossref_candidate_floor: 5.0,
            crossref_acceptance: 8.0,
            complexity_ratio_min: 0.7,
            complexity_ratio_max: 1.3,
            low_confidence: 65.0,
        }
    }
}

/// Open interval `(min, max)` that earns `bonus`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
    pub bonus: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64, bonus: f64) -> Self {
        Self { min, max, bonus }
    }

    pub fn contains(&self, value: f64) -> bool {
        value > self.min && value < self.max
    }
}

/// Bonus of the first band containing `value`, or 0.
pub fn first_band_bonus(bands: &[Band], value: f64) -> f64 {
    bands
        .iter()
        .find(|b| b.contains(value))
        .map(|b| b.bonus)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictWeights {
    pub inheritance_multiplier: f64,
    pub behavioral_multiplier: f64,
    pub semantic_multiplier: f64,
    pub size_multiplier: f64,
    pub anchor_inheritance: f64,
    pub anchored_parent: f64,
    pub network_bonus: f64,
    pub network_fragments: Vec<String>,
    pub buffer_bonus: f64,
    pub buffer_fragments: Vec<String>,
    pub method_count_bands: Vec<Band>,
    pub method_similarity_bands: Vec<Band>,
}

impl Default for ConflictWeights {
    fn default() -> Self {
        let owned = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        Self {
            inheritance_multiplier: 2.0,
            behavioral_multiplier: 1.5,
            semantic_multiplier: 1.2,
            size_multiplier: 1.0,
            anchor_inheritance: 100.0,
            anchored_parent: 90.0,
            network_bonus: 30.0,
            network_fragments: owned(&["OnDemand", "Fetcher", "URL", "Socket", "InputStream"]),
            buffer_bonus: 25.0,
            buffer_fragments: owned(&["Stream", "Buffer", "Reader", "Writer"]),
            method_count_bands: vec![Band::new(40.0, 50.0, 10.0), Band::new(75.0, 90.0, 8.0)],
            method_similarity_bands: vec![Band::new(18.0, 22.0, 15.0), Band::new(16.0, 20.0, 12.0)],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub weights: ScoringWeights,
    pub thresholds: ResolverThresholds,
    pub conflict: ConflictWeights,
}
