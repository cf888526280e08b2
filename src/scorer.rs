//! Weighted multi-dimension similarity between one deobfuscated and one
//! obfuscated class.
//!
//! Every dimension lands in its own [`ScoreBreakdown`] field; the total is
//! their plain sum. Ratios are only taken over non-zero denominators, so a
//! breakdown is always finite.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::behavior::InternalBehavior;
use crate::classify::StructureKind;
use crate::crossref::{CrossReferenceGraph, ReferenceKind};
use crate::model::ClassStructure;
use crate::weights::ScoringWeights;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub interface_match: f64,
    pub superclass_match: f64,
    pub field_count_match: f64,
    pub field_type_similarity: f64,
    pub field_pattern_similarity: f64,
    pub method_count_match: f64,
    pub method_signature_similarity: f64,
    pub method_name_similarity: f64,
    pub functional_pattern: f64,
    pub crossref_similarity: f64,
    pub unique_patterns: f64,
    pub behavioral_signature: f64,
    pub call_graph_similarity: f64,
    pub state_similarity: f64,
    pub iteration_similarity: f64,
    pub semantic_method_similarity: f64,
    pub domain_bonus: f64,
    pub constructor_match: f64,
    pub access_match: f64,
    /// Zero or negative.
    pub size_penalty: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.interface_match
            + self.superclass_match
            + self.field_count_match
            + self.field_type_similarity
            + self.field_pattern_similarity
            + self.method_count_match
            + self.method_signature_similarity
            + self.method_name_similarity
            + self.functional_pattern
            + self.crossref_similarity
            + self.unique_patterns
            + self.behavioral_signature
            + self.call_graph_similarity
            + self.state_similarity
            + self.iteration_similarity
            + self.semantic_method_similarity
            + self.domain_bonus
            + self.constructor_match
            + self.access_match
            + self.size_penalty
    }

    /// Reference-graph evidence used by the cross-reference pass.
    pub fn crossref_combined(&self) -> f64 {
        self.crossref_similarity + self.unique_patterns + self.behavioral_signature
    }

    /// Everything derived from reference graphs and internal behavior.
    pub fn behavioral_evidence(&self) -> f64 {
        self.crossref_combined()
            + self.call_graph_similarity
            + self.state_similarity
            + self.iteration_similarity
            + self.semantic_method_similarity
    }
}

pub struct Scorer<'a> {
    weights: &'a ScoringWeights,
    anchors: &'a BTreeMap<String, String>,
}

impl<'a> Scorer<'a> {
    pub fn new(weights: &'a ScoringWeights, anchors: &'a BTreeMap<String, String>) -> Self {
        Self { weights, anchors }
    }

    pub fn weights(&self) -> &ScoringWeights {
        self.weights
    }

    /// Obfuscated name for `name` if it is anchored, else `name` itself.
    pub fn resolve<'s>(&'s self, name: &'s str) -> &'s str {
        self.anchors.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn score(&self, deob: &ClassStructure, obf: &ClassStructure) -> ScoreBreakdown {
        let w = self.weights;
        let mut b = ScoreBreakdown::default();

        if self.interfaces_match(deob, obf) {
            b.interface_match = w.interface;
        }
        if self.resolve(&deob.superclass) == obf.superclass {
            b.superclass_match = w.superclass;
        }
        if deob.fields.len() == obf.fields.len() {
            b.field_count_match = w.field_count;
        }
        b.field_type_similarity = field_type_similarity(deob, obf) * w.field_type;
        b.field_pattern_similarity = field_pattern_similarity(deob, obf) * w.field_pattern;
        if deob.methods.len() == obf.methods.len() {
            b.method_count_match = w.method_count;
        }
        b.method_signature_similarity = method_signature_similarity(deob, obf) * w.method_signature;
        b.method_name_similarity = method_name_similarity(deob, obf) * w.method_name;
        b.functional_pattern = functional_pattern(deob, obf) * w.functional_pattern;

        b.crossref_similarity = self.crossref_similarity(deob, obf) * w.cross_reference;
        if let (Some(d), Some(o)) = (&deob.cross_references, &obf.cross_references) {
            b.unique_patterns = unique_patterns(d, o) * w.unique_pattern;
            b.behavioral_signature = behavioral_signature(d, o) * w.behavioral_signature;
        }
        if let (Some(d), Some(o)) = (&deob.behavior, &obf.behavior) {
            b.call_graph_similarity = call_graph_similarity(d, o) * w.call_graph;
            b.state_similarity = state_similarity(d, o) * w.state_manipulation;
            b.iteration_similarity = iteration_similarity(d, o) * w.iteration;
            b.semantic_method_similarity = semantic_similarity(d, o) * w.semantic_methods;
        }
        b.domain_bonus = self.domain_bonus(deob);

        if deob.constructors.len() == obf.constructors.len() {
            b.constructor_match = w.constructor;
        }
        if modifier_set(deob) == modifier_set(obf) {
            b.access_match = w.access_modifier;
        }
        if size_mismatch(deob, obf, w.max_size_ratio) {
            b.size_penalty = -w.size_penalty;
        }
        b
    }

    /// All-or-nothing: every deobfuscated interface, after anchor
    /// resolution, must be implemented by the obfuscated class.
    fn interfaces_match(&self, deob: &ClassStructure, obf: &ClassStructure) -> bool {
        !deob.interfaces.is_empty()
            && deob
                .interfaces
                .iter()
                .all(|i| obf.interfaces.iter().any(|o| o == self.resolve(i)))
    }

    /// In `[0, 1]`. Falls back to a discounted structural proxy when only
    /// one side carries a reference graph.
    fn crossref_similarity(&self, deob: &ClassStructure, obf: &ClassStructure) -> f64 {
        let w = self.weights;
        match (&deob.cross_references, &obf.cross_references) {
            (Some(d), Some(o)) => {
                if d.is_empty() || o.is_empty() {
                    return 0.0;
                }
                let dd = d.density(deob.complexity());
                let od = o.density(obf.complexity());
                let density = (dd.min(od) / dd.max(od)).min(1.0);
                d.jaccard(o) * density
            }
            (Some(d), None) if !d.is_empty() => {
                self.structural_proxy(deob, obf) * w.deob_only_crossref_factor
            }
            (None, Some(o)) if !o.is_empty() => {
                self.structural_proxy(deob, obf) * w.obf_only_crossref_factor
            }
            _ => 0.0,
        }
    }

    fn structural_proxy(&self, deob: &ClassStructure, obf: &ClassStructure) -> f64 {
        let w = self.weights;
        let denominator = w.method_signature + w.field_type;
        if denominator <= 0.0 {
            return 0.0;
        }
        (method_signature_similarity(deob, obf) * w.method_signature
            + field_type_similarity(deob, obf) * w.field_type)
            / denominator
    }

    fn domain_bonus(&self, deob: &ClassStructure) -> f64 {
        let Some(behavior) = &deob.behavior else {
            return 0.0;
        };
        match behavior.classification.kind {
            StructureKind::VertexData => self.weights.vertex_data_bonus,
            StructureKind::TextureData => self.weights.texture_data_bonus,
            StructureKind::WorldData => self.weights.world_data_bonus,
            _ => 0.0,
        }
    }
}

/// `min / max` of two positive counts.
fn ratio(a: usize, b: usize) -> f64 {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    if hi == 0 {
        return 0.0;
    }
    lo as f64 / hi as f64
}

/// Weighted sum of count ratios, skipping components where either side
/// is zero.
fn agreement(components: &[(usize, usize, f64)]) -> f64 {
    components
        .iter()
        .filter(|(a, b, _)| *a > 0 && *b > 0)
        .map(|(a, b, weight)| ratio(*a, *b) * weight)
        .sum()
}

pub fn field_type_similarity(deob: &ClassStructure, obf: &ClassStructure) -> f64 {
    if deob.fields.is_empty() || obf.fields.is_empty() {
        return 0.0;
    }
    let matching = deob
        .fields
        .iter()
        .filter(|d| obf.fields.iter().any(|o| o.type_name == d.type_name))
        .count();
    matching as f64 / deob.fields.len().max(obf.fields.len()) as f64
}

pub fn field_pattern_similarity(deob: &ClassStructure, obf: &ClassStructure) -> f64 {
    if deob.fields.is_empty() || obf.fields.is_empty() {
        return 0.0;
    }
    fn histogram(class: &ClassStructure) -> HashMap<&str, usize> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for field in &class.fields {
            *counts.entry(field.type_name.as_str()).or_insert(0) += 1;
        }
        counts
    }
    let deob_types = histogram(deob);
    let obf_types = histogram(obf);
    let matching = deob_types
        .iter()
        .filter(|(ty, count)| {
            obf_types
                .get(*ty)
                .is_some_and(|other| count.abs_diff(*other) <= 2)
        })
        .count();
    matching as f64 / deob_types.len() as f64
}

pub fn method_signature_similarity(deob: &ClassStructure, obf: &ClassStructure) -> f64 {
    if deob.methods.is_empty() || obf.methods.is_empty() {
        return 0.0;
    }
    let matching = deob
        .methods
        .iter()
        .filter(|d| obf.methods.iter().any(|o| d.same_signature(o)))
        .count();
    matching as f64 / deob.methods.len().max(obf.methods.len()) as f64
}

/// 1.0 when both sides share a naming style, 0.5 otherwise. Styles are
/// measured as the share of multi-character deobfuscated names and the
/// share of single-character obfuscated names.
pub fn method_name_similarity(deob: &ClassStructure, obf: &ClassStructure) -> f64 {
    if deob.methods.is_empty() || obf.methods.is_empty() {
        return 0.0;
    }
    let named = deob.methods.iter().filter(|m| m.name.chars().count() > 1).count();
    let single = obf.methods.iter().filter(|m| m.name.chars().count() == 1).count();
    let deob_ratio = named as f64 / deob.methods.len() as f64;
    let obf_ratio = single as f64 / obf.methods.len() as f64;

    if (deob_ratio > 0.8 && obf_ratio > 0.8) || (deob_ratio < 0.2 && obf_ratio < 0.2) {
        1.0
    } else {
        0.5
    }
}

pub fn functional_pattern(deob: &ClassStructure, obf: &ClassStructure) -> f64 {
    let (df, dm) = (deob.fields.len(), deob.methods.len());
    let (of, om) = (obf.fields.len(), obf.methods.len());
    let mut score = 0.0;

    // utility class
    if df <= 3 && of <= 5 && dm >= 5 && om >= 3 {
        score += 0.3;
    }
    // data structure
    let has_arrays = deob.fields.iter().any(|f| f.type_name.contains('['));
    if has_arrays && df > dm && of > om {
        score += 0.3;
    }
    // interface implementation
    if !deob.interfaces.is_empty() && dm > df && om > of {
        score += 0.4;
    }
    score
}

pub fn unique_patterns(deob: &CrossReferenceGraph, obf: &CrossReferenceGraph) -> f64 {
    agreement(&[
        (deob.chained_references, obf.chained_references, 0.4),
        (deob.array_references, obf.array_references, 0.3),
        (deob.unique_targets.len(), obf.unique_targets.len(), 0.3),
    ])
}

const KIND_WEIGHTS: [(ReferenceKind, f64); 5] = [
    (ReferenceKind::MethodCall, 0.4),
    (ReferenceKind::Instantiation, 0.3),
    (ReferenceKind::FieldAccess, 0.2),
    (ReferenceKind::StaticCall, 0.05),
    (ReferenceKind::ArrayAccess, 0.05),
];

/// Per-kind reference-count agreement, normalized over the kinds that
/// occur on at least one side.
pub fn behavioral_signature(deob: &CrossReferenceGraph, obf: &CrossReferenceGraph) -> f64 {
    let mut similarity = 0.0;
    let mut total_weight = 0.0;
    for (kind, weight) in KIND_WEIGHTS {
        let (d, o) = (deob.count(kind), obf.count(kind));
        if d == 0 && o == 0 {
            continue;
        }
        if d > 0 && o > 0 {
            similarity += ratio(d, o) * weight;
        }
        total_weight += weight;
    }
    if total_weight == 0.0 {
        return 0.0;
    }
    similarity / total_weight
}

pub fn call_graph_similarity(deob: &InternalBehavior, obf: &InternalBehavior) -> f64 {
    let (d, o) = (&deob.call_graph, &obf.call_graph);
    agreement(&[
        (d.callers(), o.callers(), 0.4),
        (d.total_calls(), o.total_calls(), 0.4),
        (d.recursive.len(), o.recursive.len(), 0.2),
    ])
}

pub fn state_similarity(deob: &InternalBehavior, obf: &InternalBehavior) -> f64 {
    let (d, o) = (&deob.state, &obf.state);
    agreement(&[
        (d.field_reads.len(), o.field_reads.len(), 0.25),
        (d.field_writes.len(), o.field_writes.len(), 0.25),
        (d.total_reads(), o.total_reads(), 0.2),
        (d.total_writes(), o.total_writes(), 0.2),
        (d.set_state_calls, o.set_state_calls, 0.1),
    ])
}

pub fn iteration_similarity(deob: &InternalBehavior, obf: &InternalBehavior) -> f64 {
    let (d, o) = (&deob.iteration, &obf.iteration);
    agreement(&[
        (d.for_loops, o.for_loops, 0.4),
        (d.while_loops, o.while_loops, 0.3),
        (d.iterator_usage, o.iterator_usage, 0.15),
        (d.stream_operations, o.stream_operations, 0.15),
    ])
}

pub fn semantic_similarity(deob: &InternalBehavior, obf: &InternalBehavior) -> f64 {
    let (d, o) = (&deob.semantics, &obf.semantics);
    agreement(&[
        (d.getters.len(), o.getters.len(), 0.25),
        (d.setters.len(), o.setters.len(), 0.25),
        (d.builders.len(), o.builders.len(), 0.125),
        (d.factories.len(), o.factories.len(), 0.125),
        (d.event_handlers.len(), o.event_handlers.len(), 0.125),
        (d.utilities.len(), o.utilities.len(), 0.125),
    ])
}

fn modifier_set(class: &ClassStructure) -> BTreeSet<&str> {
    class.modifiers.iter().map(String::as_str).collect()
}

/// `max / min` of the two member counts exceeds `max_ratio`. Never true
/// when either class is empty.
pub fn size_mismatch(deob: &ClassStructure, obf: &ClassStructure, max_ratio: f64) -> bool {
    let (a, b) = (deob.complexity(), obf.complexity());
    if a == 0 || b == 0 {
        return false;
    }
    a.max(b) as f64 / a.min(b) as f64 > max_ratio
}
