//! Arbitration between matches that claim the same obfuscated class.
//!
//! Each competitor is re-weighed from independent evidence: anchoring,
//! the reference and behavior parts of its existing breakdown, name
//! semantics and size bands. A literal anchor pair always wins.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{info, warn};

use crate::model::ClassStructure;
use crate::resolver::MatchResult;
use crate::weights::{ConflictWeights, first_band_bonus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    AnchorMapping,
    InheritanceChain,
    SemanticAnalysis,
    BehavioralPatterns,
    SizeCorrelation,
}

impl ResolutionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionReason::AnchorMapping => "anchor mapping",
            ResolutionReason::InheritanceChain => "inheritance chain",
            ResolutionReason::SemanticAnalysis => "semantic analysis",
            ResolutionReason::BehavioralPatterns => "behavioral patterns",
            ResolutionReason::SizeCorrelation => "size correlation",
        }
    }
}

impl fmt::Display for ResolutionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    pub result: MatchResult,
    pub inheritance_weight: f64,
    pub behavioral_weight: f64,
    pub semantic_weight: f64,
    pub size_weight: f64,
    pub total_weight: f64,
}

impl Evidence {
    /// Dominant evidence category, checked in priority order.
    pub fn reason(&self) -> ResolutionReason {
        if self.inheritance_weight >= 100.0 {
            ResolutionReason::AnchorMapping
        } else if self.inheritance_weight >= 90.0 {
            ResolutionReason::InheritanceChain
        } else if self.semantic_weight > self.behavioral_weight {
            ResolutionReason::SemanticAnalysis
        } else if self.behavioral_weight > 0.0 {
            ResolutionReason::BehavioralPatterns
        } else {
            ResolutionReason::SizeCorrelation
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub obfuscated_class: String,
    pub competitors: Vec<MatchResult>,
    pub winner: Option<MatchResult>,
    pub losers: Vec<MatchResult>,
    pub reason: Option<ResolutionReason>,
}

impl Conflict {
    pub fn is_resolved(&self) -> bool {
        self.winner.is_some()
    }
}

pub struct ConflictResolver<'a> {
    weights: &'a ConflictWeights,
    anchors: &'a BTreeMap<String, String>,
    superclasses: HashMap<&'a str, &'a str>,
    method_counts: HashMap<&'a str, usize>,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(
        weights: &'a ConflictWeights,
        anchors: &'a BTreeMap<String, String>,
        deob: &'a [ClassStructure],
    ) -> Self {
        Self {
            weights,
            anchors,
            superclasses: deob
                .iter()
                .filter(|c| c.has_superclass())
                .map(|c| (c.name.as_str(), c.superclass.as_str()))
                .collect(),
            method_counts: deob
                .iter()
                .map(|c| (c.name.as_str(), c.methods.len()))
                .collect(),
        }
    }

    fn is_anchor_pair(&self, result: &MatchResult) -> bool {
        self.anchors
            .get(&result.deobfuscated_class)
            .is_some_and(|obf| *obf == result.obfuscated_class)
    }

    pub fn evidence(&self, result: &MatchResult) -> Evidence {
        let w = self.weights;

        let inheritance_weight = if self.is_anchor_pair(result) {
            w.anchor_inheritance
        } else if self
            .superclasses
            .get(result.deobfuscated_class.as_str())
            .is_some_and(|parent| self.anchors.contains_key(*parent))
        {
            w.anchored_parent
        } else {
            0.0
        };

        let behavioral_weight = result.score_breakdown.behavioral_evidence();
        let semantic_weight = self.semantic_weight(result);
        let size_weight = first_band_bonus(
            &w.method_similarity_bands,
            result.score_breakdown.method_signature_similarity,
        );

        let total_weight = inheritance_weight * w.inheritance_multiplier
            + behavioral_weight * w.behavioral_multiplier
            + semantic_weight * w.semantic_multiplier
            + size_weight * w.size_multiplier;

        Evidence {
            result: result.clone(),
            inheritance_weight,
            behavioral_weight,
            semantic_weight,
            size_weight,
            total_weight,
        }
    }

    fn semantic_weight(&self, result: &MatchResult) -> f64 {
        let w = self.weights;
        let name = result.deobfuscated_class.as_str();
        let mut weight = 0.0;
        if w.network_fragments.iter().any(|f| name.contains(f.as_str())) {
            weight += w.network_bonus;
        }
        if w.buffer_fragments.iter().any(|f| name.contains(f.as_str())) {
            weight += w.buffer_bonus;
        }
        if let Some(count) = self.method_counts.get(name) {
            weight += first_band_bonus(&w.method_count_bands, *count as f64);
        }
        weight
    }

    /// Picks one winner among `competitors`, or none when no competitor
    /// carries any positive evidence.
    pub fn resolve_conflict(&self, obfuscated_class: &str, competitors: Vec<MatchResult>) -> Conflict {
        let evidence: Vec<Evidence> = competitors.iter().map(|r| self.evidence(r)).collect();

        let mut winner: Option<usize> = None;
        let mut best = f64::NEG_INFINITY;
        for (i, e) in evidence.iter().enumerate() {
            if self.is_anchor_pair(&e.result) && e.total_weight > best {
                best = e.total_weight;
                winner = Some(i);
            }
        }
        if winner.is_none() {
            best = 0.0;
            for (i, e) in evidence.iter().enumerate() {
                if e.total_weight > best {
                    best = e.total_weight;
                    winner = Some(i);
                }
            }
        }

        let Some(winner) = winner else {
            return Conflict {
                obfuscated_class: obfuscated_class.to_string(),
                competitors,
                winner: None,
                losers: Vec::new(),
                reason: None,
            };
        };
        let losers = competitors
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != winner)
            .map(|(_, r)| r.clone())
            .collect();
        Conflict {
            obfuscated_class: obfuscated_class.to_string(),
            winner: Some(competitors[winner].clone()),
            reason: Some(evidence[winner].reason()),
            losers,
            competitors,
        }
    }

    /// Final mapping plus a record of every collision. Groups keep the
    /// position where their obfuscated class first appeared.
    pub fn resolve_conflicts_detailed(&self, results: &[MatchResult]) -> (Vec<MatchResult>, Vec<Conflict>) {
        let mut order: Vec<(&str, Vec<MatchResult>)> = Vec::new();
        let mut slot: HashMap<&str, usize> = HashMap::new();
        for result in results {
            if result.obfuscated_class.is_empty() {
                continue;
            }
            let key = result.obfuscated_class.as_str();
            match slot.get(key) {
                Some(&i) => order[i].1.push(result.clone()),
                None => {
                    slot.insert(key, order.len());
                    order.push((key, vec![result.clone()]));
                }
            }
        }

        let mut mapping = Vec::with_capacity(order.len());
        let mut conflicts = Vec::new();
        let mut resolved = 0usize;
        for (obf, mut group) in order {
            if group.len() == 1 {
                mapping.extend(group.pop());
                continue;
            }
            let conflict = self.resolve_conflict(obf, group);
            match (&conflict.winner, conflict.reason) {
                (Some(winner), Some(reason)) => {
                    resolved += 1;
                    info!("resolved conflict for {obf}: {} won ({reason})", winner.deobfuscated_class);
                    for loser in &conflict.losers {
                        info!("eliminated {} for {obf}", loser.deobfuscated_class);
                    }
                    mapping.push(winner.clone());
                }
                _ => {
                    warn!("could not resolve conflict for {obf}, keeping all {} matches", conflict.competitors.len());
                    mapping.extend(conflict.competitors.iter().cloned());
                }
            }
            conflicts.push(conflict);
        }

        info!(mappings = mapping.len(), conflicts_resolved = resolved, "conflict resolution complete");
        (mapping, conflicts)
    }

    pub fn safe_resolve_conflicts(&self, results: &[MatchResult]) -> Vec<MatchResult> {
        self.resolve_conflicts_detailed(results).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassSource;
    use crate::scorer::ScoreBreakdown;

    fn result(deob: &str, obf: &str, breakdown: ScoreBreakdown) -> MatchResult {
        MatchResult {
            deobfuscated_class: deob.to_string(),
            obfuscated_class: obf.to_string(),
            confidence_score: breakdown.total(),
            score_breakdown: breakdown,
            details: String::new(),
        }
    }

    fn behavioral(amount: f64) -> ScoreBreakdown {
        ScoreBreakdown {
            crossref_similarity: amount,
            ..ScoreBreakdown::default()
        }
    }

    #[test]
    fn anchor_pair_beats_heavy_evidence() {
        let weights = ConflictWeights::default();
        let anchors = BTreeMap::from([("Model".to_string(), "ab".to_string())]);
        let resolver = ConflictResolver::new(&weights, &anchors, &[]);

        let results = vec![
            result("OnDemandFetcher", "ab", behavioral(500.0)),
            result("Model", "ab", ScoreBreakdown::default()),
        ];
        let (mapping, conflicts) = resolver.resolve_conflicts_detailed(&results);
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[0].deobfuscated_class, "Model");
        assert_eq!(conflicts[0].reason, Some(ResolutionReason::AnchorMapping));
        assert_eq!(conflicts[0].losers[0].deobfuscated_class, "OnDemandFetcher");
    }

    #[test]
    fn anchored_parent_outweighs_behavior() {
        let weights = ConflictWeights::default();
        let anchors = BTreeMap::from([("Entity".to_string(), "zz".to_string())]);
        let deob = vec![
            ClassStructure::new("Player", ClassSource::Deobfuscated).with_superclass("Entity"),
            ClassStructure::new("Widget", ClassSource::Deobfuscated),
        ];
        let resolver = ConflictResolver::new(&weights, &anchors, &deob);
        let results = vec![
            result("Widget", "q", behavioral(20.0)),
            result("Player", "q", ScoreBreakdown::default()),
        ];
        let (mapping, conflicts) = resolver.resolve_conflicts_detailed(&results);
        assert_eq!(mapping[0].deobfuscated_class, "Player");
        assert_eq!(conflicts[0].reason, Some(ResolutionReason::InheritanceChain));
    }

    #[test]
    fn semantic_and_behavioral_reasons() {
        let weights = ConflictWeights::default();
        let anchors = BTreeMap::new();
        let resolver = ConflictResolver::new(&weights, &anchors, &[]);

        let e = resolver.evidence(&result("SocketBuffer", "q", behavioral(10.0)));
        assert_eq!(e.semantic_weight, 55.0);
        assert_eq!(e.reason(), ResolutionReason::SemanticAnalysis);
        assert!((e.total_weight - (10.0 * 1.5 + 55.0 * 1.2)).abs() < 1e-9);

        let e = resolver.evidence(&result("Widget", "q", behavioral(4.0)));
        assert_eq!(e.reason(), ResolutionReason::BehavioralPatterns);

        let sized = ScoreBreakdown {
            method_signature_similarity: 19.0,
            ..ScoreBreakdown::default()
        };
        let e = resolver.evidence(&result("Widget", "q", sized));
        assert_eq!(e.size_weight, 15.0);
        assert_eq!(e.reason(), ResolutionReason::SizeCorrelation);
    }

    #[test]
    fn method_count_band_uses_deobfuscated_methods() {
        let weights = ConflictWeights::default();
        let anchors = BTreeMap::new();
        let mut big = ClassStructure::new("Big", ClassSource::Deobfuscated);
        for i in 0..45 {
            big = big.with_method("void", &format!("m{i}"), &[]);
        }
        let deob = vec![big];
        let resolver = ConflictResolver::new(&weights, &anchors, &deob);
        let e = resolver.evidence(&result("Big", "q", ScoreBreakdown::default()));
        assert_eq!(e.semantic_weight, 10.0);
    }

    #[test]
    fn zero_evidence_keeps_everyone() {
        let weights = ConflictWeights::default();
        let anchors = BTreeMap::new();
        let resolver = ConflictResolver::new(&weights, &anchors, &[]);
        let results = vec![
            result("A", "q", ScoreBreakdown::default()),
            result("B", "q", ScoreBreakdown::default()),
        ];
        let (mapping, conflicts) = resolver.resolve_conflicts_detailed(&results);
        assert_eq!(mapping.len(), 2);
        assert!(!conflicts[0].is_resolved());
    }

    #[test]
    fn output_keeps_first_appearance_order_and_drops_blank_targets() {
        let weights = ConflictWeights::default();
        let anchors = BTreeMap::new();
        let resolver = ConflictResolver::new(&weights, &anchors, &[]);
        let results = vec![
            result("A", "x", ScoreBreakdown::default()),
            result("B", "y", behavioral(1.0)),
            result("C", "", ScoreBreakdown::default()),
            result("D", "y", behavioral(3.0)),
            result("E", "z", ScoreBreakdown::default()),
        ];
        let names: Vec<String> = resolver
            .safe_resolve_conflicts(&results)
            .into_iter()
            .map(|r| r.deobfuscated_class)
            .collect();
        assert_eq!(names, vec!["A", "D", "E"]);
    }
}
