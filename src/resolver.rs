//! Multi-pass resolution of deobfuscated classes onto obfuscated ones.
//!
//! Passes run strictly in order and each one starts from the classes no
//! earlier pass has claimed:
//!
//! 1. anchor table entries
//! 2. propagation down anchored inheritance chains, then high-confidence
//!    best matches
//! 3. cross-reference similarity, then cross-reference overlap analysis
//! 4. exhaustive signature scoring
//!
//! A pass may claim the same obfuscated class twice; [`ConflictResolver`]
//! settles that afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

use crate::conflict::ConflictResolver;
use crate::model::{ClassStructure, element_type, simple_name};
use crate::scorer::{ScoreBreakdown, Scorer};
use crate::weights::MatcherConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub deobfuscated_class: String,
    pub obfuscated_class: String,
    pub confidence_score: f64,
    pub score_breakdown: ScoreBreakdown,
    pub details: String,
}

pub struct Resolver<'a> {
    config: &'a MatcherConfig,
    anchors: &'a BTreeMap<String, String>,
    reverse_anchors: HashMap<String, String>,
    scorer: Scorer<'a>,
}

/// Per-run lookups derived from both inputs.
struct Indexes<'c> {
    deob_children: HashMap<&'c str, Vec<&'c ClassStructure>>,
    obf_children: HashMap<&'c str, Vec<&'c ClassStructure>>,
    deob_refs: HashMap<&'c str, Vec<String>>,
    obf_refs: HashMap<&'c str, Vec<String>>,
}

impl<'a> Resolver<'a> {
    pub fn new(config: &'a MatcherConfig, anchors: &'a BTreeMap<String, String>) -> Self {
        let reverse_anchors = anchors
            .iter()
            .map(|(deob, obf)| (obf.clone(), deob.clone()))
            .collect();
        Self {
            config,
            anchors,
            reverse_anchors,
            scorer: Scorer::new(&config.weights, anchors),
        }
    }

    pub fn scorer(&self) -> &Scorer<'a> {
        &self.scorer
    }

    /// Arbiter sharing this resolver's anchors and weights, with lookups
    /// over the deobfuscated side of the run.
    pub fn conflict_resolver<'r>(&'r self, deob: &'r [ClassStructure]) -> ConflictResolver<'r> {
        ConflictResolver::new(&self.config.conflict, self.anchors, deob)
    }

    pub fn resolve_all(&self, deob: &[ClassStructure], obf: &[ClassStructure]) -> Vec<MatchResult> {
        let indexes = self.build_indexes(deob, obf);
        let mut results = Vec::new();

        let found = self.anchor_pass(deob, obf);
        info!(matches = found.len(), "pass 1: anchor classes");
        results.extend(found);

        let found = self.inheritance_pass(&results, &indexes);
        info!(matches = found.len(), "pass 2: inheritance hierarchy");
        results.extend(found);

        let found = self.high_confidence_pass(deob, obf, &results);
        info!(matches = found.len(), "pass 2: high-confidence best matches");
        results.extend(found);

        let found = self.crossref_similarity_pass(deob, obf, &results);
        info!(matches = found.len(), "pass 3: cross-reference similarity");
        results.extend(found);

        let found = self.crossref_analysis_pass(deob, obf, &results, &indexes);
        info!(matches = found.len(), "pass 3: cross-reference analysis");
        results.extend(found);

        let found = self.signature_pass(deob, obf, &results);
        info!(matches = found.len(), "pass 4: signature scoring");
        results.extend(found);

        results
    }

    fn anchor_pass(&self, deob: &[ClassStructure], obf: &[ClassStructure]) -> Vec<MatchResult> {
        let deob_by_name = by_name(deob);
        let obf_by_name = by_name(obf);
        let mut found = Vec::new();
        for (deob_name, obf_name) in self.anchors {
            let (Some(d), Some(o)) = (deob_by_name.get(deob_name.as_str()), obf_by_name.get(obf_name.as_str()))
            else {
                continue;
            };
            found.push(self.matched(
                d,
                o,
                Some(self.config.thresholds.anchor_confidence),
                "Exact match - anchor class".to_string(),
            ));
        }
        found
    }

    /// Subclasses of an anchored pair are paired by complexity rank when
    /// both sides have the same number of pending subclasses. This assumes
    /// obfuscation keeps the relative size order of siblings.
    fn inheritance_pass(&self, results: &[MatchResult], indexes: &Indexes) -> Vec<MatchResult> {
        let (claimed_deob, claimed_obf) = claimed_names(results);
        let mut found = Vec::new();
        for (deob_super, obf_super) in self.anchors {
            let mut deob_subs = pending_children(&indexes.deob_children, deob_super, &claimed_deob);
            let mut obf_subs = pending_children(&indexes.obf_children, obf_super, &claimed_obf);
            if deob_subs.is_empty() || deob_subs.len() != obf_subs.len() {
                continue;
            }
            sort_by_complexity(&mut deob_subs);
            sort_by_complexity(&mut obf_subs);
            debug!(%deob_super, %obf_super, pairs = deob_subs.len(), "propagating inheritance");
            for (d, o) in deob_subs.into_iter().zip(obf_subs) {
                found.push(self.matched(
                    d,
                    o,
                    Some(self.config.thresholds.inheritance_confidence),
                    "Inherited from anchor class hierarchy".to_string(),
                ));
            }
        }
        found
    }

    fn high_confidence_pass(
        &self,
        deob: &[ClassStructure],
        obf: &[ClassStructure],
        results: &[MatchResult],
    ) -> Vec<MatchResult> {
        let (pending_deob, pending_obf) = pending(deob, obf, results);
        let threshold = self.config.thresholds.high_confidence;
        pending_deob
            .iter()
            .filter_map(|d| {
                let (o, breakdown) = self.best_match(d, &pending_obf)?;
                let score = breakdown.total();
                (score >= threshold).then(|| MatchResult {
                    deobfuscated_class: d.name.clone(),
                    obfuscated_class: o.name.clone(),
                    confidence_score: score,
                    score_breakdown: breakdown,
                    details: format!("Matched by inheritance - score {score:.2}"),
                })
            })
            .collect()
    }

    fn crossref_similarity_pass(
        &self,
        deob: &[ClassStructure],
        obf: &[ClassStructure],
        results: &[MatchResult],
    ) -> Vec<MatchResult> {
        let (pending_deob, pending_obf) = pending(deob, obf, results);
        let t = &self.config.thresholds;
        let mut found = Vec::new();

        for d in pending_deob.iter().filter(|c| has_references(c)) {
            let mut best: Option<(&ClassStructure, ScoreBreakdown)> = None;
            let mut best_score = 0.0;
            for o in pending_obf.iter().filter(|c| has_references(c)) {
                if !self.similar_complexity(d, o) {
                    continue;
                }
                let breakdown = self.scorer.score(d, o);
                let combined = breakdown.crossref_combined();
                if combined >= t.crossref_candidate_floor && combined > best_score {
                    best_score = combined;
                    best = Some((*o, breakdown));
                }
            }
            if let Some((o, breakdown)) = best {
                if best_score >= t.crossref_acceptance {
                    found.push(MatchResult {
                        deobfuscated_class: d.name.clone(),
                        obfuscated_class: o.name.clone(),
                        confidence_score: best_score,
                        score_breakdown: breakdown,
                        details: format!("Matched by cross-reference similarity - score {best_score:.2}"),
                    });
                }
            }
        }
        found
    }

    fn crossref_analysis_pass(
        &self,
        deob: &[ClassStructure],
        obf: &[ClassStructure],
        results: &[MatchResult],
        indexes: &Indexes,
    ) -> Vec<MatchResult> {
        let (pending_deob, pending_obf) = pending(deob, obf, results);
        let mut found = Vec::new();

        for d in &pending_deob {
            let has_targets = d
                .cross_references
                .as_ref()
                .is_some_and(|g| !g.unique_targets.is_empty());
            if !has_targets {
                continue;
            }
            let Some(deob_refs) = indexes.deob_refs.get(d.name.as_str()) else {
                continue;
            };
            let candidate = pending_obf.iter().find(|o| {
                indexes
                    .obf_refs
                    .get(o.name.as_str())
                    .is_some_and(|obf_refs| self.references_overlap(deob_refs, obf_refs))
                    && self.similar_complexity(d, o)
            });
            if let Some(o) = candidate {
                found.push(self.matched(
                    d,
                    o,
                    Some(self.config.thresholds.crossref_analysis_confidence),
                    "Matched by cross-reference analysis".to_string(),
                ));
            }
        }
        found
    }

    fn signature_pass(
        &self,
        deob: &[ClassStructure],
        obf: &[ClassStructure],
        results: &[MatchResult],
    ) -> Vec<MatchResult> {
        let (pending_deob, pending_obf) = pending(deob, obf, results);
        let threshold = self.config.thresholds.low_confidence;
        pending_deob
            .iter()
            .filter_map(|d| {
                let (o, breakdown) = self.best_match(d, &pending_obf)?;
                let score = breakdown.total();
                (score >= threshold).then(|| MatchResult {
                    deobfuscated_class: d.name.clone(),
                    obfuscated_class: o.name.clone(),
                    confidence_score: score,
                    score_breakdown: breakdown,
                    details: format!("Matched by signature - score {score:.2}"),
                })
            })
            .collect()
    }

    /// Highest-scoring candidate with a positive total. Ties keep the
    /// earlier candidate.
    fn best_match<'c>(
        &self,
        deob: &ClassStructure,
        candidates: &[&'c ClassStructure],
    ) -> Option<(&'c ClassStructure, ScoreBreakdown)> {
        let mut best = None;
        let mut best_score = 0.0;
        for obf in candidates {
            let breakdown = self.scorer.score(deob, obf);
            let score = breakdown.total();
            if score > best_score {
                best_score = score;
                best = Some((*obf, breakdown));
            }
        }
        best
    }

    fn matched(
        &self,
        deob: &ClassStructure,
        obf: &ClassStructure,
        confidence: Option<f64>,
        details: String,
    ) -> MatchResult {
        let breakdown = self.scorer.score(deob, obf);
        MatchResult {
            deobfuscated_class: deob.name.clone(),
            obfuscated_class: obf.name.clone(),
            confidence_score: confidence.unwrap_or_else(|| breakdown.total()),
            score_breakdown: breakdown,
            details,
        }
    }

    /// `deob / obf` complexity inside the configured window. Never true
    /// for an empty obfuscated class.
    pub fn similar_complexity(&self, deob: &ClassStructure, obf: &ClassStructure) -> bool {
        let obf_complexity = obf.complexity();
        if obf_complexity == 0 {
            return false;
        }
        let ratio = deob.complexity() as f64 / obf_complexity as f64;
        let t = &self.config.thresholds;
        ratio >= t.complexity_ratio_min && ratio <= t.complexity_ratio_max
    }

    /// At least half of the deobfuscated references reappear among the
    /// obfuscated ones once those are translated back through the anchors.
    fn references_overlap(&self, deob_refs: &[String], obf_refs: &[String]) -> bool {
        if deob_refs.is_empty() || obf_refs.is_empty() {
            return false;
        }
        let translated: HashSet<&str> = obf_refs
            .iter()
            .map(|r| self.reverse_anchors.get(r).map(String::as_str).unwrap_or(r))
            .collect();
        let overlap = deob_refs
            .iter()
            .filter(|r| translated.contains(r.as_str()))
            .count();
        overlap > 0 && 2 * overlap >= deob_refs.len()
    }

    fn build_indexes<'c>(&self, deob: &'c [ClassStructure], obf: &'c [ClassStructure]) -> Indexes<'c> {
        let children = |classes: &'c [ClassStructure]| {
            let mut map: HashMap<&'c str, Vec<&'c ClassStructure>> = HashMap::new();
            for class in classes.iter().filter(|c| c.has_superclass()) {
                map.entry(class.superclass.as_str()).or_default().push(class);
            }
            map
        };
        let refs = |classes: &'c [ClassStructure]| {
            classes
                .iter()
                .map(|c| (c.name.as_str(), self.references_of(c)))
                .collect::<HashMap<_, _>>()
        };
        Indexes {
            deob_children: children(deob),
            obf_children: children(obf),
            deob_refs: refs(deob),
            obf_refs: refs(obf),
        }
    }

    /// Graph targets when the class has any, otherwise field types that
    /// name an anchored class on either side.
    fn references_of(&self, class: &ClassStructure) -> Vec<String> {
        if let Some(graph) = class.cross_references.as_ref().filter(|g| !g.is_empty()) {
            return graph.targets().map(str::to_string).collect();
        }
        let mut refs: Vec<String> = Vec::new();
        for field in &class.fields {
            let ty = simple_name(element_type(&field.type_name));
            let known = self.anchors.contains_key(ty) || self.reverse_anchors.contains_key(ty);
            if known && !refs.iter().any(|r| r == ty) {
                refs.push(ty.to_string());
            }
        }
        refs
    }
}

fn by_name(classes: &[ClassStructure]) -> HashMap<&str, &ClassStructure> {
    let mut map = HashMap::with_capacity(classes.len());
    for class in classes {
        map.entry(class.name.as_str()).or_insert(class);
    }
    map
}

/// Names already matched, per side.
fn claimed_names(results: &[MatchResult]) -> (HashSet<&str>, HashSet<&str>) {
    let deob = results.iter().map(|r| r.deobfuscated_class.as_str()).collect();
    let obf = results.iter().map(|r| r.obfuscated_class.as_str()).collect();
    (deob, obf)
}

/// Classes on each side not named by any result so far, in input order.
fn pending<'c>(
    deob: &'c [ClassStructure],
    obf: &'c [ClassStructure],
    results: &[MatchResult],
) -> (Vec<&'c ClassStructure>, Vec<&'c ClassStructure>) {
    let (claimed_deob, claimed_obf) = claimed_names(results);
    let keep = |classes: &'c [ClassStructure], claimed: &HashSet<&str>| {
        classes
            .iter()
            .filter(|c| !claimed.contains(c.name.as_str()))
            .collect::<Vec<_>>()
    };
    (keep(deob, &claimed_deob), keep(obf, &claimed_obf))
}

fn pending_children<'c>(
    children: &HashMap<&str, Vec<&'c ClassStructure>>,
    parent: &str,
    claimed: &HashSet<&str>,
) -> Vec<&'c ClassStructure> {
    children
        .get(parent)
        .map(|subs| {
            subs.iter()
                .filter(|c| !claimed.contains(c.name.as_str()))
                .copied()
                .collect()
        })
        .unwrap_or_default()
}

/// Stable, most complex first.
fn sort_by_complexity(classes: &mut [&ClassStructure]) {
    classes.sort_by(|a, b| b.complexity().cmp(&a.complexity()));
}

fn has_references(class: &ClassStructure) -> bool {
    class.cross_references.as_ref().is_some_and(|g| !g.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crossref::{CrossReferenceGraph, Reference, ReferenceKind};
    use crate::model::ClassSource;

    fn deob(name: &str) -> ClassStructure {
        ClassStructure::new(name, ClassSource::Deobfuscated)
    }

    fn obf(name: &str) -> ClassStructure {
        ClassStructure::new(name, ClassSource::Obfuscated)
    }

    fn with_methods(mut class: ClassStructure, n: usize, single_char: bool) -> ClassStructure {
        for i in 0..n {
            let name = if single_char {
                ((b'a' + i as u8) as char).to_string()
            } else {
                format!("method{i}")
            };
            let params = vec!["int"; i];
            class = class.with_method("int", &name, &params);
        }
        class
    }

    fn refs(targets: &[&str]) -> CrossReferenceGraph {
        CrossReferenceGraph::from_references(
            targets
                .iter()
                .map(|t| ("run", Reference::new(ReferenceKind::MethodCall, t, "m", 1))),
        )
    }

    fn anchors(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn anchors_match_at_full_confidence() {
        let config = MatcherConfig::default();
        let anchors = anchors(&[("Model", "ab"), ("Missing", "zz")]);
        let resolver = Resolver::new(&config, &anchors);
        let results = resolver.resolve_all(&[deob("Model")], &[obf("ab")]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].obfuscated_class, "ab");
        assert_eq!(results[0].confidence_score, 100.0);
        assert_eq!(results[0].details, "Exact match - anchor class");
    }

    #[test]
    fn subclasses_pair_by_complexity_rank() {
        let config = MatcherConfig::default();
        let anchors = anchors(&[("Entity", "ab")]);
        let resolver = Resolver::new(&config, &anchors);

        let deob_side = vec![
            deob("Entity"),
            with_methods(deob("Npc").with_superclass("Entity"), 2, false),
            with_methods(deob("Player").with_superclass("Entity"), 6, false),
        ];
        let obf_side = vec![
            obf("ab"),
            with_methods(obf("c").with_superclass("ab"), 6, true),
            with_methods(obf("d").with_superclass("ab"), 2, true),
        ];
        let results = resolver.resolve_all(&deob_side, &obf_side);
        let pairs: Vec<(&str, &str, f64)> = results
            .iter()
            .map(|r| (r.deobfuscated_class.as_str(), r.obfuscated_class.as_str(), r.confidence_score))
            .collect();
        assert_eq!(
            pairs,
            vec![("Entity", "ab", 100.0), ("Player", "c", 85.0), ("Npc", "d", 85.0)]
        );
    }

    #[test]
    fn uneven_sibling_counts_do_not_propagate() {
        let config = MatcherConfig::default();
        let anchors = anchors(&[("Entity", "ab")]);
        let resolver = Resolver::new(&config, &anchors);
        let deob_side = vec![deob("Entity"), deob("Npc").with_superclass("Entity")];
        let obf_side = vec![
            obf("ab"),
            obf("c").with_superclass("ab"),
            obf("d").with_superclass("ab"),
        ];
        let results = resolver.resolve_all(&deob_side, &obf_side);
        assert!(results.iter().all(|r| r.details != "Inherited from anchor class hierarchy"));
    }

    #[test]
    fn complexity_gate_window() {
        let config = MatcherConfig::default();
        let anchors = BTreeMap::new();
        let resolver = Resolver::new(&config, &anchors);
        let ten = with_methods(deob("A"), 10, false);
        assert!(resolver.similar_complexity(&ten, &with_methods(obf("a"), 8, true)));
        assert!(!resolver.similar_complexity(&ten, &with_methods(obf("b"), 7, true)));
        assert!(!resolver.similar_complexity(&ten, &obf("c")));
    }

    #[test]
    fn crossref_analysis_uses_reverse_anchors() {
        let mut config = MatcherConfig::default();
        // keep the exhaustive passes out of the way
        config.thresholds.high_confidence = 1000.0;
        config.thresholds.low_confidence = 1000.0;
        config.thresholds.crossref_acceptance = 1000.0;
        let anchors = anchors(&[("Model", "ab"), ("Texture", "cd")]);
        let resolver = Resolver::new(&config, &anchors);

        let deob_side = vec![
            deob("Model"),
            deob("Texture"),
            with_methods(deob("Scene"), 4, false).with_cross_references(refs(&["Model", "Texture"])),
        ];
        let obf_side = vec![
            obf("ab"),
            obf("cd"),
            with_methods(obf("ef"), 4, true).with_cross_references(refs(&["zz"])),
            with_methods(obf("gh"), 4, true).with_cross_references(refs(&["ab"])),
        ];
        let results = resolver.resolve_all(&deob_side, &obf_side);
        let scene = results
            .iter()
            .find(|r| r.deobfuscated_class == "Scene")
            .unwrap();
        assert_eq!(scene.obfuscated_class, "gh");
        assert_eq!(scene.confidence_score, 75.0);
        assert_eq!(scene.details, "Matched by cross-reference analysis");
    }

    #[test]
    fn signature_pass_respects_threshold() {
        let config = MatcherConfig::default();
        let anchors = BTreeMap::new();
        let resolver = Resolver::new(&config, &anchors);
        let d = with_methods(deob("Buffer"), 4, false).with_field("byte[]", "data");
        let o = with_methods(obf("q"), 4, true).with_field("byte[]", "a");
        let results = resolver.resolve_all(&[d], &[o]);
        assert_eq!(results.len(), 1);
        assert!(results[0].confidence_score >= 65.0);
        assert!(results[0].details.starts_with("Matched by"));

        let strict = MatcherConfig {
            thresholds: crate::weights::ResolverThresholds {
                high_confidence: 1000.0,
                low_confidence: 1000.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let resolver = Resolver::new(&strict, &anchors);
        let d = with_methods(deob("Buffer"), 4, false);
        let o = with_methods(obf("q"), 4, true);
        assert!(resolver.resolve_all(&[d], &[o]).is_empty());
    }
}
