//! CSV and JSON renderings of a mapping.

use anyhow::Result;
use serde::Serialize;

use crate::resolver::MatchResult;
use crate::weights::ResolverThresholds;

const CSV_HEADER: [&str; 8] = [
    "deobfuscated_name",
    "obfuscated_name",
    "confidence_score",
    "superclass_match",
    "interface_match",
    "field_count_match",
    "method_count_match",
    "notes",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_matches: usize,
    pub high_confidence_count: usize,
    pub medium_confidence_count: usize,
    pub low_confidence_count: usize,
}

impl Summary {
    /// High is `>= high_confidence`, medium is `>= low_confidence`.
    pub fn from_results(results: &[MatchResult], thresholds: &ResolverThresholds) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.total_matches += 1;
            if result.confidence_score >= thresholds.high_confidence {
                summary.high_confidence_count += 1;
            } else if result.confidence_score >= thresholds.low_confidence {
                summary.medium_confidence_count += 1;
            } else {
                summary.low_confidence_count += 1;
            }
        }
        summary
    }
}

#[derive(Debug, Serialize)]
struct DetailedReport<'a> {
    summary: Summary,
    matches: &'a [MatchResult],
}

/// Drops results scoring below `threshold`, keeping order.
pub fn filter_by_threshold(results: Vec<MatchResult>, threshold: f64) -> Vec<MatchResult> {
    results
        .into_iter()
        .filter(|r| r.confidence_score >= threshold)
        .collect()
}

/// High-confidence table, then uncertain table. Empty tables are omitted.
pub fn render_csv(results: &[MatchResult], thresholds: &ResolverThresholds) -> String {
    let (high, uncertain): (Vec<&MatchResult>, Vec<&MatchResult>) = results
        .iter()
        .partition(|r| r.confidence_score >= thresholds.high_confidence);

    let mut out = String::new();
    for table in [high, uncertain] {
        if table.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        push_row(&mut out, CSV_HEADER.iter().map(|h| h.to_string()));
        for r in table {
            let b = &r.score_breakdown;
            push_row(
                &mut out,
                [
                    r.deobfuscated_class.clone(),
                    r.obfuscated_class.clone(),
                    format!("{:.2}", r.confidence_score),
                    (b.superclass_match > 0.0).to_string(),
                    (b.interface_match > 0.0).to_string(),
                    (b.field_count_match > 0.0).to_string(),
                    (b.method_count_match > 0.0).to_string(),
                    r.details.clone(),
                ]
                .into_iter(),
            );
        }
    }
    out
}

fn push_row(out: &mut String, fields: impl Iterator<Item = String>) {
    let row: Vec<String> = fields.map(|f| csv_field(&f)).collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn render_json(results: &[MatchResult], thresholds: &ResolverThresholds) -> Result<String> {
    let report = DetailedReport {
        summary: Summary::from_results(results, thresholds),
        matches: results,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::ScoreBreakdown;

    fn result(deob: &str, obf: &str, score: f64, details: &str) -> MatchResult {
        MatchResult {
            deobfuscated_class: deob.to_string(),
            obfuscated_class: obf.to_string(),
            confidence_score: score,
            score_breakdown: ScoreBreakdown {
                superclass_match: 25.0,
                ..ScoreBreakdown::default()
            },
            details: details.to_string(),
        }
    }

    #[test]
    fn csv_splits_tables_and_quotes_fields() {
        let results = vec![
            result("Node", "ab", 100.0, "Exact match - anchor class"),
            result("Model", "cd", 70.5, "Matched by signature, \"weak\""),
        ];
        let csv = render_csv(&results, &ResolverThresholds::default());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], CSV_HEADER.join(","));
        assert_eq!(lines[1], "Node,ab,100.00,true,false,false,false,Exact match - anchor class");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], CSV_HEADER.join(","));
        assert_eq!(
            lines[4],
            "Model,cd,70.50,true,false,false,false,\"Matched by signature, \"\"weak\"\"\""
        );
    }

    #[test]
    fn csv_omits_empty_tables() {
        let csv = render_csv(&[result("Model", "cd", 70.0, "x")], &ResolverThresholds::default());
        assert_eq!(csv.lines().count(), 2);
        assert_eq!(render_csv(&[], &ResolverThresholds::default()), "");
    }

    #[test]
    fn json_summary_counts_bands() -> Result<()> {
        let results = vec![
            result("A", "a", 100.0, ""),
            result("B", "b", 85.0, ""),
            result("C", "c", 70.0, ""),
            result("D", "d", 40.0, ""),
        ];
        let json: serde_json::Value =
            serde_json::from_str(&render_json(&results, &ResolverThresholds::default())?)?;
        assert_eq!(json["summary"]["total_matches"], 4);
        assert_eq!(json["summary"]["high_confidence_count"], 2);
        assert_eq!(json["summary"]["medium_confidence_count"], 1);
        assert_eq!(json["summary"]["low_confidence_count"], 1);
        assert_eq!(json["matches"][2]["deobfuscated_class"], "C");
        assert_eq!(json["matches"][0]["score_breakdown"]["size_penalty"], 0.0);
        Ok(())
    }

    #[test]
    fn threshold_filter_is_inclusive() {
        let kept = filter_by_threshold(
            vec![result("A", "a", 65.0, ""), result("B", "b", 64.99, "")],
            65.0,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].deobfuscated_class, "A");
    }
}
