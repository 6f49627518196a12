// src/pipeline/keywords.rs

//! Text helpers for the analysis stages.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::pipeline::collaborators::TrendSummary;

/// A bracketed, comma-separated list of quoted strings, e.g.
/// `["solar", "inverter"]`.
static KEYWORD_ARRAY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"\[(["'].*?["'](?:\s*,\s*["'].*?["'])*)\]"#).ok()
});

/// Pull search keywords out of a plan.
///
/// The first JSON-style string array in the text wins. If there is none, or
/// it does not parse, or it is empty, fall back to the query itself followed
/// by each of its words longer than two characters.
pub fn extract_keywords(plan: &str, query: &str) -> Vec<String> {
    let from_plan = KEYWORD_ARRAY
        .as_ref()
        .and_then(|re| re.captures(plan))
        .and_then(|caps| caps.get(1))
        .and_then(|list| serde_json::from_str::<Vec<String>>(&format!("[{}]", list.as_str())).ok())
        .filter(|keywords| !keywords.is_empty());

    if let Some(keywords) = from_plan {
        return keywords;
    }

    std::iter::once(query.to_string())
        .chain(
            query
                .split_whitespace()
                .filter(|w| w.chars().count() > 2)
                .map(str::to_string),
        )
        .collect()
}

/// Drop repeated patents, keyed on `patent_id`. Records without an id are
/// always kept. First occurrence wins.
pub fn dedupe_patents(patents: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    patents
        .into_iter()
        .filter(|p| match p.get("patent_id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => seen.insert(id.to_string()),
            _ => true,
        })
        .collect()
}

/// Markdown summary of trend growth, one table row per keyword.
pub fn render_trend_table(summaries: &[TrendSummary]) -> String {
    let mut lines = vec!["## Trend summary".to_string(), String::new()];

    if !summaries.is_empty() {
        lines.push("| Keyword | CAGR | Start | End | Months |".to_string());
        lines.push("|---------|------|-------|-----|--------|".to_string());

        for s in summaries {
            let cagr = s
                .cagr
                .map(|c| format!("{:.2}%", c * 100.0))
                .unwrap_or_else(|| "N/A".to_string());
            lines.push(format!(
                "| {} | {} | {} | {} | {} |",
                s.keyword,
                cagr,
                or_na(s.beginning_value),
                or_na(s.ending_value),
                or_na(s.timeframe_months),
            ));
        }
    }

    lines.join("\n")
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}
