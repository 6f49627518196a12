// src/pipeline/stages.rs

//! Stage adapters for the analysis pipeline.
//!
//! Each adapter reads what it needs from the snapshot, calls its
//! collaborators and returns a partial update. None of them decides control
//! flow; the retry loop belongs to the engine.

use serde_json::Value;
use tracing::{debug, info};

use crate::dag::{BoxFuture, Stage, StageInput, StageResult};
use crate::errors::StageError;
use crate::pipeline::collaborators::{Collaborators, DraftRequest, MemoryEntry, PlanRequest, StoredReport};
use crate::pipeline::fields;
use crate::pipeline::keywords::{dedupe_patents, extract_keywords, render_trend_table};
use crate::state::{StateSnapshot, StateUpdate};

const DEFAULT_USER: &str = "default";

fn text_or<'a>(state: &'a StateSnapshot, field: &str, default: &'a str) -> &'a str {
    state.text(field).unwrap_or(default)
}

/// The search keywords, or the query alone if planning produced none.
fn keywords(state: &StateSnapshot) -> Vec<String> {
    let keywords: Vec<String> = state
        .list(fields::SEARCH_KEYWORDS)
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();

    if keywords.is_empty() {
        vec![text_or(state, fields::QUERY, "").to_string()]
    } else {
        keywords
    }
}

/// Memory lookup, planning prompt and keyword extraction.
pub struct PlanStage {
    collaborators: Collaborators,
}

impl PlanStage {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

impl Stage for PlanStage {
    fn run(&self, input: StageInput) -> BoxFuture<'_, StageResult> {
        Box::pin(async move {
            let state = &input.state;
            let query = text_or(state, fields::QUERY, "").to_string();
            let user_id = text_or(state, fields::USER_ID, DEFAULT_USER).to_string();

            let memory_context = self
                .collaborators
                .memory
                .context_for(query.clone(), user_id)
                .await
                .map_err(StageError::failed)?;

            let plan = self
                .collaborators
                .model
                .plan(PlanRequest {
                    query: query.clone(),
                    extra_context: text_or(state, fields::EXTRA_CONTEXT, "").to_string(),
                    memory_context: memory_context.clone(),
                })
                .await
                .map_err(StageError::failed)?;

            let search_keywords = extract_keywords(&plan, &query);
            info!(keywords = ?search_keywords, "plan created");

            Ok(StateUpdate::new()
                .set(fields::PLAN, plan)
                .append(fields::SEARCH_KEYWORDS, search_keywords.into_iter().map(Value::from))
                .set(fields::MEMORY_CONTEXT, memory_context))
        })
    }
}

/// Patent search over the leading keywords, de-duplicated, then analysed.
pub struct PatentStage {
    collaborators: Collaborators,
    max_keywords: usize,
}

impl PatentStage {
    pub fn new(collaborators: Collaborators, max_keywords: usize) -> Self {
        Self {
            collaborators,
            max_keywords,
        }
    }
}

impl Stage for PatentStage {
    fn run(&self, input: StageInput) -> BoxFuture<'_, StageResult> {
        Box::pin(async move {
            let state = &input.state;
            let query = text_or(state, fields::QUERY, "").to_string();

            let mut all = Vec::new();
            for keyword in keywords(state).into_iter().take(self.max_keywords) {
                if input.is_cancelled() {
                    return Err(StageError::Cancelled);
                }
                let found = self
                    .collaborators
                    .patents
                    .search(keyword.clone())
                    .await
                    .map_err(StageError::failed)?;
                debug!(%keyword, found = found.len(), "patent search");
                all.extend(found);
            }

            let unique = dedupe_patents(all);
            info!(patents = unique.len(), "unique patents found");

            let analysis = self
                .collaborators
                .model
                .analyze_patents(query, unique.clone())
                .await
                .map_err(StageError::failed)?;

            Ok(StateUpdate::new()
                .append(fields::PATENTS, unique)
                .set(fields::PATENT_ANALYSIS, analysis))
        })
    }
}

/// Trend points and growth summaries for every keyword.
pub struct TrendStage {
    collaborators: Collaborators,
}

impl TrendStage {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

impl Stage for TrendStage {
    fn run(&self, input: StageInput) -> BoxFuture<'_, StageResult> {
        Box::pin(async move {
            let data = self
                .collaborators
                .trends
                .fetch(keywords(&input.state))
                .await
                .map_err(StageError::failed)?;

            info!(
                points = data.points.len(),
                summaries = data.summaries.len(),
                "trend data fetched"
            );

            let table = render_trend_table(&data.summaries);
            let summaries = data
                .summaries
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()
                .map_err(StageError::failed)?;

            Ok(StateUpdate::new()
                .append(fields::TRENDS, data.points)
                .append(fields::TREND_SUMMARIES, summaries)
                .set(fields::TREND_ANALYSIS, table))
        })
    }
}

/// Draft the report; re-drafts carry the last review's feedback.
pub struct SynthesizeStage {
    collaborators: Collaborators,
}

impl SynthesizeStage {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

impl Stage for SynthesizeStage {
    fn run(&self, input: StageInput) -> BoxFuture<'_, StageResult> {
        Box::pin(async move {
            let state = &input.state;
            let extra_context = text_or(state, fields::EXTRA_CONTEXT, "");
            let feedback = text_or(state, fields::REVIEW_FEEDBACK, "");

            let extra_context = if input.iteration > 0 && !feedback.is_empty() {
                format!("{extra_context}\n\n## Feedback from previous review\n{feedback}\n")
            } else {
                extra_context.to_string()
            };

            let draft = self
                .collaborators
                .model
                .draft_report(DraftRequest {
                    query: text_or(state, fields::QUERY, "").to_string(),
                    patent_analysis: text_or(state, fields::PATENT_ANALYSIS, "No patent data").to_string(),
                    trend_analysis: text_or(state, fields::TREND_ANALYSIS, "No trend data").to_string(),
                    extra_context,
                    iteration: input.iteration,
                })
                .await
                .map_err(StageError::failed)?;

            info!(iteration = input.iteration, chars = draft.chars().count(), "draft generated");
            Ok(StateUpdate::new().set(fields::DRAFT_REPORT, draft))
        })
    }
}

/// Model review of the current draft.
pub struct ReviewStage {
    collaborators: Collaborators,
}

impl ReviewStage {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

impl Stage for ReviewStage {
    fn run(&self, input: StageInput) -> BoxFuture<'_, StageResult> {
        Box::pin(async move {
            let draft = text_or(&input.state, fields::DRAFT_REPORT, "").to_string();

            let verdict = self
                .collaborators
                .model
                .review_report(draft.clone())
                .await
                .map_err(StageError::failed)?;

            info!(iteration = input.iteration, passed = verdict.passed, "draft reviewed");

            let mut update = StateUpdate::new()
                .set(fields::ACCEPTED, verdict.passed)
                .set(fields::REVIEW_FEEDBACK, verdict.feedback);
            if verdict.passed {
                update.insert(fields::FINAL_REPORT, draft);
            }
            Ok(update)
        })
    }
}

/// Settle the final report, store a memory summary and persist the report.
pub struct FinalizeStage {
    collaborators: Collaborators,
}

impl FinalizeStage {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

impl Stage for FinalizeStage {
    fn run(&self, input: StageInput) -> BoxFuture<'_, StageResult> {
        Box::pin(async move {
            let state = &input.state;
            let forced = state.forced_pass();
            let final_report = state
                .text(fields::FINAL_REPORT)
                .or_else(|| state.text(fields::DRAFT_REPORT))
                .unwrap_or("")
                .to_string();

            let query = text_or(state, fields::QUERY, "").to_string();
            let user_id = text_or(state, fields::USER_ID, DEFAULT_USER).to_string();
            let patent_count = state.list(fields::PATENTS).len();
            let trend_count = state.list(fields::TREND_SUMMARIES).len();

            let excerpt: String = final_report.chars().take(500).collect();
            let context = format!(
                "Query: {query}\nPatents found: {patent_count}\nTrend keywords analysed: {trend_count}\nKey findings: {}",
                if excerpt.is_empty() { "no report" } else { excerpt.as_str() }
            );

            let summary = self
                .collaborators
                .model
                .summarize_for_memory(context)
                .await
                .map_err(StageError::failed)?;

            self.collaborators
                .memory
                .remember(MemoryEntry {
                    user_id: user_id.clone(),
                    content: summary,
                    query: query.clone(),
                    patent_count,
                    trend_count,
                    timestamp: chrono::Utc::now(),
                })
                .await
                .map_err(StageError::failed)?;

            self.collaborators
                .reports
                .save(StoredReport {
                    report_id: state.text(fields::REPORT_ID).map(str::to_string),
                    query,
                    final_report: final_report.clone(),
                    forced,
                })
                .await
                .map_err(StageError::failed)?;

            info!(%user_id, forced, "report finalized");
            Ok(StateUpdate::new().set(fields::FINAL_REPORT, final_report))
        })
    }
}
