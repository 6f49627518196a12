// src/pipeline/mod.rs

//! The patent and trend analysis pipeline, expressed as a stage graph.
//!
//! ```text
//! plan -> { fetch_patents, fetch_trends } -> synthesize -> review -> finalize
//!                                                ^           |
//!                                                +-- retry --+
//! ```
//!
//! Stages reach the outside world only through [`Collaborators`].

use serde::Serialize;

use crate::config::PipelineSection;
use crate::dag::{ConditionalEdge, StageDef, StageGraph};
use crate::engine::{RunReport, RunRequest};
use crate::errors::GraphError;
use crate::state::FieldSpec;
use crate::types::RunStatus;

pub mod collaborators;
pub mod keywords;
pub mod simulated;
pub mod stages;

pub use collaborators::Collaborators;

/// State field names.
pub mod fields {
    pub const QUERY: &str = "query";
    pub const EXTRA_CONTEXT: &str = "extra_context";
    pub const USER_ID: &str = "user_id";
    pub const REPORT_ID: &str = "report_id";
    pub const PLAN: &str = "plan";
    pub const SEARCH_KEYWORDS: &str = "search_keywords";
    pub const MEMORY_CONTEXT: &str = "memory_context";
    pub const PATENTS: &str = "patents";
    pub const PATENT_ANALYSIS: &str = "patent_analysis";
    pub const TRENDS: &str = "trends";
    pub const TREND_SUMMARIES: &str = "trend_summaries";
    pub const TREND_ANALYSIS: &str = "trend_analysis";
    pub const DRAFT_REPORT: &str = "draft_report";
    pub const FINAL_REPORT: &str = "final_report";
    pub const ACCEPTED: &str = "accepted";
    pub const REVIEW_FEEDBACK: &str = "review_feedback";
}

/// Stage names.
pub mod stage_names {
    pub const PLAN: &str = "plan";
    pub const FETCH_PATENTS: &str = "fetch_patents";
    pub const FETCH_TRENDS: &str = "fetch_trends";
    pub const SYNTHESIZE: &str = "synthesize";
    pub const REVIEW: &str = "review";
    pub const FINALIZE: &str = "finalize";
}

/// Field declarations of the analysis state.
pub fn analysis_schema() -> Vec<FieldSpec> {
    use fields::*;

    let mut specs: Vec<FieldSpec> = [
        QUERY,
        EXTRA_CONTEXT,
        USER_ID,
        REPORT_ID,
        PLAN,
        MEMORY_CONTEXT,
        PATENT_ANALYSIS,
        TREND_ANALYSIS,
        DRAFT_REPORT,
        FINAL_REPORT,
        REVIEW_FEEDBACK,
    ]
    .into_iter()
    .map(FieldSpec::text)
    .collect();

    specs.extend(
        [SEARCH_KEYWORDS, PATENTS, TRENDS, TREND_SUMMARIES]
            .into_iter()
            .map(FieldSpec::accumulating),
    );
    specs.push(FieldSpec::flag(ACCEPTED));
    specs
}

/// Build the analysis graph over the given collaborators.
pub fn analysis_graph(
    collaborators: &Collaborators,
    settings: &PipelineSection,
) -> Result<StageGraph, GraphError> {
    use stage_names::*;

    let mut builder = StageGraph::builder();
    for spec in analysis_schema() {
        builder = builder.field(spec);
    }

    builder
        .stage(StageDef::new(PLAN, stages::PlanStage::new(collaborators.clone())))
        .stage(
            StageDef::new(
                FETCH_PATENTS,
                stages::PatentStage::new(collaborators.clone(), settings.max_keywords),
            )
            .after([PLAN]),
        )
        .stage(
            StageDef::new(FETCH_TRENDS, stages::TrendStage::new(collaborators.clone()))
                .after([PLAN]),
        )
        .stage(
            StageDef::new(SYNTHESIZE, stages::SynthesizeStage::new(collaborators.clone()))
                .after([FETCH_PATENTS, FETCH_TRENDS]),
        )
        .stage(
            StageDef::new(REVIEW, stages::ReviewStage::new(collaborators.clone()))
                .after([SYNTHESIZE]),
        )
        .stage(
            StageDef::new(FINALIZE, stages::FinalizeStage::new(collaborators.clone()))
                .after([REVIEW]),
        )
        .conditional(ConditionalEdge::new(
            REVIEW,
            fields::ACCEPTED,
            FINALIZE,
            SYNTHESIZE,
        ))
        .build()
}

/// What a caller asks the pipeline to analyse.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub query: String,
    pub extra_context: Option<String>,
    pub user_id: Option<String>,
    pub report_id: Option<String>,
}

impl AnalysisRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Seed a run with the request's scalar fields. The report id doubles as
    /// the run id when given.
    pub fn into_run_request(self) -> RunRequest {
        let mut request = RunRequest::new().set(fields::QUERY, self.query);

        if let Some(context) = self.extra_context {
            request = request.set(fields::EXTRA_CONTEXT, context);
        }
        if let Some(user_id) = self.user_id {
            request = request.set(fields::USER_ID, user_id);
        }
        if let Some(report_id) = self.report_id {
            request = request
                .set(fields::REPORT_ID, report_id.clone())
                .run_id(report_id);
        }
        request
    }
}

/// The caller-facing view of a finished analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub report_id: String,
    pub query: String,
    pub status: RunStatus,
    pub final_report: Option<String>,
    pub patent_count: usize,
    pub trend_keywords: usize,
    pub iterations: u32,
    pub forced_pass: bool,
    pub plan: Option<String>,
    pub patent_analysis: Option<String>,
    pub trend_analysis: Option<String>,
    pub path: Vec<String>,
    pub elapsed_secs: f64,
    pub error: Option<String>,
}

impl From<&RunReport> for AnalysisSummary {
    fn from(report: &RunReport) -> Self {
        let state = &report.state;
        let text = |field: &str| state.text(field).map(str::to_string);

        Self {
            report_id: report.run_id.clone(),
            query: text(fields::QUERY).unwrap_or_default(),
            status: report.status,
            final_report: text(fields::FINAL_REPORT).or_else(|| text(fields::DRAFT_REPORT)),
            patent_count: report.list_len(fields::PATENTS),
            trend_keywords: report.list_len(fields::TREND_SUMMARIES),
            iterations: report.iterations,
            forced_pass: report.forced_pass,
            plan: text(fields::PLAN),
            patent_analysis: text(fields::PATENT_ANALYSIS),
            trend_analysis: text(fields::TREND_ANALYSIS),
            path: report.path.clone(),
            elapsed_secs: report.elapsed.as_secs_f64(),
            error: report.error.as_ref().map(ToString::to_string),
        }
    }
}
