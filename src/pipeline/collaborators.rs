// src/pipeline/collaborators.rs

//! Interfaces to the external systems the analysis stages call.
//!
//! The engine knows nothing about these; only the stage adapters in
//! [`super::stages`] hold them.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag::BoxFuture;

pub type CallResult<'a, T> = BoxFuture<'a, anyhow::Result<T>>;

/// Inputs for the planning prompt.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub query: String,
    pub extra_context: String,
    pub memory_context: String,
}

/// Inputs for drafting a report.
#[derive(Debug, Clone, Default)]
pub struct DraftRequest {
    pub query: String,
    pub patent_analysis: String,
    pub trend_analysis: String,
    /// Caller context, with the previous review's feedback appended on
    /// re-drafts.
    pub extra_context: String,
    pub iteration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewVerdict {
    pub passed: bool,
    pub feedback: String,
}

pub trait LanguageModel: Send + Sync {
    fn plan(&self, request: PlanRequest) -> CallResult<'_, String>;

    /// Technical landscape analysis of the collected patents.
    fn analyze_patents(&self, query: String, patents: Vec<Value>) -> CallResult<'_, String>;

    fn draft_report(&self, request: DraftRequest) -> CallResult<'_, String>;

    fn review_report(&self, draft: String) -> CallResult<'_, ReviewVerdict>;

    /// Compress an analysis session for long-term memory.
    fn summarize_for_memory(&self, context: String) -> CallResult<'_, String>;
}

pub trait PatentSearch: Send + Sync {
    /// Patent records matching one keyword. Records are JSON objects; only
    /// `patent_id` is interpreted.
    fn search(&self, keyword: String) -> CallResult<'_, Vec<Value>>;
}

/// Growth summary for one keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub keyword: String,
    /// Compound annual growth rate as a fraction (0.12 = 12%).
    pub cagr: Option<f64>,
    pub beginning_value: Option<f64>,
    pub ending_value: Option<f64>,
    pub timeframe_months: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendData {
    /// Raw data points, one JSON object each.
    pub points: Vec<Value>,
    pub summaries: Vec<TrendSummary>,
}

pub trait TrendSearch: Send + Sync {
    fn fetch(&self, keywords: Vec<String>) -> CallResult<'_, TrendData>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryEntry {
    pub user_id: String,
    pub content: String,
    pub query: String,
    pub patent_count: usize,
    pub trend_count: usize,
    pub timestamp: DateTime<Utc>,
}

pub trait MemoryStore: Send + Sync {
    /// Context from earlier sessions of this user, as prompt-ready text.
    fn context_for(&self, query: String, user_id: String) -> CallResult<'_, String>;

    fn remember(&self, entry: MemoryEntry) -> CallResult<'_, ()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReport {
    pub report_id: Option<String>,
    pub query: String,
    pub final_report: String,
    /// The report went out because the retry ceiling was hit, not because
    /// the reviewer accepted it.
    pub forced: bool,
}

pub trait ReportSink: Send + Sync {
    fn save(&self, report: StoredReport) -> CallResult<'_, ()>;
}

/// Everything the analysis stages need from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub model: Arc<dyn LanguageModel>,
    pub patents: Arc<dyn PatentSearch>,
    pub trends: Arc<dyn TrendSearch>,
    pub memory: Arc<dyn MemoryStore>,
    pub reports: Arc<dyn ReportSink>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
