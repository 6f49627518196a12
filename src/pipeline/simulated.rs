// src/pipeline/simulated.rs

//! Deterministic, offline collaborators.
//!
//! They stand in for the language model, search APIs and stores so the
//! pipeline can run end to end without network access. Output depends only
//! on inputs and call order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::pipeline::collaborators::{
    CallResult, Collaborators, DraftRequest, LanguageModel, MemoryEntry, MemoryStore,
    PatentSearch, PlanRequest, ReportSink, ReviewVerdict, StoredReport, TrendData, TrendSearch,
    TrendSummary,
};

/// Pause before answering, so concurrent stages actually overlap.
async fn pause(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

fn slug(keyword: &str) -> String {
    keyword
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '-' })
        .collect()
}

/// A scripted model. The reviewer rejects the first `reject_drafts` drafts
/// it sees and accepts every one after that.
#[derive(Debug, Default)]
pub struct SimulatedModel {
    reject_drafts: u32,
    reviews: AtomicU32,
    latency: Duration,
}

impl SimulatedModel {
    pub fn new(reject_drafts: u32) -> Self {
        Self {
            reject_drafts,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of reviews performed so far.
    pub fn reviews(&self) -> u32 {
        self.reviews.load(Ordering::SeqCst)
    }
}

impl LanguageModel for SimulatedModel {
    fn plan(&self, request: PlanRequest) -> CallResult<'_, String> {
        Box::pin(async move {
            pause(self.latency).await;
            let query = request.query.trim();
            let keywords = json!([query, format!("{query} market"), format!("{query} technology")]);
            Ok(format!(
                "1. Objective: compliance and opportunity analysis for \"{query}\".\n\
                 2. Search keywords: {keywords}\n\
                 3. Data: patent filings and search-interest trends per keyword.\n\
                 4. Output: executive summary, patent landscape, growth, actions.\n\
                 Memory: {}",
                request.memory_context
            ))
        })
    }

    fn analyze_patents(&self, query: String, patents: Vec<Value>) -> CallResult<'_, String> {
        Box::pin(async move {
            pause(self.latency).await;
            let titles: Vec<&str> = patents
                .iter()
                .filter_map(|p| p.get("title").and_then(Value::as_str))
                .collect();
            Ok(format!(
                "{} patents relevant to \"{query}\": {}",
                patents.len(),
                titles.join("; ")
            ))
        })
    }

    fn draft_report(&self, request: DraftRequest) -> CallResult<'_, String> {
        Box::pin(async move {
            pause(self.latency).await;
            Ok(format!(
                "# Window report: {}\n\n## Executive summary\nDraft {} for {}.\n\n\
                 ## Patent landscape\n{}\n\n## Growth\n{}\n\n## Context\n{}\n",
                request.query,
                request.iteration + 1,
                request.query,
                request.patent_analysis,
                request.trend_analysis,
                if request.extra_context.is_empty() { "none" } else { request.extra_context.as_str() },
            ))
        })
    }

    fn review_report(&self, draft: String) -> CallResult<'_, ReviewVerdict> {
        Box::pin(async move {
            pause(self.latency).await;
            let seen = self.reviews.fetch_add(1, Ordering::SeqCst);
            let passed = seen >= self.reject_drafts && !draft.is_empty();
            let feedback = if passed {
                "Meets the bar.".to_string()
            } else {
                format!("Draft {} needs stronger evidence for the growth claims.", seen + 1)
            };
            Ok(ReviewVerdict { passed, feedback })
        })
    }

    fn summarize_for_memory(&self, context: String) -> CallResult<'_, String> {
        Box::pin(async move {
            pause(self.latency).await;
            Ok(context.chars().take(200).collect())
        })
    }
}

/// Two hits per keyword, one of which is shared across all keywords.
#[derive(Debug, Default)]
pub struct SimulatedPatents {
    latency: Duration,
}

impl SimulatedPatents {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl PatentSearch for SimulatedPatents {
    fn search(&self, keyword: String) -> CallResult<'_, Vec<Value>> {
        Box::pin(async move {
            pause(self.latency).await;
            Ok(vec![
                json!({
                    "patent_id": format!("SIM-{}-001", slug(&keyword)),
                    "title": format!("Apparatus for {keyword}"),
                    "keyword": keyword,
                }),
                json!({
                    "patent_id": "SIM-SHARED-001",
                    "title": "General-purpose control method",
                    "keyword": keyword,
                }),
            ])
        })
    }
}

/// Twelve monthly points per keyword with a growth rate derived from the
/// keyword's length.
#[derive(Debug, Default)]
pub struct SimulatedTrends {
    latency: Duration,
}

impl SimulatedTrends {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl TrendSearch for SimulatedTrends {
    fn fetch(&self, keywords: Vec<String>) -> CallResult<'_, TrendData> {
        Box::pin(async move {
            pause(self.latency).await;
            let mut data = TrendData::default();

            for keyword in keywords {
                let start = 40.0 + (keyword.len() % 10) as f64;
                let monthly = 0.01 + (keyword.len() % 5) as f64 / 100.0;
                let mut value = start;

                for month in 0..12 {
                    data.points.push(json!({
                        "keyword": keyword,
                        "month": month,
                        "value": (value * 100.0).round() / 100.0,
                    }));
                    value *= 1.0 + monthly;
                }

                let end = (value * 100.0).round() / 100.0;
                data.summaries.push(TrendSummary {
                    cagr: Some(end / start - 1.0),
                    beginning_value: Some(start),
                    ending_value: Some(end),
                    timeframe_months: Some(12),
                    keyword,
                });
            }
            Ok(data)
        })
    }
}

/// Memory that lives as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<Vec<MemoryEntry>>,
}

impl InMemoryStore {
    pub async fn entries(&self) -> Vec<MemoryEntry> {
        self.entries.lock().await.clone()
    }
}

impl MemoryStore for InMemoryStore {
    fn context_for(&self, query: String, user_id: String) -> CallResult<'_, String> {
        Box::pin(async move {
            let entries = self.entries.lock().await;
            let relevant: Vec<String> = entries
                .iter()
                .filter(|e| e.user_id == user_id)
                .map(|e| format!("- [{}] {}", e.query, e.content))
                .collect();

            if relevant.is_empty() {
                Ok(format!("No earlier analyses for this user (query: {query})."))
            } else {
                Ok(relevant.join("\n"))
            }
        })
    }

    fn remember(&self, entry: MemoryEntry) -> CallResult<'_, ()> {
        Box::pin(async move {
            self.entries.lock().await.push(entry);
            Ok(())
        })
    }
}

/// Keeps every saved report for inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    saved: Mutex<Vec<StoredReport>>,
}

impl RecordingSink {
    pub async fn saved(&self) -> Vec<StoredReport> {
        self.saved.lock().await.clone()
    }
}

impl ReportSink for RecordingSink {
    fn save(&self, report: StoredReport) -> CallResult<'_, ()> {
        Box::pin(async move {
            self.saved.lock().await.push(report);
            Ok(())
        })
    }
}

/// Concrete handles to the simulated collaborators, for inspection after a
/// run.
#[derive(Debug, Clone)]
pub struct SimulatedWorld {
    pub model: Arc<SimulatedModel>,
    pub memory: Arc<InMemoryStore>,
    pub reports: Arc<RecordingSink>,
    latency: Duration,
}

impl SimulatedWorld {
    pub fn new(reject_drafts: u32) -> Self {
        Self {
            model: Arc::new(SimulatedModel::new(reject_drafts)),
            memory: Arc::new(InMemoryStore::default()),
            reports: Arc::new(RecordingSink::default()),
            latency: Duration::ZERO,
        }
    }

    /// Give every collaborator call a fixed latency.
    pub fn with_latency(reject_drafts: u32, latency: Duration) -> Self {
        Self {
            model: Arc::new(SimulatedModel::new(reject_drafts).with_latency(latency)),
            latency,
            ..Self::new(reject_drafts)
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            model: self.model.clone(),
            patents: Arc::new(SimulatedPatents::with_latency(self.latency)),
            trends: Arc::new(SimulatedTrends::with_latency(self.latency)),
            memory: self.memory.clone(),
            reports: self.reports.clone(),
        }
    }
}
