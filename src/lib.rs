// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod pipeline;
pub mod state;
pub mod types;

use anyhow::{Result, anyhow};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_or_default};
use crate::dag::StageGraph;
use crate::engine::{EngineConfig, RunController, RunReport, TraceLogger};
use crate::pipeline::simulated::SimulatedWorld;
use crate::pipeline::{AnalysisRequest, AnalysisSummary, analysis_graph};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the analysis graph over simulated collaborators
/// - the run controller and trace logging
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_or_default(&args.config)?;

    let world = SimulatedWorld::new(args.reject_drafts);
    let graph = analysis_graph(&world.collaborators(), &cfg.pipeline)?;
    let engine = EngineConfig::from_config(&cfg).for_graph(&graph)?;

    if args.dry_run {
        print_dry_run(&cfg, &graph, &engine);
        return Ok(());
    }

    let query = args
        .query
        .clone()
        .ok_or_else(|| anyhow!("--query is required"))?;

    let mut request = AnalysisRequest::new(query);
    request.extra_context = args.context.clone();
    request.user_id = args.user.clone();
    request.report_id = args.report_id.clone();

    let mut run_request = request.into_run_request().with_subscriber(TraceLogger);
    if let Some(max) = args.max_iterations {
        run_request = run_request.max_iterations(max);
    }

    let controller = RunController::new(graph, engine);
    let handle = controller.start(run_request)?;
    info!(run_id = %handle.run_id(), "analysis started");

    // Ctrl-C → cancel the run; the partial report is still printed.
    {
        let cancel = handle.cancel_token();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("interrupt received; cancelling run");
            cancel.cancel();
        });
    }

    let report = handle.join().await?;
    print_report(&report, args.json)?;

    match &report.error {
        None => Ok(()),
        Some(err) => Err(anyhow!("run {} failed: {err}", report.run_id)),
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    let summary = AnalysisSummary::from(report);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if let Some(text) = &summary.final_report {
        println!("{text}");
    }
    println!();
    println!("status: {}", summary.status);
    println!("path: {}", summary.path.join(" -> "));
    println!(
        "patents: {}  trend keywords: {}  iterations: {}{}",
        summary.patent_count,
        summary.trend_keywords,
        summary.iterations,
        if summary.forced_pass { " (forced pass)" } else { "" }
    );
    Ok(())
}

/// Simple dry-run output: print stages, deps and engine settings.
fn print_dry_run(cfg: &ConfigFile, graph: &StageGraph, engine: &EngineConfig) {
    println!("stagedag dry-run");
    println!("  engine.max_iterations = {}", engine.max_iterations);
    println!("  engine.conflict_policy = {:?}", engine.conflict_policy);
    if let Some(timeout) = engine.default_stage_timeout {
        println!("  engine.stage_timeout = {timeout:?}");
    }
    println!("  pipeline.max_keywords = {}", cfg.pipeline.max_keywords);
    println!();

    println!("stages ({}):", graph.len());
    for name in graph.stages() {
        println!("  - {name}");
        let deps = graph.dependencies_of(name);
        if !deps.is_empty() {
            println!("      after: {deps:?}");
        }
        if let Some(timeout) = engine.timeout_for(graph, name) {
            println!("      timeout: {timeout:?}");
        }
    }

    if let Some(edge) = graph.conditional() {
        println!();
        println!(
            "retry edge: {} ? {} : {} (flag '{}', loop {:?})",
            edge.source,
            edge.accept,
            edge.retry,
            edge.flag,
            graph.loop_body()
        );
    }

    debug!("dry-run complete (no execution)");
}
