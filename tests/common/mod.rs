#![allow(dead_code)]

pub use stagedag_test_utils::builders;
pub use stagedag_test_utils::scripted;
pub use stagedag_test_utils::{init_tracing, with_timeout};

use stagedag::dag::StageGraph;
use stagedag::engine::{EngineConfig, RunController, RunReport, RunRequest};

/// Run `graph` once with `config` and the reference `query = "X"` input.
pub async fn run_graph(graph: StageGraph, config: EngineConfig) -> RunReport {
    run_request(graph, config, RunRequest::new().set("query", "X")).await
}

pub async fn run_request(graph: StageGraph, config: EngineConfig, request: RunRequest) -> RunReport {
    let controller = RunController::new(graph, config);
    with_timeout(controller.run(request))
        .await
        .expect("run task should not abort")
}
