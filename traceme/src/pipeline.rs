use std::{fmt, io, path::Path};

use trace_tools::{ToolInvocation, ToolRunner, category_pipeline};
use tracing::{info, warn};

use crate::session::TraceLayout;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizeStage {
    Pack,
    Compress,
    Cleanup,
}

impl FinalizeStage {
    pub const ORDER: [FinalizeStage; 3] = [
        FinalizeStage::Pack,
        FinalizeStage::Compress,
        FinalizeStage::Cleanup,
    ];
}

impl fmt::Display for FinalizeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FinalizeStage::Pack => "pack",
            FinalizeStage::Compress => "compress",
            FinalizeStage::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct StageOutcome {
    pub stage: FinalizeStage,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct FinalizeReport {
    pub identity: String,
    pub trace_id: String,
    pub stages: Vec<StageOutcome>,
}

impl FinalizeReport {
    pub fn succeeded(&self) -> bool {
        self.stages.iter().all(|outcome| outcome.error.is_none())
    }

    pub fn outcome(&self, stage: FinalizeStage) -> Option<&StageOutcome> {
        self.stages.iter().find(|outcome| outcome.stage == stage)
    }
}

/// Packs, compresses and removes a finished session's raw trace.
///
/// Every stage runs even when an earlier one failed; nothing is retried or
/// rolled back, so the archive may be partial or missing.
pub async fn run_finalize(
    tools: &dyn ToolRunner,
    layout: &TraceLayout,
    identity: &str,
    trace_id: &str,
) -> FinalizeReport {
    let trace_dir = layout.raw_trace_dir(trace_id);
    let archive = layout.archive_path(trace_id);
    let mut stages = Vec::with_capacity(FinalizeStage::ORDER.len());

    for stage in FinalizeStage::ORDER {
        let result = match stage {
            FinalizeStage::Pack => tools
                .run(ToolInvocation::Pack {
                    trace_dir: trace_dir.clone(),
                })
                .await
                .map_err(|err| err.to_string()),
            FinalizeStage::Compress => tools
                .run(ToolInvocation::Compress {
                    trace_dir: trace_dir.clone(),
                    archive: archive.clone(),
                })
                .await
                .map_err(|err| err.to_string()),
            FinalizeStage::Cleanup => remove_trace_dir(&trace_dir)
                .await
                .map_err(|err| err.to_string()),
        };
        if let Err(err) = &result {
            warn!(
                "{} {stage} failed for trace {trace_id}: {err}",
                category_pipeline()
            );
        }
        stages.push(StageOutcome {
            stage,
            error: result.err(),
        });
    }

    let report = FinalizeReport {
        identity: identity.to_string(),
        trace_id: trace_id.to_string(),
        stages,
    };
    if report.succeeded() {
        info!(
            "{} trace {trace_id} archived at {}",
            category_pipeline(),
            archive.display()
        );
    }
    report
}

async fn remove_trace_dir(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
