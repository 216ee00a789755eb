//! The three pipeline stages behind one trait.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use etl_common::{AuditLog, EtlConfig, TableStore};

use crate::PipelineState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Extract,
    Transform,
    Load,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Extract => "extract",
            StageKind::Transform => "transform",
            StageKind::Load => "load",
        }
    }

    /// State the pipeline is in while this stage runs.
    pub fn running_state(&self) -> PipelineState {
        match self {
            StageKind::Extract => PipelineState::Extracting,
            StageKind::Transform => PipelineState::Transforming,
            StageKind::Load => PipelineState::Loading,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded { summary: String },
    Failed { reason: String },
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Succeeded { .. })
    }
}

/// One unit of pipeline work. A stage reports failure through its outcome;
/// it never aborts the process.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn run(&self) -> StageOutcome;
}

// =============================================================================
// Stage implementations
// =============================================================================

pub struct ExtractStage {
    pub config: Arc<EtlConfig>,
    pub store: Arc<dyn TableStore>,
    pub audit: AuditLog,
}

#[async_trait]
impl Stage for ExtractStage {
    fn kind(&self) -> StageKind {
        StageKind::Extract
    }

    async fn run(&self) -> StageOutcome {
        match extractor::run_extract(&self.config, self.store.as_ref(), &self.audit).await {
            Ok(report) => StageOutcome::Succeeded {
                summary: report.summary(),
            },
            Err(e) => StageOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}

pub struct TransformStage {
    pub config: Arc<EtlConfig>,
    pub audit: AuditLog,
}

#[async_trait]
impl Stage for TransformStage {
    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    async fn run(&self) -> StageOutcome {
        // File reads and the join are CPU and disk bound.
        let config = Arc::clone(&self.config);
        let audit = self.audit.clone();
        let result =
            tokio::task::spawn_blocking(move || transformer::run_transform(&config, &audit)).await;
        match result {
            Ok(Ok(report)) => StageOutcome::Succeeded {
                summary: report.summary(),
            },
            Ok(Err(e)) => StageOutcome::Failed {
                reason: e.to_string(),
            },
            Err(e) => StageOutcome::Failed {
                reason: format!("transform task aborted: {}", e),
            },
        }
    }
}

pub struct LoadStage {
    pub config: Arc<EtlConfig>,
    pub store: Arc<dyn TableStore>,
    pub audit: AuditLog,
}

#[async_trait]
impl Stage for LoadStage {
    fn kind(&self) -> StageKind {
        StageKind::Load
    }

    async fn run(&self) -> StageOutcome {
        match loader::run_load(&self.config, self.store.as_ref(), &self.audit).await {
            Ok(report) => StageOutcome::Succeeded {
                summary: report.summary(),
            },
            Err(e) => StageOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}
