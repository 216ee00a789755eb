//! Pipeline Orchestrator - Runs extract, transform and load in strict order
//!
//! Responsibilities:
//! - Invoke each stage once, in sequence, in-process
//! - Stop at the first failed stage (no retry, no rollback)
//! - Track the run through PENDING -> EXTRACTING -> TRANSFORMING -> LOADING -> COMPLETED,
//!   or FAILED from any in-progress state
//! - Write pipeline start, stage and stop lines to the shared audit log
//!
//! Recovery is a fresh run from PENDING.

pub mod stage;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use etl_common::{AuditLog, EtlConfig, Stores};
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub use stage::{ExtractStage, LoadStage, Stage, StageKind, StageOutcome, TransformStage};

pub const PIPELINE_FAILED: &str = "PIPELINE FAILED. STOPPING.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Extracting,
    Transforming,
    Loading,
    Completed,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Pending => "PENDING",
            PipelineState::Extracting => "EXTRACTING",
            PipelineState::Transforming => "TRANSFORMING",
            PipelineState::Loading => "LOADING",
            PipelineState::Completed => "COMPLETED",
            PipelineState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct StageRecord {
    pub kind: StageKind,
    pub outcome: StageOutcome,
    pub elapsed: Duration,
}

/// What happened during one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub state: PipelineState,
    /// Every state entered, starting with `Pending`
    pub history: Vec<PipelineState>,
    pub stages: Vec<StageRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: PipelineState::Pending,
            history: vec![PipelineState::Pending],
            stages: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn enter(&mut self, state: PipelineState) {
        self.state = state;
        self.history.push(state);
    }

    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Completed
    }

    /// The stage that stopped the run, if any.
    pub fn failed_stage(&self) -> Option<&StageRecord> {
        self.stages.iter().find(|s| !s.outcome.is_success())
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    audit: AuditLog,
}

impl Pipeline {
    pub fn new(audit: AuditLog) -> Self {
        Self {
            stages: Vec::new(),
            audit,
        }
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Extract into the staging store, transform to clean files, load into
    /// the analytic store.
    pub fn standard(config: Arc<EtlConfig>, stores: &Stores, audit: AuditLog) -> Self {
        Self::new(audit.clone())
            .with_stage(ExtractStage {
                config: Arc::clone(&config),
                store: Arc::clone(&stores.staging),
                audit: audit.clone(),
            })
            .with_stage(TransformStage {
                config: Arc::clone(&config),
                audit: audit.clone(),
            })
            .with_stage(LoadStage {
                config,
                store: Arc::clone(&stores.analytic),
                audit,
            })
    }

    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    pub async fn run(&self) -> PipelineRun {
        let run_id = Uuid::new_v4();
        self.execute(run_id)
            .instrument(info_span!("pipeline", %run_id))
            .await
    }

    async fn execute(&self, run_id: Uuid) -> PipelineRun {
        let mut run = PipelineRun::new(run_id);
        self.audit
            .info(format!("===== ETL PIPELINE STARTED (run {}) =====", run_id));

        for stage in &self.stages {
            let kind = stage.kind();
            run.enter(kind.running_state());
            self.audit.info(format!("---- Running {} ----", kind));

            let started = Instant::now();
            let outcome = stage.run().await;
            let elapsed = started.elapsed();

            match &outcome {
                StageOutcome::Succeeded { summary } => {
                    self.audit
                        .info(format!("{} completed successfully. {}", kind, summary));
                }
                StageOutcome::Failed { reason } => {
                    self.audit.error(format!("ERROR in {}: {}", kind, reason));
                }
            }
            let failed = !outcome.is_success();
            run.stages.push(StageRecord {
                kind,
                outcome,
                elapsed,
            });

            if failed {
                run.enter(PipelineState::Failed);
                run.finished_at = Some(Utc::now());
                self.audit.error(PIPELINE_FAILED);
                return run;
            }
        }

        run.enter(PipelineState::Completed);
        run.finished_at = Some(Utc::now());
        self.audit.info("===== ETL PIPELINE COMPLETED SUCCESSFULLY =====");
        run
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use etl_common::audit::message_of;
    use etl_common::{clean, sources, CsvDirStore, TableStore};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed outcome and counts its invocations.
    struct FixedStage {
        kind: StageKind,
        outcome: StageOutcome,
        calls: Arc<AtomicUsize>,
    }

    impl FixedStage {
        fn ok(kind: StageKind) -> (Self, Arc<AtomicUsize>) {
            Self::with(kind, StageOutcome::Succeeded { summary: "(ok)".into() })
        }

        fn failing(kind: StageKind, reason: &str) -> (Self, Arc<AtomicUsize>) {
            Self::with(
                kind,
                StageOutcome::Failed {
                    reason: reason.into(),
                },
            )
        }

        fn with(kind: StageKind, outcome: StageOutcome) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let stage = Self {
                kind,
                outcome,
                calls: Arc::clone(&calls),
            };
            (stage, calls)
        }
    }

    #[async_trait]
    impl Stage for FixedStage {
        fn kind(&self) -> StageKind {
            self.kind
        }

        async fn run(&self) -> StageOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn messages(audit: &AuditLog) -> Vec<String> {
        audit
            .read_lines()
            .unwrap()
            .iter()
            .map(|l| message_of(l).to_string())
            .collect()
    }

    // -------------------------------------------------------------------------
    // STATE MACHINE
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_success_walks_every_state() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::open(dir.path().join("etl_log.txt")).unwrap();
        let (extract, _) = FixedStage::ok(StageKind::Extract);
        let (transform, _) = FixedStage::ok(StageKind::Transform);
        let (load, load_calls) = FixedStage::ok(StageKind::Load);

        let run = Pipeline::new(audit.clone())
            .with_stage(extract)
            .with_stage(transform)
            .with_stage(load)
            .run()
            .await;

        assert!(run.succeeded());
        assert_eq!(
            run.history,
            vec![
                PipelineState::Pending,
                PipelineState::Extracting,
                PipelineState::Transforming,
                PipelineState::Loading,
                PipelineState::Completed,
            ]
        );
        assert_eq!(load_calls.load(Ordering::SeqCst), 1);
        assert!(run.finished_at.is_some());
        assert!(run.failed_stage().is_none());

        let log = messages(&audit);
        assert_eq!(
            log[0],
            format!("===== ETL PIPELINE STARTED (run {}) =====", run.run_id)
        );
        assert!(log.contains(&"---- Running transform ----".to_string()));
        assert!(log.contains(&"load completed successfully. (ok)".to_string()));
        assert_eq!(log.last().unwrap(), "===== ETL PIPELINE COMPLETED SUCCESSFULLY =====");
    }

    #[tokio::test]
    async fn test_transform_failure_stops_before_load() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::open(dir.path().join("etl_log.txt")).unwrap();
        let (extract, extract_calls) = FixedStage::ok(StageKind::Extract);
        let (transform, _) = FixedStage::failing(StageKind::Transform, "forced failure");
        let (load, load_calls) = FixedStage::ok(StageKind::Load);

        let run = Pipeline::new(audit.clone())
            .with_stage(extract)
            .with_stage(transform)
            .with_stage(load)
            .run()
            .await;

        assert_eq!(run.state, PipelineState::Failed);
        assert_eq!(extract_calls.load(Ordering::SeqCst), 1);
        assert_eq!(load_calls.load(Ordering::SeqCst), 0);
        assert_eq!(run.stages.len(), 2);
        assert_eq!(run.failed_stage().unwrap().kind, StageKind::Transform);
        assert_eq!(
            run.history.last(),
            Some(&PipelineState::Failed)
        );

        let log = messages(&audit);
        assert!(log.contains(&"ERROR in transform: forced failure".to_string()));
        assert!(!log.iter().any(|m| m.contains("Running load")));
        assert_eq!(log.last().unwrap(), PIPELINE_FAILED);
    }

    #[tokio::test]
    async fn test_extract_failure_runs_nothing_else() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::open(dir.path().join("etl_log.txt")).unwrap();
        let (extract, _) = FixedStage::failing(StageKind::Extract, "no connection");
        let (transform, transform_calls) = FixedStage::ok(StageKind::Transform);

        let run = Pipeline::new(audit.clone())
            .with_stage(extract)
            .with_stage(transform)
            .run()
            .await;

        assert_eq!(
            run.history,
            vec![PipelineState::Pending, PipelineState::Extracting, PipelineState::Failed]
        );
        assert_eq!(transform_calls.load(Ordering::SeqCst), 0);
    }

    // -------------------------------------------------------------------------
    // END TO END (CSV stores)
    // -------------------------------------------------------------------------

    const TRAIN: &str = "Store,Dept,Date,Weekly_Sales,IsHoliday\n\
                         1,1,2010-02-05,24924.5,FALSE\n\
                         1,1,2010-02-12,46039.49,TRUE\n\
                         2,1,2010-02-05,35034.06,FALSE\n";

    const TEST: &str = "Store,Dept,Date,IsHoliday\n1,1,2012-11-02,FALSE\n";

    const FEATURES: &str = "Store,Date,Temperature,Fuel_Price,MarkDown1,MarkDown2,MarkDown3,MarkDown4,MarkDown5,CPI,Unemployment,IsHoliday\n\
                            1,2010-02-05,42.31,2.572,NA,NA,NA,NA,NA,211.0963582,8.106,FALSE\n\
                            2,2010-02-05,40.19,2.572,NA,NA,NA,NA,NA,210.7526053,8.324,FALSE\n";

    const STORES: &str = "Store,Type,Size\n1,A,151315\n2,B,202307\n";

    fn local_setup(base: &Path) -> (Arc<EtlConfig>, Stores, AuditLog) {
        let config = EtlConfig::local(base);
        fs::create_dir_all(&config.raw_dir).unwrap();
        for (name, content) in [
            (sources::TRAIN, TRAIN),
            (sources::TEST, TEST),
            (sources::FEATURES, FEATURES),
            (sources::STORES, STORES),
        ] {
            fs::write(config.raw_path(name), content).unwrap();
        }
        let stores = Stores {
            staging: Arc::new(CsvDirStore::new(&config.staging_dir)),
            analytic: Arc::new(CsvDirStore::new(&config.warehouse_dir)),
        };
        let audit = AuditLog::open(&config.log_file).unwrap();
        (Arc::new(config), stores, audit)
    }

    #[tokio::test]
    async fn test_standard_pipeline_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (config, stores, audit) = local_setup(dir.path());
        let pipeline = Pipeline::standard(Arc::clone(&config), &stores, audit.clone());
        assert_eq!(
            pipeline.stage_kinds(),
            vec![StageKind::Extract, StageKind::Transform, StageKind::Load]
        );

        let run = pipeline.run().await;
        assert!(run.succeeded(), "run failed: {:?}", run.failed_stage());
        assert_eq!(stores.staging.row_count("sales_staging").await.unwrap(), 4);
        assert_eq!(stores.analytic.row_count("sales_clean").await.unwrap(), 3);
        assert_eq!(stores.analytic.row_count("fact_sales").await.unwrap(), 3);

        // A second run replaces rather than accumulates.
        let again = pipeline.run().await;
        assert!(again.succeeded());
        assert_ne!(run.run_id, again.run_id);
        assert_eq!(stores.staging.row_count("sales_staging").await.unwrap(), 4);
        assert_eq!(stores.analytic.row_count("fact_sales").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_stores_file_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let (config, stores, audit) = local_setup(dir.path());
        fs::remove_file(config.raw_path(sources::STORES)).unwrap();

        let run = Pipeline::standard(Arc::clone(&config), &stores, audit.clone())
            .run()
            .await;

        assert!(run.succeeded(), "run failed: {:?}", run.failed_stage());
        assert_eq!(stores.staging.row_count("stores_staging").await.unwrap(), 0);
        assert_eq!(stores.analytic.row_count("stores_clean").await.unwrap(), 0);
        assert_eq!(stores.analytic.row_count("fact_sales").await.unwrap(), 3);
        assert!(messages(&audit)
            .iter()
            .any(|m| m.starts_with("WARNING: expected file missing:")));
    }

    #[tokio::test]
    async fn test_real_transform_failure_never_loads() {
        let dir = tempfile::tempdir().unwrap();
        let (config, stores, audit) = local_setup(dir.path());
        // Staging keeps dates as text, so only the transform rejects this.
        fs::write(
            config.raw_path(sources::TRAIN),
            "Store,Dept,Date,Weekly_Sales,IsHoliday\n1,1,not-a-date,1.0,FALSE\n",
        )
        .unwrap();

        let run = Pipeline::standard(Arc::clone(&config), &stores, audit.clone())
            .run()
            .await;

        assert_eq!(run.state, PipelineState::Failed);
        assert_eq!(run.failed_stage().unwrap().kind, StageKind::Transform);
        assert!(!config.clean_path(clean::FULL_DATASET).exists());
        assert!(stores.analytic.row_count("sales_clean").await.is_err());

        let log = messages(&audit);
        assert!(log.iter().any(|m| m.starts_with("ERROR in transform:")));
        assert!(!log.contains(&"---- Running load ----".to_string()));
        assert_eq!(log.last().unwrap(), PIPELINE_FAILED);
    }
}
