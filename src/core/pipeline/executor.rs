//! Dual-verification executor for the trigger-update pipeline.
//!
//! Both dependencies are probed before the fetch and probed again, from
//! scratch, right before execution. Every stage returns a typed failure; the
//! first failure ends the run. Once the script has been prepared it is
//! attached to every later result, successful or not.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::can_transition;
use super::types::{AlreadyRunning, ErrorKind, PipelineResult, PipelineStage};
use crate::core::crypto::{self, DecryptError, WireRecord, decode_records};
use crate::core::database::{DatabaseEngine, DatabaseError, ExecutionReport};
use crate::core::endpoint::{EndpointClient, EndpointError};
use crate::core::probe::ConnectionProbeResult;
use crate::core::sql::prepare_script;

/// Remote side of the pipeline: where encrypted triggers come from.
#[async_trait]
pub trait TriggerSource: Send + Sync {
    async fn probe(&self) -> ConnectionProbeResult;
    async fn fetch(&self) -> Result<Vec<WireRecord>, EndpointError>;
}

/// Database side of the pipeline.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn probe(&self) -> ConnectionProbeResult;
    async fn execute(&self, batches: Vec<String>) -> Result<ExecutionReport, DatabaseError>;
}

#[async_trait]
impl TriggerSource for EndpointClient {
    async fn probe(&self) -> ConnectionProbeResult {
        EndpointClient::probe(self).await
    }

    async fn fetch(&self) -> Result<Vec<WireRecord>, EndpointError> {
        EndpointClient::fetch(self).await
    }
}

#[async_trait]
impl ScriptExecutor for DatabaseEngine {
    async fn probe(&self) -> ConnectionProbeResult {
        DatabaseEngine::probe(self).await
    }

    async fn execute(&self, batches: Vec<String>) -> Result<ExecutionReport, DatabaseError> {
        DatabaseEngine::execute(self, batches).await
    }
}

/// Informational progress hook, called once per stage transition.
pub type ProgressFn = Arc<dyn Fn(PipelineStage, &str) + Send + Sync>;

pub struct TriggerPipeline {
    source: Arc<dyn TriggerSource>,
    executor: Arc<dyn ScriptExecutor>,
    passphrase: Option<String>,
    progress: Option<ProgressFn>,
    state: Arc<Mutex<PipelineStage>>,
}

/// Holds the pipeline's state slot for the duration of one run. Dropping it
/// on any path, unwinding included, leaves the slot in a terminal stage.
struct RunGuard {
    run_id: String,
    state: Arc<Mutex<PipelineStage>>,
    progress: Option<ProgressFn>,
    current: PipelineStage,
}

impl RunGuard {
    fn advance(&mut self, to: PipelineStage, message: &str) {
        if !can_transition(self.current, to) {
            error!(
                "Illegal stage transition {} -> {}",
                self.current.as_str(),
                to.as_str()
            );
        }
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = to;
        self.current = to;
        info!("[{}] {}", to.as_str(), message);
        if let Some(progress) = &self.progress {
            progress(to, message);
        }
    }

    fn enter(&mut self, to: PipelineStage) {
        self.advance(to, to.describe());
    }

    fn fail(&mut self, kind: ErrorKind, message: String, sql: Option<String>) -> PipelineResult {
        let failed_at = self.current;
        if kind == ErrorKind::Unexpected {
            error!("Unexpected failure at {}: {}", failed_at.as_str(), message);
        } else {
            warn!("Run failed at {}: {}", failed_at.as_str(), message);
        }
        self.advance(PipelineStage::Failed, &message);
        PipelineResult {
            run_id: self.run_id.clone(),
            success: false,
            message,
            sql,
            error_kind: Some(kind),
            stage: failed_at,
        }
    }

    fn succeed(&mut self, message: String, sql: String) -> PipelineResult {
        self.advance(PipelineStage::Done, &message);
        PipelineResult {
            run_id: self.run_id.clone(),
            success: true,
            message,
            sql: Some(sql),
            error_kind: None,
            stage: PipelineStage::Done,
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_active() {
            *state = PipelineStage::Failed;
        }
    }
}

impl TriggerPipeline {
    pub fn new(
        source: Arc<dyn TriggerSource>,
        executor: Arc<dyn ScriptExecutor>,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            source,
            executor,
            passphrase: passphrase.filter(|p| !p.is_empty()),
            progress: None,
            state: Arc::new(Mutex::new(PipelineStage::Idle)),
        }
    }

    pub fn with_progress(
        mut self,
        progress: impl Fn(PipelineStage, &str) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn stage(&self) -> PipelineStage {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.stage().is_active()
    }

    /// Probe both dependencies once, without claiming the pipeline.
    pub async fn check_readiness(&self) -> (ConnectionProbeResult, ConnectionProbeResult) {
        let db = self.executor.probe().await;
        let endpoint = self.source.probe().await;
        (db, endpoint)
    }

    fn acquire(&self) -> Result<RunGuard, AlreadyRunning> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_active() {
            return Err(AlreadyRunning(*state));
        }
        // Claim the slot now; the run itself starts from idle.
        *state = PipelineStage::ProbeDb1;
        Ok(RunGuard {
            run_id: Uuid::new_v4().to_string(),
            state: Arc::clone(&self.state),
            progress: self.progress.clone(),
            current: PipelineStage::Idle,
        })
    }

    /// Run the whole pipeline on the calling task.
    pub async fn fetch_and_execute_trigger(
        &self,
        passphrase: Option<&str>,
    ) -> Result<PipelineResult, AlreadyRunning> {
        let guard = self.acquire()?;
        Ok(self.run(guard, passphrase.map(str::to_string)).await)
    }

    /// Run the pipeline on its own background task. The busy check happens
    /// here, before anything is spawned. A panicking run surfaces as a
    /// `JoinError` on the handle; the guard has already released the slot.
    pub fn spawn(
        self: Arc<Self>,
        passphrase: Option<String>,
    ) -> Result<tokio::task::JoinHandle<PipelineResult>, AlreadyRunning> {
        let guard = self.acquire()?;
        Ok(tokio::spawn(async move { self.run(guard, passphrase).await }))
    }

    async fn run(&self, mut guard: RunGuard, passphrase: Option<String>) -> PipelineResult {
        let span = info_span!("trigger_run", run_id = %guard.run_id);
        self.run_stages(&mut guard, passphrase).instrument(span).await
    }

    async fn run_stages(&self, guard: &mut RunGuard, passphrase: Option<String>) -> PipelineResult {
        let passphrase = match passphrase
            .filter(|p| !p.is_empty())
            .or_else(|| self.passphrase.clone())
        {
            Some(p) => p,
            None => {
                let err = DecryptError::MissingPassphrase;
                return guard.fail((&err).into(), err.to_string(), None);
            }
        };

        // Phase 1
        guard.enter(PipelineStage::ProbeDb1);
        let db = self.executor.probe().await;
        if !db.ok {
            return guard.fail(
                ErrorKind::Connectivity,
                format!("Database connection failed: {}", db.detail),
                None,
            );
        }

        guard.enter(PipelineStage::ProbeEndpoint1);
        let endpoint = self.source.probe().await;
        if !endpoint.ok {
            return guard.fail(
                ErrorKind::Endpoint,
                format!("Endpoint not reachable: {}", endpoint.detail),
                None,
            );
        }

        guard.enter(PipelineStage::Fetch);
        let records = match self.source.fetch().await {
            Ok(records) => records,
            Err(err) => {
                return guard.fail((&err).into(), format!("Fetch failed: {}", err), None);
            }
        };

        guard.enter(PipelineStage::Decrypt);
        let decrypted = match decode_records(&records)
            .and_then(|items| crypto::decrypt(&items, &passphrase))
        {
            Ok(text) => text,
            Err(err) => {
                return guard.fail(
                    (&err).into(),
                    format!("[{}] Decryption failed: {}", err.code(), err),
                    None,
                );
            }
        };
        if decrypted.trim().is_empty() {
            return guard.fail(
                ErrorKind::Decryption,
                "Decrypted trigger is empty".to_string(),
                None,
            );
        }

        guard.enter(PipelineStage::NormalizeSplitRepair);
        let prepared = prepare_script(&decrypted);
        if prepared.batches.is_empty() {
            return guard.fail(
                ErrorKind::SqlSyntax,
                "Decrypted trigger contains no SQL statements".to_string(),
                Some(prepared.sql),
            );
        }
        info!(
            "Prepared {} batch(es), {} characters",
            prepared.batches.len(),
            prepared.sql.len()
        );

        // Phase 2: fresh probes, nothing reused from phase 1.
        guard.enter(PipelineStage::ProbeDb2);
        let db = self.executor.probe().await;
        if !db.ok {
            return guard.fail(
                ErrorKind::Connectivity,
                format!("Database no longer reachable before execution: {}", db.detail),
                Some(prepared.sql),
            );
        }

        guard.enter(PipelineStage::ProbeEndpoint2);
        let endpoint = self.source.probe().await;
        if !endpoint.ok {
            return guard.fail(
                ErrorKind::Endpoint,
                format!(
                    "Endpoint no longer reachable before execution: {}",
                    endpoint.detail
                ),
                Some(prepared.sql),
            );
        }

        guard.enter(PipelineStage::Execute);
        match self.executor.execute(prepared.batches).await {
            Ok(report) => guard.succeed(report.message(), prepared.sql),
            Err(err) => guard.fail((&err).into(), err.to_string(), Some(prepared.sql)),
        }
    }
}
