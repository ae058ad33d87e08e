//! Database execution engine.
//!
//! One session is opened per call and used for every batch. Batches run in
//! order; a batch without a result set is committed before the next one
//! starts, so a `CREATE TRIGGER` batch is durable before anything that
//! depends on it runs. The first failing batch stops the run.

mod classify;
mod sqlite;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::core::probe::{ConnectionProbeResult, ProbeTarget};

pub use classify::{DbFailure, FailureClass};
pub use sqlite::SqliteBackend;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);
const EXCERPT_CHARS: usize = 200;

/// Cancels the statement currently running on a session.
pub type Interrupter = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Rows(ResultSet),
    Affected(u64),
}

pub trait SqlSession: Send {
    fn execute(&mut self, sql: &str) -> Result<BatchOutcome, DbFailure>;
    fn commit(&mut self) -> Result<(), DbFailure>;
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

pub trait SqlBackend: Send + Sync {
    fn describe(&self) -> String;
    fn connect(&self) -> Result<Box<dyn SqlSession>, DbFailure>;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatabaseError {
    #[error("[{}] {}: {detail}", .class.code(), .class.label())]
    Connect { class: FailureClass, detail: String },

    #[error("[{}] {} in batch {index}/{total}: {detail}\n\nBatch: {excerpt}", .class.code(), .class.label())]
    Batch {
        class: FailureClass,
        index: usize,
        total: usize,
        detail: String,
        excerpt: String,
    },

    #[error("[{}] final commit failed: {detail}", .class.code())]
    Commit { class: FailureClass, detail: String },

    #[error("no SQL statements found")]
    NoBatches,

    #[error("unexpected database failure: {0}")]
    Unexpected(String),
}

impl DatabaseError {
    pub fn class(&self) -> FailureClass {
        match self {
            DatabaseError::Connect { class, .. }
            | DatabaseError::Batch { class, .. }
            | DatabaseError::Commit { class, .. } => *class,
            DatabaseError::NoBatches | DatabaseError::Unexpected(_) => FailureClass::Other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub total_batches: usize,
    pub executed_batches: usize,
    pub result_set: Option<ResultSet>,
    pub last_rowcount: u64,
}

impl ExecutionReport {
    pub fn message(&self) -> String {
        if let Some(rs) = &self.result_set {
            format!("All batches executed - {} result row(s)", rs.rows.len())
        } else if self.last_rowcount > 0 {
            format!(
                "All batches executed - {} row(s) affected",
                self.last_rowcount
            )
        } else {
            format!("All {} batch(es) executed", self.executed_batches)
        }
    }
}

pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

pub struct DatabaseEngine {
    backend: Arc<dyn SqlBackend>,
    probe_timeout: Duration,
    execute_timeout: Duration,
}

impl DatabaseEngine {
    pub fn new(backend: Arc<dyn SqlBackend>) -> Self {
        Self {
            backend,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            execute_timeout: DEFAULT_EXECUTE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, probe: Duration, execute: Duration) -> Self {
        self.probe_timeout = probe;
        self.execute_timeout = execute;
        self
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Open a session and run `SELECT 1`, bounded by the probe timeout.
    pub async fn probe(&self) -> ConnectionProbeResult {
        let backend = Arc::clone(&self.backend);
        let task = tokio::task::spawn_blocking(move || {
            let mut session = backend.connect()?;
            session.execute("SELECT 1")?;
            Ok::<_, DbFailure>(())
        });

        match tokio::time::timeout(self.probe_timeout, task).await {
            Ok(Ok(Ok(()))) => {
                debug!("Database probe succeeded ({})", self.describe());
                ConnectionProbeResult::reachable(ProbeTarget::Database, "Connection successful")
            }
            Ok(Ok(Err(failure))) => {
                warn!("Database probe failed: {}", failure);
                ConnectionProbeResult::unreachable(ProbeTarget::Database, failure.to_string())
            }
            Ok(Err(join_err)) => {
                error!("Database probe task failed: {:?}", join_err);
                ConnectionProbeResult::unreachable(
                    ProbeTarget::Database,
                    format!("probe task failed: {}", join_err),
                )
            }
            Err(_) => {
                let failure = DbFailure::new(
                    FailureClass::Timeout,
                    format!("no answer within {}s", self.probe_timeout.as_secs()),
                );
                warn!("Database probe failed: {}", failure);
                ConnectionProbeResult::unreachable(ProbeTarget::Database, failure.to_string())
            }
        }
    }

    /// Execute `batches` in order on a single session.
    pub async fn execute(&self, batches: Vec<String>) -> Result<ExecutionReport, DatabaseError> {
        if batches.iter().all(|b| b.trim().is_empty()) {
            return Err(DatabaseError::NoBatches);
        }
        info!(
            "Executing {} batch(es) on {}",
            batches.len(),
            self.describe()
        );

        let batches = Arc::new(batches);
        let progress = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let (interrupt_tx, mut interrupt_rx) = oneshot::channel::<Interrupter>();

        let mut task = tokio::task::spawn_blocking({
            let backend = Arc::clone(&self.backend);
            let batches = Arc::clone(&batches);
            let progress = Arc::clone(&progress);
            let cancelled = Arc::clone(&cancelled);
            move || run_batches(backend.as_ref(), &batches, &progress, &cancelled, interrupt_tx)
        });

        if let Ok(joined) = tokio::time::timeout(self.execute_timeout, &mut task).await {
            return flatten_join(joined);
        }

        // The flag is raised before the interrupt is taken: a worker that has
        // not handed over its interrupter yet sees the flag before its first
        // batch, and one that has is interrupted or refuses its next commit.
        cancelled.store(true, Ordering::SeqCst);
        if let Ok(interrupt) = interrupt_rx.try_recv() {
            interrupt();
        }
        warn!(
            "Execution exceeded {:?}, waiting for the session to roll back",
            self.execute_timeout
        );

        // Report only once the worker has stopped, so the outcome matches
        // what the database holds.
        match flatten_join(task.await) {
            Ok(report) => {
                warn!("Execution completed after the timeout, keeping the committed result");
                Ok(report)
            }
            Err(err @ DatabaseError::Unexpected(_)) => Err(err),
            Err(_) => Err(self.timeout_error(&batches, progress.load(Ordering::SeqCst))),
        }
    }

    fn timeout_error(&self, batches: &[String], index: usize) -> DatabaseError {
        let detail = format!(
            "execution exceeded {}s",
            self.execute_timeout.as_secs_f32()
        );
        error!("Batch execution timed out at batch {}/{}", index, batches.len());
        match index.checked_sub(1).and_then(|i| batches.get(i)) {
            Some(batch) => DatabaseError::Batch {
                class: FailureClass::Timeout,
                index,
                total: batches.len(),
                detail,
                excerpt: excerpt(batch.trim(), EXCERPT_CHARS),
            },
            None => DatabaseError::Connect {
                class: FailureClass::Timeout,
                detail,
            },
        }
    }
}

fn flatten_join(
    joined: Result<Result<ExecutionReport, DatabaseError>, tokio::task::JoinError>,
) -> Result<ExecutionReport, DatabaseError> {
    joined.unwrap_or_else(|join_err| {
        error!("Batch execution task failed: {:?}", join_err);
        Err(DatabaseError::Unexpected(join_err.to_string()))
    })
}

fn run_batches(
    backend: &dyn SqlBackend,
    batches: &[String],
    progress: &AtomicUsize,
    cancelled: &AtomicBool,
    interrupt_tx: oneshot::Sender<Interrupter>,
) -> Result<ExecutionReport, DatabaseError> {
    let mut session = backend.connect().map_err(|f| DatabaseError::Connect {
        class: f.class,
        detail: f.message,
    })?;
    if let Some(interrupt) = session.interrupter() {
        let _ = interrupt_tx.send(interrupt);
    }

    let total = batches.len();
    let mut report = ExecutionReport {
        total_batches: total,
        ..Default::default()
    };

    for (i, batch) in batches.iter().enumerate() {
        let batch = batch.trim();
        if batch.is_empty() {
            continue;
        }
        let index = i + 1;
        if cancelled.load(Ordering::SeqCst) {
            return Err(cancelled_at(index, total, batch));
        }
        progress.store(index, Ordering::SeqCst);
        debug!("Executing batch {}/{}: {}", index, total, excerpt(batch, 100));

        let step = match session.execute(batch) {
            Ok(BatchOutcome::Rows(rows)) => {
                report.result_set = Some(rows);
                Ok(())
            }
            Ok(BatchOutcome::Affected(count)) => {
                if count > 0 {
                    report.last_rowcount = count;
                }
                if cancelled.load(Ordering::SeqCst) {
                    return Err(cancelled_at(index, total, batch));
                }
                session.commit()
            }
            Err(failure) => Err(failure),
        };

        if let Err(failure) = step {
            error!("Batch {}/{} failed: {}", index, total, failure);
            return Err(DatabaseError::Batch {
                class: failure.class,
                index,
                total,
                detail: failure.message,
                excerpt: excerpt(batch, EXCERPT_CHARS),
            });
        }
        report.executed_batches += 1;
    }

    if cancelled.load(Ordering::SeqCst) {
        return Err(cancelled_at(total, total, batches.last().map_or("", |b| b.trim())));
    }
    session.commit().map_err(|f| DatabaseError::Commit {
        class: f.class,
        detail: f.message,
    })?;

    info!("{}", report.message());
    Ok(report)
}

/// The session is dropped uncommitted, which rolls back the pending batch.
fn cancelled_at(index: usize, total: usize, batch: &str) -> DatabaseError {
    warn!("Batch {}/{} cancelled after timeout, rolling back", index, total);
    DatabaseError::Batch {
        class: FailureClass::Timeout,
        index,
        total,
        detail: "cancelled after timeout".to_string(),
        excerpt: excerpt(batch, EXCERPT_CHARS),
    }
}
