
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{ScriptExecutor, TriggerSource};
use crate::core::crypto::{self, WireRecord, envelope_json, parse_envelope};
use crate::core::database::{DatabaseError, ExecutionReport};
use crate::core::endpoint::EndpointError;
use crate::core::probe::{ConnectionProbeResult, ProbeTarget};

const PASSPHRASE: &str = "correct horse";

fn envelope_for(sql: &str) -> Vec<WireRecord> {
    let item = crypto::encrypt(sql, PASSPHRASE).unwrap();
    parse_envelope(envelope_json(&[item], false)).unwrap()
}

fn next_probe(queue: &Mutex<VecDeque<bool>>) -> bool {
    queue.lock().unwrap().pop_front().unwrap_or(true)
}

/// Remote double. Probes answer from a queue (then succeed); an empty
/// record list makes the fetch report "no data". With a gate set, the fetch
/// signals `fetch_entered` and waits for the gate before answering.
#[derive(Default)]
struct FakeSource {
    probe_results: Mutex<VecDeque<bool>>,
    probe_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    records: Vec<WireRecord>,
    fetch_entered: Arc<Notify>,
    fetch_gate: Option<Arc<Notify>>,
}

impl FakeSource {
    fn serving(sql: &str) -> Self {
        Self {
            records: envelope_for(sql),
            ..Default::default()
        }
    }

    fn with_probes(self, results: &[bool]) -> Self {
        *self.probe_results.lock().unwrap() = results.iter().copied().collect();
        self
    }
}

#[async_trait]
impl TriggerSource for FakeSource {
    async fn probe(&self) -> ConnectionProbeResult {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if next_probe(&self.probe_results) {
            ConnectionProbeResult::reachable(ProbeTarget::Endpoint, "ok")
        } else {
            ConnectionProbeResult::unreachable(ProbeTarget::Endpoint, "[NET002] refused")
        }
    }

    async fn fetch(&self) -> Result<Vec<WireRecord>, EndpointError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_entered.notify_one();
        if let Some(gate) = &self.fetch_gate {
            gate.notified().await;
        }
        if self.records.is_empty() {
            return Err(EndpointError::Empty);
        }
        Ok(self.records.clone())
    }
}

/// Database double that records every batch list it is asked to execute.
/// When `online` is set, probes report its current value instead of the
/// queue.
#[derive(Default)]
struct SpyExecutor {
    online: Option<Arc<AtomicBool>>,
    panic_on_execute: bool,
    probe_results: Mutex<VecDeque<bool>>,
    probe_calls: AtomicUsize,
    executed: Mutex<Vec<Vec<String>>>,
    failure: Option<DatabaseError>,
    entered: Arc<Notify>,
    gate: Option<Arc<Notify>>,
}

impl SpyExecutor {
    fn with_probes(self, results: &[bool]) -> Self {
        *self.probe_results.lock().unwrap() = results.iter().copied().collect();
        self
    }

    fn failing(failure: DatabaseError) -> Self {
        Self {
            failure: Some(failure),
            ..Default::default()
        }
    }

    fn execute_calls(&self) -> usize {
        self.executed.lock().unwrap().len()
    }
}

#[async_trait]
impl ScriptExecutor for SpyExecutor {
    async fn probe(&self) -> ConnectionProbeResult {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let up = match &self.online {
            Some(online) => online.load(Ordering::SeqCst),
            None => next_probe(&self.probe_results),
        };
        if up {
            ConnectionProbeResult::reachable(ProbeTarget::Database, "ok")
        } else {
            ConnectionProbeResult::unreachable(ProbeTarget::Database, "[DB001] unreachable")
        }
    }

    async fn execute(&self, batches: Vec<String>) -> Result<ExecutionReport, DatabaseError> {
        let total = batches.len();
        self.executed.lock().unwrap().push(batches);
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.panic_on_execute {
            panic!("executor crashed");
        }
        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(ExecutionReport {
                total_batches: total,
                executed_batches: total,
                result_set: None,
                last_rowcount: 0,
            }),
        }
    }
}
