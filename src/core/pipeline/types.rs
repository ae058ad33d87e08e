use serde::Serialize;
use thiserror::Error;

use crate::core::crypto::DecryptError;
use crate::core::database::{DatabaseError, FailureClass};
use crate::core::endpoint::EndpointError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    ProbeDb1,
    ProbeEndpoint1,
    Fetch,
    Decrypt,
    NormalizeSplitRepair,
    ProbeDb2,
    ProbeEndpoint2,
    Execute,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::ProbeDb1 => "probe_db_1",
            PipelineStage::ProbeEndpoint1 => "probe_endpoint_1",
            PipelineStage::Fetch => "fetch",
            PipelineStage::Decrypt => "decrypt",
            PipelineStage::NormalizeSplitRepair => "normalize_split_repair",
            PipelineStage::ProbeDb2 => "probe_db_2",
            PipelineStage::ProbeEndpoint2 => "probe_endpoint_2",
            PipelineStage::Execute => "execute",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }

    /// Human-readable progress line for the stage.
    pub fn describe(self) -> &'static str {
        match self {
            PipelineStage::Idle => "Idle",
            PipelineStage::ProbeDb1 => "Checking database connection",
            PipelineStage::ProbeEndpoint1 => "Checking endpoint connection",
            PipelineStage::Fetch => "Fetching trigger from endpoint",
            PipelineStage::Decrypt => "Decrypting trigger",
            PipelineStage::NormalizeSplitRepair => "Preparing SQL script",
            PipelineStage::ProbeDb2 => "Re-checking database connection",
            PipelineStage::ProbeEndpoint2 => "Re-checking endpoint connection",
            PipelineStage::Execute => "Executing SQL batches",
            PipelineStage::Done => "Trigger installed",
            PipelineStage::Failed => "Trigger update failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }

    /// A run occupies the pipeline in every stage except idle and the
    /// terminal ones.
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            PipelineStage::Idle | PipelineStage::Done | PipelineStage::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    Endpoint,
    Decryption,
    SqlSyntax,
    Permission,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Endpoint => "endpoint",
            ErrorKind::Decryption => "decryption",
            ErrorKind::SqlSyntax => "sql_syntax",
            ErrorKind::Permission => "permission",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl From<FailureClass> for ErrorKind {
    fn from(class: FailureClass) -> Self {
        match class {
            FailureClass::Unreachable | FailureClass::Authentication | FailureClass::Timeout => {
                ErrorKind::Connectivity
            }
            FailureClass::Permission => ErrorKind::Permission,
            FailureClass::Syntax | FailureClass::ObjectNotFound | FailureClass::Other => {
                ErrorKind::SqlSyntax
            }
        }
    }
}

impl From<&DatabaseError> for ErrorKind {
    fn from(err: &DatabaseError) -> Self {
        match err {
            DatabaseError::Unexpected(_) => ErrorKind::Unexpected,
            other => other.class().into(),
        }
    }
}

/// Every remote-side failure, timeouts and refused connections included, is
/// an endpoint failure. `Connectivity` is reserved for the database.
impl From<&EndpointError> for ErrorKind {
    fn from(_: &EndpointError) -> Self {
        ErrorKind::Endpoint
    }
}

impl From<&DecryptError> for ErrorKind {
    fn from(_: &DecryptError) -> Self {
        ErrorKind::Decryption
    }
}

/// Outcome of one pipeline run. `sql` holds the prepared script whenever the
/// run got far enough to produce it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub success: bool,
    pub message: String,
    pub sql: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub stage: PipelineStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("a trigger update is already running (stage: {})", .0.as_str())]
pub struct AlreadyRunning(pub PipelineStage);
