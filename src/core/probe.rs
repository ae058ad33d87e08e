use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeTarget {
    Database,
    Endpoint,
}

impl ProbeTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeTarget::Database => "database",
            ProbeTarget::Endpoint => "endpoint",
        }
    }
}

/// Outcome of one connectivity check. Produced fresh on every probe and
/// never reused between the two verification phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionProbeResult {
    pub target: ProbeTarget,
    pub ok: bool,
    pub detail: String,
}

impl ConnectionProbeResult {
    pub fn reachable(target: ProbeTarget, detail: impl Into<String>) -> Self {
        Self {
            target,
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn unreachable(target: ProbeTarget, detail: impl Into<String>) -> Self {
        Self {
            target,
            ok: false,
            detail: detail.into(),
        }
    }
}
