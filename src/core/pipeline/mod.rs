mod executor;
pub mod types;

pub use executor::{ScriptExecutor, TriggerPipeline, TriggerSource};
pub use types::{ErrorKind, PipelineStage};

/// Allowed stage transitions. Stages advance strictly in order; any stage
/// that is not terminal may fail.
pub fn can_transition(from: PipelineStage, to: PipelineStage) -> bool {
    use PipelineStage::*;

    if to == Failed {
        return !from.is_terminal();
    }
    match from {
        Idle | Done | Failed => to == ProbeDb1,
        ProbeDb1 => to == ProbeEndpoint1,
        ProbeEndpoint1 => to == Fetch,
        Fetch => to == Decrypt,
        Decrypt => to == NormalizeSplitRepair,
        NormalizeSplitRepair => to == ProbeDb2,
        ProbeDb2 => to == ProbeEndpoint2,
        ProbeEndpoint2 => to == Execute,
        Execute => to == Done,
    }
}

#[cfg(test)]
mod tests;
