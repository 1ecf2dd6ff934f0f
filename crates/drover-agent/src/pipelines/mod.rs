//! The three fixed graphs: input screening, intent recognition and the
//! think/tool decision loop.

pub mod decision;
pub mod intent;
pub mod screening;

pub use decision::{DecisionOutcome, DecisionPipeline, DecisionRequest};
pub use intent::{IntentOutcome, IntentPipeline};
pub use screening::{ScreeningOutcome, ScreeningPipeline};

use serde_json::Value;
use tracing::{debug, error};

use drover_core::error::Result;
use drover_core::traits::RecordStore;
use drover_core::types::{HistoryEntry, PipelineRecord};

use crate::graph::StateUpdate;

/// List field collecting every prompt and reply of a run.
pub(crate) const HISTORY: &str = "history";

/// Append one prompt/reply exchange to the run history.
pub(crate) fn record_exchange(
    update: StateUpdate,
    prompt: HistoryEntry,
    reply: &Value,
) -> Result<StateUpdate> {
    update
        .append_ser(HISTORY, &prompt)?
        .append_ser(HISTORY, &HistoryEntry::assistant(reply.to_string()))
}

/// Persist a finished run. Failures are logged and the id is dropped.
pub(crate) async fn save_record(store: &dyn RecordStore, record: PipelineRecord) -> Option<i64> {
    let kind = record.kind();
    match store.save(record).await {
        Ok(id) => {
            debug!(kind, id, "Pipeline record saved");
            Some(id)
        }
        Err(e) => {
            error!(kind, error = %e, "Failed to save pipeline record");
            None
        }
    }
}
