//! Best-effort result storage: full payload, then a minimal one.

use crate::backend::{Backend, ResultRecord, RunIdentity};
use crate::types::PersistOutcome;
use tracing::{debug, warn};

/// Stores `record`, degrading to [`ResultRecord::minimal`] if the full write
/// is rejected. Never fails; the outcome says how far the write got.
pub async fn persist_result(
    backend: &dyn Backend,
    identity: &RunIdentity,
    subject_id: &str,
    record: &ResultRecord,
) -> PersistOutcome {
    let full_error = match backend.submit_result(identity, subject_id, record).await {
        Ok(()) => return PersistOutcome::Full,
        Err(e) => e,
    };

    if record.is_minimal() {
        warn!(
            "Dropping result for prompt {}: {}",
            record.prompt_id, full_error
        );
        return PersistOutcome::Dropped {
            reason: full_error.to_string(),
        };
    }

    debug!(
        "Full result for prompt {} rejected ({}), retrying with minimal payload",
        record.prompt_id, full_error
    );

    match backend
        .submit_result(identity, subject_id, &record.minimal())
        .await
    {
        Ok(()) => PersistOutcome::Minimal,
        Err(e) => {
            warn!(
                "Dropping result for prompt {}: {} (minimal retry: {})",
                record.prompt_id, full_error, e
            );
            PersistOutcome::Dropped {
                reason: e.to_string(),
            }
        }
    }
}
