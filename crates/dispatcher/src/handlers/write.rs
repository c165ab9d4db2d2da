//! Write handler: turn a write event into a chain-append request

use contracts::{ChainDatabase, ChainRequest, DatabaseRegistry, ExecuteOutcome, SubscribeEvent};
use tracing::{debug, instrument};

use crate::error::DispatcherError;

/// Submit the event's statements to its database
///
/// The request carries the event's client as requesting node and its
/// `client_seq` as sequence number. No retry on failure.
#[instrument(
    name = "handle_write",
    skip(registry, event),
    fields(
        client_id = %event.client_id,
        database_id = %event.database_id,
        client_seq = event.payload.client_sequence
    )
)]
pub async fn handle_write<R: DatabaseRegistry>(
    registry: &R,
    event: SubscribeEvent,
) -> Result<ExecuteOutcome, DispatcherError> {
    let database = registry
        .lookup(&event.database_id)
        .ok_or_else(|| DispatcherError::unknown_database(&event.database_id))?;

    let request = ChainRequest::write(
        event.client_id,
        event.database_id,
        event.payload.client_sequence,
        event.payload.events,
    );

    let result = database
        .execute(request)
        .await
        .map_err(DispatcherError::ChainExecute);
    observability::record_write(result.is_ok());

    let outcome = result?;
    debug!(affected_rows = outcome.affected_rows, "write executed");
    Ok(outcome)
}
