//! Replay handler: re-stream a committed range to the requesting client
//!
//! 范围两端都是闭区间。起始过滤只作用于 `block_start` 所在区块，结束过滤
//! 只作用于 `block_end` 所在区块；遇到超出 `index_end` 的交易立即结束。

use contracts::{
    BrokerPayload, ChainDatabase, DatabaseRegistry, Intent, SubscribeEvent, Transport,
};
use publisher::Publisher;
use tracing::{debug, instrument};

use crate::error::DispatcherError;

/// Publish every committed transaction in the event's replay range
///
/// Returns the number of transactions published. Any read or publish error
/// abandons the rest of the range.
#[instrument(
    name = "handle_replay",
    skip(registry, publisher, event),
    fields(client_id = %event.client_id, database_id = %event.database_id)
)]
pub async fn handle_replay<R, T>(
    registry: &R,
    publisher: &Publisher<T>,
    event: &SubscribeEvent,
) -> Result<usize, DispatcherError>
where
    R: DatabaseRegistry,
    T: Transport + Send + Sync + 'static,
{
    let database = registry
        .lookup(&event.database_id)
        .ok_or_else(|| DispatcherError::unknown_database(&event.database_id))?;

    let range = event.payload.replay_range();
    if !range.is_well_formed() {
        return Err(DispatcherError::MalformedRange { range });
    }

    let mut published = 0;
    for block in range.block_start..=range.block_end {
        let fetched = database
            .fetch_block_at(block)
            .await
            .map_err(DispatcherError::ChainRead)?;

        for (index, tx) in fetched.block.transactions.iter().enumerate() {
            let position = index as i64;
            if range.before_start(block, position) {
                continue;
            }
            if range.past_end(block, position) {
                observability::record_replay_published(published);
                debug!(published, "replay range complete");
                return Ok(published);
            }

            let payload = BrokerPayload::from_transaction(fetched.count, index, tx);
            if let Err(source) = publisher
                .publish(
                    Intent::Replay,
                    &event.database_id,
                    &payload,
                    Some(&event.client_id),
                )
                .await
            {
                observability::record_replay_published(published);
                return Err(DispatcherError::Publish { published, source });
            }
            published += 1;
        }
    }

    observability::record_replay_published(published);
    debug!(published, "replay range complete");
    Ok(published)
}
