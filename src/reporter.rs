use tokio::sync::mpsc;
use tracing::info;

use crate::types::ListingBatch;

/// Emit a forwarded batch as a single JSON line to stdout.
pub fn report_batch(batch: &ListingBatch) {
    if let Ok(json) = serde_json::to_string(batch) {
        println!("{json}");
    }
}

/// Drain the notifier queue until every sender is gone.
/// Returns the number of listings reported.
pub async fn consume(mut rx: mpsc::Receiver<ListingBatch>) -> usize {
    let mut total = 0;
    while let Some(batch) = rx.recv().await {
        for listing in &batch.listings {
            info!(id = listing.id, price = %listing.price_amount, "New listing: {}", listing.title);
        }
        total += batch.listings.len();
        report_batch(&batch);
    }
    total
}
