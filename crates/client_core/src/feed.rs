use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::{
    remote::{MAX_PAGE_SIZE, MIN_PAGE_SIZE},
    types::Item,
    FeedSource, SyncError,
};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Pulls pages from `source` until `max_items` candidates are queued or the
/// feed runs out. Server order is kept and repeated ids are dropped.
pub async fn load_queue(
    source: &dyn FeedSource,
    page_size: u32,
    max_items: usize,
) -> Result<Vec<Item>, SyncError> {
    let page_size = page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
    let mut queue: Vec<Item> = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor: Option<String> = None;

    while queue.len() < max_items {
        let page = source.fetch_page(cursor.clone(), page_size).await?;
        let fetched = page.candidates.len();
        for card in page.candidates {
            if seen.insert(card.seeker_profile_id) {
                queue.push(Item::from(card));
            } else {
                debug!(item_id = %card.seeker_profile_id, "feed: dropping repeated candidate");
            }
        }

        if !page.has_more || fetched == 0 {
            break;
        }
        match page.next_cursor {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            stalled => {
                warn!(cursor = ?stalled, "feed: cursor did not advance, stopping");
                break;
            }
        }
    }

    queue.truncate(max_items);
    info!(items = queue.len(), "feed: queue loaded");
    Ok(queue)
}
