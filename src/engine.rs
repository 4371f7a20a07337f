use std::collections::{BTreeSet, HashSet};

use crate::types::{Listing, ListingId};

/// Whether a listing's seller currency is acceptable for a watcher.
///
/// An empty accepted set accepts everything. A listing without a seller
/// currency was not converted by the upstream, which in practice means the
/// seller shares the poller's market, so it is accepted too. This is a
/// heuristic, not a verified mapping.
pub fn listing_matches_currency(listing: &Listing, accepted: &BTreeSet<String>) -> bool {
    if accepted.is_empty() || listing.seller_currency.is_empty() {
        return true;
    }
    accepted.contains(listing.seller_currency.as_str())
}

/// Result of filtering one poll's listings.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Partition {
    /// Every unseen id, accepted or not. All of these get recorded.
    pub new_ids: Vec<ListingId>,
    /// Unseen listings that passed the currency rule, in upstream order.
    pub accepted: Vec<Listing>,
}

/// Split fetched listings into ids to record and listings to forward.
///
/// Listings whose id is in `seen` are dropped silently. A listing repeated
/// within one response is only considered once.
pub fn partition_new_listings(
    listings: Vec<Listing>,
    seen: &HashSet<ListingId>,
    accepted_currencies: &BTreeSet<String>,
) -> Partition {
    let mut out = Partition::default();
    let mut this_batch = HashSet::new();

    for listing in listings {
        if seen.contains(&listing.id) || !this_batch.insert(listing.id) {
            continue;
        }
        out.new_ids.push(listing.id);
        if listing_matches_currency(&listing, accepted_currencies) {
            out.accepted.push(listing);
        }
    }

    out
}
