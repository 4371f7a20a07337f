use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream listing identifier. Unique per marketplace item.
pub type ListingId = u64;

/// A persisted subscription: a catalog request URL plus the seller currencies
/// the user accepts. An empty currency set accepts any currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherSpec {
    #[serde(rename = "url")]
    pub source_url: String,
    #[serde(rename = "seller_currency", default, deserialize_with = "null_as_empty")]
    pub accepted_currencies: BTreeSet<String>,
}

// Older watcher files store `null` when no currency was selected.
fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<BTreeSet<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl WatcherSpec {
    pub fn new<I, S>(source_url: impl Into<String>, currencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source_url: source_url.into(),
            accepted_currencies: currencies.into_iter().map(Into::into).collect(),
        }
    }
}

/// One marketplace item as returned by a single poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub title: String,
    pub brand: String,
    pub price_amount: String,
    pub detail_url: String,
    /// Empty when the upstream did not convert the price.
    pub seller_currency: String,
    pub thumbnail_url: String,
}

/// Session tokens captured from the upstream's cookies for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

impl SessionCredential {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Newly matched listings for one watcher, handed to the notifier.
#[derive(Debug, Clone, Serialize)]
pub struct ListingBatch {
    pub watcher_url: String,
    pub detected_at: DateTime<Utc>,
    pub listings: Vec<Listing>,
}
