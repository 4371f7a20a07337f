use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{PollError, Result};
use crate::types::Listing;
use crate::{CATALOG_ITEMS_ENDPOINT, CATALOG_PAGE, CATALOG_PER_PAGE};

/// Catalog response body. Only the fields the watcher forwards are modeled.
#[derive(Debug, Deserialize)]
pub struct CatalogResponse {
    pub items: Vec<CatalogItem>,
}

#[derive(Debug, Deserialize)]
pub struct CatalogItem {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: Price,
    #[serde(default)]
    pub brand_title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub conversion: Option<Conversion>,
    #[serde(default)]
    pub photo: Option<Photo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Price {
    #[serde(default)]
    pub amount: String,
}

/// Present when the upstream converted the price from the seller's currency.
#[derive(Debug, Default, Deserialize)]
pub struct Conversion {
    #[serde(default)]
    pub seller_currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Photo {
    #[serde(default)]
    pub url: String,
}

impl From<CatalogItem> for Listing {
    fn from(item: CatalogItem) -> Self {
        Listing {
            id: item.id,
            title: item.title,
            brand: item.brand_title,
            price_amount: item.price.amount,
            detail_url: item.url,
            seller_currency: item
                .conversion
                .and_then(|c| c.seller_currency)
                .unwrap_or_default(),
            thumbnail_url: item.photo.map(|p| p.url).unwrap_or_default(),
        }
    }
}

/// Decode a catalog response body into listings, preserving upstream order.
pub fn parse_listings(body: &str) -> Result<Vec<Listing>> {
    let resp: CatalogResponse =
        serde_json::from_str(body).map_err(|e| PollError::DecodeError(e.to_string()))?;
    debug!("Decoded {} catalog items", resp.items.len());
    Ok(resp.items.into_iter().map(Listing::from).collect())
}

/// Build a catalog request URL for the first page from an already-encoded
/// filter query (e.g. `catalog_ids[]=79&order=newest_first`).
pub fn catalog_request_url(filter_query: &str) -> String {
    let base = format!(
        "{CATALOG_ITEMS_ENDPOINT}?page={CATALOG_PAGE}&per_page={CATALOG_PER_PAGE}"
    );
    let filter_query = filter_query.trim_start_matches(['?', '&']);
    if filter_query.is_empty() {
        base
    } else {
        format!("{base}&{filter_query}")
    }
}

/// The origin a request URL is served from: `scheme://host[:port]`.
/// Session cookies are acquired from this origin.
pub fn extract_host(request_url: &str) -> Result<String> {
    let url = Url::parse(request_url)
        .map_err(|e| PollError::InvalidUrl(format!("{request_url}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| PollError::InvalidUrl(format!("{request_url}: no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}
