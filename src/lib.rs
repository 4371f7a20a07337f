pub mod agent;
pub mod api;
pub mod auth;
pub mod backoff;
pub mod breaker;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod headers;
pub mod ledger;
pub mod registry;
pub mod reporter;
pub mod store;
pub mod transport;
pub mod types;

/// Catalog items endpoint (session cookie required)
pub const CATALOG_ITEMS_ENDPOINT: &str = "https://www.vinted.sk/api/v2/catalog/items";

/// Pagination is fixed: newest page only
pub const CATALOG_PAGE: u32 = 1;
pub const CATALOG_PER_PAGE: u32 = 16;

/// Session cookie carrying the access token; replayed on every catalog call
pub const ACCESS_TOKEN_COOKIE: &str = "access_token_web";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token_web";

/// Currencies offered by the add-watcher command when none are selected
pub const DEFAULT_CURRENCIES: [&str; 3] = ["EUR", "CZK", "PLN"];
