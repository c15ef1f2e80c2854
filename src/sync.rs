// Remote Sync Driver - paginated wallet API fetch
// Pages flow through the same insert-or-ignore path as manual import, so a
// re-run after a mid-sync failure only picks up what is missing.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::db::{insert_rows, WalletConfig};
use crate::parser::RawRow;

/// Default hard cap on pages followed in one sync; guarantees termination
/// against a misbehaving or looping server.
const MAX_PAGES: u32 = 500;

/// How much of an error response body makes it into the failure message.
const ERROR_BODY_CAP: usize = 240;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// API RESPONSE SHAPE
// ============================================================================

// {"data": {"wallet": {"data": [items...], "next_page_url": "..."}}}
// Absent layers read as an empty page.

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: Option<ApiData>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    #[serde(default)]
    wallet: Option<ApiWallet>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiWallet {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    #[serde(default)]
    next_page_url: Option<String>,
}

impl ApiResponse {
    fn into_wallet(self) -> ApiWallet {
        self.data.and_then(|d| d.wallet).unwrap_or_default()
    }
}

/// Running counters across all pages of one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncReport {
    pub pages: u32,
    pub total_fetched: usize,
    pub total_inserted: usize,
    pub total_ignored: usize,
}

// ============================================================================
// URL HANDLING
// ============================================================================

/// Set the `wallet` query parameter on a URL, replacing any existing one.
///
/// Structured query editing instead of string concatenation: cursor URLs
/// returned by the server already carry query parameters, and appending
/// `&wallet=...` blindly would duplicate or garble them.
fn with_wallet(url_str: &str, wallet: &str) -> Result<String> {
    let mut url = Url::parse(url_str).with_context(|| format!("invalid page URL: {url_str}"))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "wallet")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair("wallet", wallet);
    }

    Ok(url.into())
}

// ============================================================================
// SYNC CLIENT
// ============================================================================

#[derive(Debug)]
pub struct WalletSyncClient {
    http: reqwest::blocking::Client,
    config: WalletConfig,
    /// Upper bound on pages followed in one run.
    pub page_cap: u32,
}

impl WalletSyncClient {
    /// Build a client for the given configuration. Fails with a
    /// missing-configuration error before any request can be made if the
    /// base URL, store id, or token is empty.
    pub fn new(config: WalletConfig) -> Result<Self> {
        if config.base_url.trim().is_empty()
            || config.store_id.trim().is_empty()
            || config.token.trim().is_empty()
        {
            bail!("missing config: baseUrl/storeId/token (set wallet config first)");
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(WalletSyncClient {
            http,
            config,
            page_cap: MAX_PAGES,
        })
    }

    fn first_page_url(&self) -> Result<String> {
        let base = self.config.base_url.trim_end_matches('/');
        let url = format!(
            "{}/api/stores/{}/wallet/all?page=1",
            base, self.config.store_id
        );
        with_wallet(&url, &self.config.wallet)
    }

    /// Follow the paginated wallet feed, inserting every page through the
    /// deduplicated store path.
    ///
    /// Stops on a missing/empty cursor, an empty page, or the page cap.
    /// A non-success response aborts with the status and a truncated body;
    /// pages already inserted stay committed.
    pub fn sync(&self, conn: &Connection) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut next_url = Some(self.first_page_url()?);

        while let Some(page_url) = next_url.take() {
            report.pages += 1;

            let resp = self
                .http
                .get(&page_url)
                .bearer_auth(&self.config.token)
                .header("Accept", "application/json")
                .send()
                .with_context(|| format!("request failed: {page_url}"))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().unwrap_or_default();
                let excerpt: String = body.chars().take(ERROR_BODY_CAP).collect();
                bail!("fetch failed ({}): {}", status.as_u16(), excerpt);
            }

            let wallet = resp
                .json::<ApiResponse>()
                .context("malformed wallet API response")?
                .into_wallet();

            if wallet.data.is_empty() {
                break;
            }

            let rows: Vec<RawRow> = wallet.data.iter().filter_map(RawRow::from_json).collect();
            let inserted = insert_rows(conn, &rows)?;

            report.total_fetched += wallet.data.len();
            report.total_inserted += inserted.inserted;
            report.total_ignored += inserted.ignored;

            next_url = match wallet.next_page_url.as_deref() {
                Some(cursor) if !cursor.trim().is_empty() => {
                    Some(with_wallet(cursor, &self.config.wallet)?)
                }
                _ => None,
            };

            if report.pages >= self.page_cap {
                break;
            }
        }

        Ok(report)
    }
}

// ============================================================================
// TESTS
// ============================================================================
