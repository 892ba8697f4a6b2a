//! Gamma profile search: resolve a source handle to a proxy wallet.
//!
//! Called exactly once at startup; failure is fatal for the run.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

/// Polymarket Gamma API base URL.
pub const GAMMA_BASE: &str = "https://gamma-api.polymarket.com";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    profiles: Vec<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(default)]
    pseudonym: Option<String>,
    #[serde(rename = "proxyWallet", default)]
    proxy_wallet: Option<String>,
}

/// Resolve `@handle`, bare pseudonym, or direct `0x` address to a wallet.
///
/// Direct addresses pass through untouched. Handles hit the profile search
/// once; an exact case-insensitive pseudonym match wins, otherwise the
/// first profile carrying a proxy wallet is used.
pub async fn resolve_source_wallet(client: &Client, base: &str, source: &str) -> Result<String> {
    let s = source.trim();
    if s.starts_with("0x") && s.len() == 42 {
        return Ok(s.to_string());
    }

    let handle = s.strip_prefix('@').unwrap_or(s);
    let url = format!("{base}/public-search");
    let resp = client
        .get(&url)
        .query(&[
            ("q", handle),
            ("search_profiles", "true"),
            ("limit_per_type", "20"),
        ])
        .send()
        .await
        .context("profile search request failed")?
        .error_for_status()
        .context("profile search returned an error status")?;

    let body: SearchResponse = resp
        .json()
        .await
        .context("profile search response was not valid JSON")?;

    debug!(
        candidates = body.profiles.len(),
        handle, "profile search returned"
    );

    let wanted = handle.to_lowercase();
    for p in &body.profiles {
        let pseudo = p.pseudonym.as_deref().unwrap_or("").to_lowercase();
        if pseudo == wanted {
            if let Some(wallet) = p.proxy_wallet.as_deref().filter(|w| !w.is_empty()) {
                return Ok(wallet.to_string());
            }
        }
    }
    for p in &body.profiles {
        if let Some(wallet) = p.proxy_wallet.as_deref().filter(|w| !w.is_empty()) {
            return Ok(wallet.to_string());
        }
    }

    bail!("could not resolve source profile/address: {source}")
}
