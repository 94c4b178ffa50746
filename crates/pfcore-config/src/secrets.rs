//! Exchange credential resolution.
//!
//! Config YAML never stores credential values — only the exchange
//! `platform` name. This module derives a fixed family of environment
//! variable names from that platform and resolves them in priority order:
//! `*_DEMO_API_KEY/SECRET` > `*_TESTNET_*` > `*_MAINNET_*` > generic
//! `*_API_KEY/SECRET`. A key and its secret are always read from the same
//! priority tier — never mixed across tiers.
//!
//! `Debug` on [`ResolvedExchangeCredentials`] redacts both fields. Error
//! messages name the environment variables that were checked, never a
//! value.

use anyhow::{bail, Result};

use crate::RunMode;

/// Resolved API credentials for one venue. Never logged or printed in full.
#[derive(Clone)]
pub struct ResolvedExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for ResolvedExchangeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedExchangeCredentials")
            .field("api_key", &"<REDACTED>")
            .field("api_secret", &"<REDACTED>")
            .finish()
    }
}

/// `bybit-like` -> `BYBIT`, `binance-like` -> `BINANCE`, `mock` -> `MOCK`.
fn env_prefix(platform: &str) -> String {
    platform
        .trim()
        .trim_end_matches("-like")
        .to_ascii_uppercase()
        .replace('-', "_")
}

/// Resolve a named environment variable. Blank values count as unset.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve API credentials for `platform`, trying each priority tier in
/// order and returning the first tier where both the key and secret
/// variables are set.
///
/// In [`RunMode::Replay`], missing credentials are not an error — replay
/// never talks to a venue — and `Ok(None)` is returned. In any other mode,
/// exhausting every tier without a match is a hard startup failure.
pub fn resolve_exchange_credentials(
    platform: &str,
    mode: RunMode,
) -> Result<Option<ResolvedExchangeCredentials>> {
    let prefix = env_prefix(platform);
    let tiers = [
        (format!("{prefix}_DEMO_API_KEY"), format!("{prefix}_DEMO_API_SECRET")),
        (format!("{prefix}_TESTNET_API_KEY"), format!("{prefix}_TESTNET_API_SECRET")),
        (format!("{prefix}_MAINNET_API_KEY"), format!("{prefix}_MAINNET_API_SECRET")),
        (format!("{prefix}_API_KEY"), format!("{prefix}_API_SECRET")),
    ];

    for (key_var, secret_var) in &tiers {
        if let (Some(api_key), Some(api_secret)) = (resolve_env(key_var), resolve_env(secret_var))
        {
            return Ok(Some(ResolvedExchangeCredentials { api_key, api_secret }));
        }
    }

    if mode == RunMode::Replay {
        return Ok(None);
    }

    bail!(
        "EXCHANGE_CREDENTIALS_MISSING platform={platform}: none of [{}] are set \
         (checked demo > testnet > mainnet > generic, in that order)",
        tiers
            .iter()
            .map(|(k, s)| format!("{k}/{s}"))
            .collect::<Vec<_>>()
            .join(", "),
    );
}
