//! Masked configuration report for operators.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use jersey_core::geometry::Tier;
use secrecy::{ExposeSecret, SecretString};

use crate::state::SharedState;

/// Shown in place of an unset value.
pub const MISSING: &str = "MISSING";

const MASK_PREFIX_CHARS: usize = 6;
const MASK_SUFFIX_CHARS: usize = 4;

/// Masks a secret as `<first 6>…<last 4>`.
///
/// Values too short to hide anything behind the ellipsis collapse to `…`.
#[must_use]
pub fn mask(value: Option<&str>) -> String {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return MISSING.to_string();
    };
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= MASK_PREFIX_CHARS + MASK_SUFFIX_CHARS {
        return "…".to_string();
    }
    let head: String = chars[..MASK_PREFIX_CHARS].iter().collect();
    let tail: String = chars[chars.len() - MASK_SUFFIX_CHARS..].iter().collect();
    format!("{head}…{tail}")
}

fn mask_secret(secret: Option<&SecretString>) -> String {
    mask(secret.map(ExposeSecret::expose_secret))
}

/// Builds the diagnostics report. Keys are environment variable names for
/// secrets and dotted config paths for everything else.
#[must_use]
pub fn report(state: &SharedState) -> BTreeMap<String, String> {
    let config = &state.config;
    let mut out = BTreeMap::new();
    out.insert(
        config.payment.secret_key_env.clone(),
        mask_secret(state.secrets.gateway_key.as_ref()),
    );
    out.insert(
        config.payment.webhook_secret_env.clone(),
        mask_secret(state.secrets.webhook_secret.as_ref()),
    );
    out.insert(
        config.admin.token_env.clone(),
        mask_secret(state.secrets.admin_token.as_ref()),
    );
    out.insert("server.public_url".to_string(), config.server.public_url.clone());
    out.insert("payment.gateway".to_string(), state.gateway.name().to_string());
    out.insert("payment.currency".to_string(), config.payment.currency.clone());
    for tier in Tier::ALL {
        out.insert(
            format!("tiers.{tier}.price_id"),
            config
                .tiers
                .spec(tier)
                .price_id
                .clone()
                .unwrap_or_else(|| MISSING.to_string()),
        );
    }
    out.insert(
        "store.path".to_string(),
        config.store.path.display().to_string(),
    );
    out.insert("started_at".to_string(), state.started_at.to_rfc3339());
    out
}

/// `GET /api/debug-env`.
pub async fn debug_env(State(state): State<SharedState>) -> Json<BTreeMap<String, String>> {
    Json(report(&state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_missing_and_empty() {
        assert_eq!(mask(None), MISSING);
        assert_eq!(mask(Some("")), MISSING);
    }

    #[test]
    fn test_mask_keeps_prefix_and_suffix() {
        assert_eq!(mask(Some("sk_test_51Habcdefwxyz")), "sk_tes…wxyz");
    }

    #[test]
    fn test_mask_short_value_hides_everything() {
        assert_eq!(mask(Some("0123456789")), "…");
        assert_eq!(mask(Some("abc")), "…");
    }

    #[test]
    fn test_mask_counts_characters_not_bytes() {
        assert_eq!(mask(Some("ééééééXXXXXXüüüü")), "éééééé…üüüü");
    }
}
