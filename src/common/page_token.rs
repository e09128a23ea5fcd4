// src/common/page_token.rs

use base64::{DecodeError, Engine, engine::general_purpose};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::item::ITEM_KEY_PREFIX;

const TOKEN_VERSION: u8 = 1;

/// What a listing token carries: the tenant it was minted for and the sort
/// key of the last record evaluated.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct TokenBody {
    v: u8,
    tenant: i64,
    sk: String,
}

#[derive(Debug, Error)]
pub enum PageTokenError {
    #[error(transparent)]
    Base64(#[from] DecodeError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("unsupported token version {0}")]
    Version(u8),
    #[error("token was issued for another tenant")]
    WrongTenant,
    #[error("token does not point at an item")]
    NotAnItem,
}

pub fn encode(tenant_id: i64, sk: &str) -> String {
    let body = TokenBody {
        v: TOKEN_VERSION,
        tenant: tenant_id,
        sk: sk.to_owned(),
    };
    // Serializing a struct of plain fields cannot fail.
    let json = serde_json::to_vec(&body).unwrap_or_default();
    general_purpose::STANDARD.encode(json)
}

/// Returns the sort key to resume after.
pub fn decode(token: &str, tenant_id: i64) -> Result<String, PageTokenError> {
    let bytes = general_purpose::STANDARD.decode(token)?;
    let body: TokenBody = serde_json::from_slice(&bytes)?;

    if body.v != TOKEN_VERSION {
        return Err(PageTokenError::Version(body.v));
    }
    if body.tenant != tenant_id {
        return Err(PageTokenError::WrongTenant);
    }
    if !body.sk.starts_with(ITEM_KEY_PREFIX) {
        return Err(PageTokenError::NotAnItem);
    }
    Ok(body.sk)
}
