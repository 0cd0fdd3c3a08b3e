//! Account identity lookup
//!
//! Tokens alone don't say which account they belong to. The decode endpoint
//! returns the profile behind an access token; its `customer_id` is the key
//! the session store is indexed by.

use serde::Deserialize;
use serde_json::Value;

use crate::endpoints::AuthEndpoints;
use crate::error::{Error, Result};

/// The account an access token was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    pub account_id: String,
}

#[derive(Deserialize)]
struct DecodeResponse {
    usr: DecodeUser,
}

#[derive(Deserialize)]
struct DecodeUser {
    customer_id: Value,
}

/// Resolve the account behind `access_token`.
pub async fn decode_account(
    client: &reqwest::Client,
    endpoints: &AuthEndpoints,
    access_token: &str,
) -> Result<AccountIdentity> {
    let response = client
        .get(&endpoints.decode_url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| Error::Http(format!("decode request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Identity(format!("decode endpoint returned {status}")));
    }

    let decoded = response
        .json::<DecodeResponse>()
        .await
        .map_err(|e| Error::Identity(format!("invalid decode response: {e}")))?;

    // customer_id arrives as a number or a string depending on the account age
    let account_id = match decoded.usr.customer_id {
        Value::String(s) if !s.is_empty() => s,
        Value::Number(n) => n.to_string(),
        other => {
            return Err(Error::Identity(format!("unusable customer_id: {other}")));
        }
    };

    Ok(AccountIdentity { account_id })
}
