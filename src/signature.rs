//! Signing of provider request parameters.
//!
//! Canonical input: every key except `signature`, sorted byte-wise, each
//! rendered as `key:value,` and concatenated. Strings go in verbatim,
//! numbers in their shortest decimal form, null as the empty string and
//! nested values as compact JSON. The MAC is HMAC-SHA256 over that input,
//! base64 encoded with padding.
//!
//! Values are not escaped, so text can shift between adjacent fields (say
//! `user_full_name` and `user_mailing_address`) without changing the signed
//! bytes. Providers verify this exact form, so it stays as is.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::{
    error::{CreditError, CreditResult},
    models::SharedSecret,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_FIELD: &str = "signature";

pub fn canonical_message(parameters: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> =
        parameters.keys().filter(|k| k.as_str() != SIGNATURE_FIELD).collect();
    keys.sort();

    let mut message = String::new();
    for key in keys {
        message.push_str(key);
        message.push(':');
        match &parameters[key.as_str()] {
            Value::String(s) => message.push_str(s),
            Value::Null => {}
            other => message.push_str(&other.to_string()),
        }
        message.push(',');
    }
    message
}

fn mac_for(parameters: &Map<String, Value>, secret: &SharedSecret) -> CreditResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CreditError::ProviderNotConfigured(e.to_string()))?;
    mac.update(canonical_message(parameters).as_bytes());
    Ok(mac)
}

pub fn sign(parameters: &Map<String, Value>, secret: &SharedSecret) -> CreditResult<String> {
    let mac = mac_for(parameters, secret)?;
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of `signature` against the canonical form of `parameters`.
pub fn verify(parameters: &Map<String, Value>, secret: &SharedSecret, signature: &str) -> bool {
    let Ok(expected) = STANDARD.decode(signature) else {
        return false;
    };
    match mac_for(parameters, secret) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}
