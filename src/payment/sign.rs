//! Gateway MD5 request signing.
//!
//! Scheme: sort parameters by key, drop `sign`/`sign_type` and empty values,
//! join as `k=v&k=v`, append the merchant key, MD5, lowercase hex.

use md5::{Digest, Md5};
use std::collections::BTreeMap;

pub fn generate_sign(params: &BTreeMap<String, String>, merchant_key: &str) -> String {
    let joined = params
        .iter()
        .filter(|(k, v)| k.as_str() != "sign" && k.as_str() != "sign_type" && !v.is_empty())
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(joined.as_bytes());
    hasher.update(merchant_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare the `sign` parameter against a recomputation over the remaining
/// parameters. Case-insensitive on the hex digest.
pub fn verify_sign(params: &BTreeMap<String, String>, merchant_key: &str) -> bool {
    let received = match params.get("sign") {
        Some(sign) if !sign.is_empty() => sign,
        _ => return false,
    };
    let calculated = generate_sign(params, merchant_key);
    received.eq_ignore_ascii_case(&calculated)
}
