//! Request signing for the QingCloud IaaS API.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::Sha256;

use crate::storage::ProviderError;

/// Characters left unescaped: RFC 3986 unreserved.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encodes a query key or value.
pub(crate) fn escape(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ESCAPE).to_string()
}

/// Joins parameters sorted by key as `key=value` pairs.
pub(crate) fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", escape(key), escape(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Returns the base64 HMAC-SHA256 signature of `GET\n<path>\n<query>`.
pub(crate) fn sign(secret: &str, path: &str, query: &str) -> Result<String, ProviderError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|err| ProviderError::transport(format!("invalid signing key: {err}")))?;
    mac.update(format!("GET\n{path}\n{query}").as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}
