//! AWS Signature Version 4 request signing.
//!
//! Used by the object storage sink (service `s3`) and the CloudWatch
//! observer (service `monitoring`).

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};

use crate::error::{InboundError, Result};

/// Everything but RFC 3986 unreserved characters is escaped.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Like [`URI_COMPONENT`], with `/` kept as the path separator.
const URI_PATH: &AsciiSet = &URI_COMPONENT.remove(b'/');

/// Access credentials for AWS-compatible services.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN` from the environment.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let access_key_id = var("AWS_ACCESS_KEY_ID")
            .ok_or_else(|| InboundError::Config("AWS_ACCESS_KEY_ID is not set".into()))?;
        let secret_access_key = var("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| InboundError::Config("AWS_SECRET_ACCESS_KEY is not set".into()))?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: var("AWS_SESSION_TOKEN"),
        })
    }
}

/// The parts of a request that enter the signature.
///
/// `headers` must hold lower-case names, sorted, and include `host`.
#[derive(Debug)]
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub headers: &'a [(&'a str, String)],
    pub payload_hash: &'a str,
}

/// `x-amz-date` value for `now`.
pub fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Lower-case hex SHA-256 of a request payload.
pub fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Build the `Authorization` header value for a request.
pub fn sign_request(
    credentials: &Credentials,
    region: &str,
    service: &str,
    request: &CanonicalRequest<'_>,
    now: DateTime<Utc>,
) -> Result<String> {
    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{date}/{region}/{service}/aws4_request");

    let canonical_headers: String = request
        .headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect();
    let signed_headers = request
        .headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n\n{canonical_headers}\n{signed_headers}\n{}",
        request.method, request.uri, request.payload_hash
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{scope}\n{}",
        amz_date(now),
        payload_hash(canonical_request.as_bytes())
    );

    let secret = format!("AWS4{}", credentials.secret_access_key);
    let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

    Ok(format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope},SignedHeaders={signed_headers},Signature={signature}",
        credentials.access_key_id
    ))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| InboundError::Config(format!("invalid signing key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Percent-encode everything but RFC 3986 unreserved characters.
/// `/` is kept as a separator unless `encode_slash` is set.
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let set = if encode_slash { URI_COMPONENT } else { URI_PATH };
    utf8_percent_encode(input, set).to_string()
}

/// Split `scheme://authority[/...]` into scheme and authority.
pub fn split_scheme(url: &str) -> Result<(&str, &str)> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| InboundError::Config(format!("endpoint '{url}' has no scheme")))?;
    let authority = rest.split('/').next().unwrap_or(rest);
    Ok((scheme, authority))
}
