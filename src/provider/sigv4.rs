//! AWS Signature Version 4 for JSON-protocol requests
//!
//! Lightsail speaks AWS JSON 1.1: every call is a `POST /` with the
//! operation in `X-Amz-Target`. Only that shape is supported here.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Static AWS credentials
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
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Headers to attach to a signed request
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    /// `(name, value)` pairs, including `Authorization`
    pub headers: Vec<(&'static str, String)>,
}

/// Sign a JSON 1.1 `POST /` request
pub fn sign_json_request(
    credentials: &Credentials,
    region: &str,
    service: &str,
    host: &str,
    target: &str,
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<SignedHeaders> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let content_type = "application/x-amz-json-1.1";

    // Canonical headers must be sorted by lowercase name
    let mut canonical: Vec<(&'static str, String)> = vec![
        ("content-type", content_type.to_string()),
        ("host", host.to_string()),
        ("x-amz-date", amz_date.clone()),
    ];
    if let Some(token) = &credentials.session_token {
        canonical.push(("x-amz-security-token", token.clone()));
    }
    canonical.push(("x-amz-target", target.to_string()));

    let canonical_headers: String = canonical
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();
    let signed_headers = canonical
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "POST\n/\n\n{}\n{}\n{}",
        canonical_headers,
        signed_headers,
        hex_sha256(payload)
    );

    let scope = format!("{}/{}/{}/aws4_request", date, region, service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let key = signing_key(&credentials.secret_access_key, &date, region, service)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, credentials.access_key_id, scope, signed_headers, signature
    );

    let mut headers: Vec<(&'static str, String)> = canonical
        .into_iter()
        .filter(|(k, _)| *k != "host")
        .map(|(k, v)| (header_name(k), v))
        .collect();
    headers.push(("Authorization", authorization));

    Ok(SignedHeaders { headers })
}

/// Derive the per-day signing key
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn header_name(canonical: &'static str) -> &'static str {
    match canonical {
        "content-type" => "Content-Type",
        "x-amz-date" => "X-Amz-Date",
        "x-amz-security-token" => "X-Amz-Security-Token",
        "x-amz-target" => "X-Amz-Target",
        other => other,
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|e| Error::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn creds() -> Credentials {
        Credentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        }
    }

    #[test]
    fn test_signing_key_matches_documented_vector() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_authorization_header_shape() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 0).unwrap();
        let signed = sign_json_request(
            &creds(),
            "us-west-2",
            "lightsail",
            "lightsail.us-west-2.amazonaws.com",
            "Lightsail_20161128.GetInstances",
            b"{}",
            now,
        )
        .unwrap();

        let auth = signed
            .headers
            .iter()
            .find(|(k, _)| *k == "Authorization")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240309/us-west-2/lightsail/aws4_request"
        ));
        assert!(auth.contains("SignedHeaders=content-type;host;x-amz-date;x-amz-target"));

        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);

        let date = signed.headers.iter().find(|(k, _)| *k == "X-Amz-Date").unwrap();
        assert_eq!(date.1, "20240309T123000Z");
        assert!(!signed.headers.iter().any(|(k, _)| *k == "host"));
    }

    #[test]
    fn test_session_token_is_signed() {
        let mut credentials = creds();
        credentials.session_token = Some("token".to_string());
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 0).unwrap();
        let signed = sign_json_request(
            &credentials,
            "us-west-2",
            "lightsail",
            "lightsail.us-west-2.amazonaws.com",
            "Lightsail_20161128.GetRegions",
            b"{}",
            now,
        )
        .unwrap();

        assert!(signed.headers.iter().any(|(k, v)| *k == "X-Amz-Security-Token" && v == "token"));
        let auth = &signed.headers.last().unwrap().1;
        assert!(auth.contains("x-amz-security-token;x-amz-target"));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let sign = |payload: &[u8]| {
            sign_json_request(&creds(), "eu-west-1", "lightsail", "h", "T", payload, now)
                .unwrap()
                .headers
                .last()
                .unwrap()
                .1
                .clone()
        };
        assert_eq!(sign(b"{}"), sign(b"{}"));
        assert_ne!(sign(b"{}"), sign(b"{\"a\":1}"));
    }
}
