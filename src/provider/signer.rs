//! OCI API request signing (draft-cavage HTTP signatures, `rsa-sha256`).

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::{Digest, Sha256};

use crate::error::ProviderError;

/// Headers signed on every request, in order.
const BASE_HEADERS: &[&str] = &["date", "(request-target)", "host"];
/// Additional headers signed on requests with a body.
const BODY_HEADERS: &[&str] = &["content-length", "content-type", "x-content-sha256"];

/// Signs requests for one API key.
pub struct RequestSigner {
    key_id: String,
    key: SigningKey<Sha256>,
}

impl RequestSigner {
    /// `key_id` is `{tenancy}/{user}/{fingerprint}`.
    pub fn from_pem(key_id: String, pem: &str) -> Result<Self, ProviderError> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| ProviderError::KeyLoad {
                path: key_id.clone(),
                reason: format!("not an unencrypted PKCS#8 or PKCS#1 RSA key: {e}"),
            })?;
        Ok(Self::from_key(key_id, private))
    }

    pub fn from_file(key_id: String, path: &Path) -> Result<Self, ProviderError> {
        let pem = std::fs::read_to_string(path).map_err(|e| ProviderError::KeyLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_pem(key_id, &pem).map_err(|e| match e {
            ProviderError::KeyLoad { reason, .. } => ProviderError::KeyLoad {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_key(key_id: String, key: RsaPrivateKey) -> Self {
        Self {
            key_id,
            key: SigningKey::<Sha256>::new(key),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Build the `Authorization` header value.
    ///
    /// `headers` must contain every name returned by [`signed_header_names`]
    /// for this request, lowercase, except `(request-target)`.
    pub fn authorization(
        &self,
        method: &str,
        path_and_query: &str,
        headers: &[(&str, &str)],
        has_body: bool,
    ) -> String {
        let names = signed_header_names(has_body);
        let signing_string = signing_string(method, path_and_query, headers, &names);
        let signature = self.key.sign(signing_string.as_bytes());
        format!(
            "Signature version=\"1\",keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            names.join(" "),
            BASE64.encode(signature.to_bytes())
        )
    }
}

/// Header names covered by the signature.
pub fn signed_header_names(has_body: bool) -> Vec<&'static str> {
    let mut names = BASE_HEADERS.to_vec();
    if has_body {
        names.extend_from_slice(BODY_HEADERS);
    }
    names
}

/// The string that gets signed: one `name: value` line per signed header.
pub fn signing_string(
    method: &str,
    path_and_query: &str,
    headers: &[(&str, &str)],
    names: &[&str],
) -> String {
    names
        .iter()
        .map(|name| {
            let value = if *name == "(request-target)" {
                format!("{} {}", method.to_ascii_lowercase(), path_and_query)
            } else {
                headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_default()
            };
            format!("{name}: {value}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Base64 SHA-256 of a request body, for `x-content-sha256`.
pub fn content_sha256(body: &[u8]) -> String {
    BASE64.encode(Sha256::digest(body))
}

/// RFC 7231 date for the `date` header.
pub fn http_date(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::signature::Verifier;

    #[test]
    fn signing_string_for_get() {
        let headers = [
            ("date", "Thu, 05 Jan 2014 21:31:40 GMT"),
            ("host", "iaas.us-phoenix-1.oraclecloud.com"),
        ];
        let s = signing_string(
            "GET",
            "/20160918/publicIps/ocid1.publicip.x",
            &headers,
            &signed_header_names(false),
        );
        assert_eq!(
            s,
            "date: Thu, 05 Jan 2014 21:31:40 GMT\n\
             (request-target): get /20160918/publicIps/ocid1.publicip.x\n\
             host: iaas.us-phoenix-1.oraclecloud.com"
        );
    }

    #[test]
    fn signing_string_for_post_includes_body_headers() {
        let headers = [
            ("date", "Thu, 05 Jan 2014 21:31:40 GMT"),
            ("host", "iaas.us-phoenix-1.oraclecloud.com"),
            ("content-length", "2"),
            ("content-type", "application/json"),
            ("x-content-sha256", "RBNvo1WzZ4oRRq0W9+hknpT7T8If536DEMBg9hyq/4o="),
        ];
        let s = signing_string("POST", "/20160918/publicIps", &headers, &signed_header_names(true));
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[1], "(request-target): post /20160918/publicIps");
        assert_eq!(lines[5], "x-content-sha256: RBNvo1WzZ4oRRq0W9+hknpT7T8If536DEMBg9hyq/4o=");
    }

    #[test]
    fn body_digest_and_date_format() {
        assert_eq!(
            content_sha256(b"{}"),
            "RBNvo1WzZ4oRRq0W9+hknpT7T8If536DEMBg9hyq/4o="
        );
        let when = chrono::Utc.with_ymd_and_hms(2014, 1, 5, 21, 31, 40).unwrap();
        assert_eq!(http_date(when), "Sun, 05 Jan 2014 21:31:40 GMT");
    }

    #[test]
    fn authorization_header_verifies() {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = key.to_public_key();
        let signer = RequestSigner::from_key("t/u/aa:bb".to_string(), key);

        let headers = [("date", "Sun, 05 Jan 2014 21:31:40 GMT"), ("host", "h")];
        let auth = signer.authorization("DELETE", "/20160918/publicIps/x", &headers, false);
        assert!(auth.starts_with("Signature version=\"1\",keyId=\"t/u/aa:bb\""));
        assert!(auth.contains("headers=\"date (request-target) host\""));

        let encoded = auth
            .rsplit("signature=\"")
            .next()
            .unwrap()
            .trim_end_matches('"');
        let bytes = BASE64.decode(encoded).unwrap();
        let signature = Signature::try_from(bytes.as_slice()).unwrap();
        let expected = signing_string(
            "DELETE",
            "/20160918/publicIps/x",
            &headers,
            &signed_header_names(false),
        );
        VerifyingKey::<Sha256>::new(public)
            .verify(expected.as_bytes(), &signature)
            .unwrap();
    }

    #[test]
    fn rejects_garbage_pem() {
        assert!(matches!(
            RequestSigner::from_pem("k".to_string(), "not a key"),
            Err(ProviderError::KeyLoad { .. })
        ));
    }
}
