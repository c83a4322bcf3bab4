//! S3-compatible artifact store using the REST API with AWS Signature
//! V4 authentication.
//!
//! Pure-Rust signing (`hmac` + `sha2`); custom endpoints supported for
//! S3-compatible services (MinIO, LocalStack). Credentials come from the
//! conventional `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` /
//! `AWS_SESSION_TOKEN` environment variables.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use async_trait::async_trait;

use super::{ArtifactStore, ArtifactStoreError};

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

pub struct S3ArtifactStore {
    bucket: String,
    region: String,
    /// Custom endpoint host (MinIO, LocalStack); standard AWS host otherwise.
    endpoint: Option<String>,
    /// Base used to form the returned public URL; defaults to the
    /// virtual-hosted endpoint.
    public_base_url: Option<String>,
    credentials: Option<AwsCredentials>,
    client: reqwest::Client,
}

impl S3ArtifactStore {
    pub fn new(
        bucket: impl Into<String>,
        region: impl Into<String>,
        endpoint: Option<String>,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint,
            public_base_url,
            // Configuration is resolved once here and never re-checked.
            credentials: AwsCredentials::from_env(),
            client: reqwest::Client::new(),
        }
    }

    fn host(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string(),
            None => format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }

    fn public_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => format!("https://{}/{}", self.host(), key),
        }
    }

    /// Sign one request with SigV4 and return the headers to attach.
    fn sign(
        &self,
        method: &str,
        key: &str,
        payload: &[u8],
        extra_headers: &[(&str, &str)],
    ) -> Result<Vec<(String, String)>, ArtifactStoreError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or(ArtifactStoreError::NotConfigured)?;

        let host = self.host();
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(payload);

        let mut headers: Vec<(String, String)> = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        for (name, value) in extra_headers {
            headers.push((name.to_string(), value.to_string()));
        }
        if let Some(token) = &creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();

        let canonical_uri = format!("/{}", uri_encode_path(key));
        let canonical_request = format!(
            "{method}\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &creds.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut out = vec![
            ("Authorization".to_string(), authorization),
            ("x-amz-content-sha256".to_string(), payload_hash),
            ("x-amz-date".to_string(), amz_date),
        ];
        for (name, value) in extra_headers {
            out.push((name.to_string(), value.to_string()));
        }
        if let Some(token) = &creds.session_token {
            out.push(("x-amz-security-token".to_string(), token.clone()));
        }
        Ok(out)
    }

    fn object_url(&self, key: &str) -> String {
        format!("https://{}/{}", self.host(), uri_encode_path(key))
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    fn is_configured(&self) -> bool {
        self.credentials.is_some() && !self.bucket.is_empty()
    }

    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        cache_control: &str,
    ) -> Result<String, ArtifactStoreError> {
        let headers = self.sign(
            "PUT",
            key,
            bytes,
            &[
                ("cache-control", cache_control),
                ("content-type", content_type),
            ],
        )?;

        let mut request = self.client.put(self.object_url(key)).body(bytes.to_vec());
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ArtifactStoreError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ArtifactStoreError::Status(response.status().as_u16()));
        }

        Ok(self.public_url(key))
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, ArtifactStoreError> {
        let headers = self.sign("GET", key, b"", &[])?;

        let mut request = self.client.get(self.object_url(key));
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ArtifactStoreError::Request(e.to_string()))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ArtifactStoreError::Status(response.status().as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ArtifactStoreError::Request(e.to_string()))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<(), ArtifactStoreError> {
        let headers = self.sign("DELETE", key, b"", &[])?;

        let mut request = self.client.delete(self.object_url(key));
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ArtifactStoreError::Request(e.to_string()))?;
        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(ArtifactStoreError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the SigV4 signing key chain:
/// `HMAC("AWS4"+secret, date) -> region -> service -> "aws4_request"`.
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding per path segment; slashes are kept.
fn uri_encode_path(key: &str) -> String {
    key.split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_key_derivation_is_deterministic() {
        let a = derive_signing_key("secret", "20260101", "us-east-1", "s3");
        let b = derive_signing_key("secret", "20260101", "us-east-1", "s3");
        assert_eq!(a, b);
        let c = derive_signing_key("secret", "20260102", "us-east-1", "s3");
        assert_ne!(a, c);
    }

    #[test]
    fn uri_encoding_keeps_path_slashes() {
        assert_eq!(uri_encode_path("docs/abc-123"), "docs/abc-123");
        assert_eq!(uri_encode_path("docs/a b"), "docs/a%20b");
        assert_eq!(uri_encode("a+b"), "a%2Bb");
    }

    #[test]
    fn public_url_prefers_the_configured_base() {
        let store = S3ArtifactStore::new(
            "acme-docs",
            "us-east-1",
            None,
            Some("https://cdn.example.com/".to_string()),
        );
        assert_eq!(
            store.public_url("docs/abc"),
            "https://cdn.example.com/docs/abc"
        );

        let bare = S3ArtifactStore::new("acme-docs", "us-east-1", None, None);
        assert_eq!(
            bare.public_url("docs/abc"),
            "https://acme-docs.s3.us-east-1.amazonaws.com/docs/abc"
        );
    }

    #[test]
    fn custom_endpoint_overrides_the_host() {
        let store = S3ArtifactStore::new(
            "acme-docs",
            "us-east-1",
            Some("http://localhost:9000".to_string()),
            None,
        );
        assert_eq!(store.host(), "localhost:9000");
    }
}
