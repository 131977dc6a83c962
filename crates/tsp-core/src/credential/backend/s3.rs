//! S3-compatible object storage backend
//!
//! Talks to any S3 API (AWS, MinIO, R2, ...) with path-style URLs and AWS
//! Signature Version 4. Each credential is one object, and a single
//! `PutObject` replaces it atomically.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use regex::Regex;
use reqwest::{Client, Method, StatusCode, Url};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::ObjectBackend;
use crate::credential::error::{StoreError, StoreResult};

type HmacSha256 = Hmac<Sha256>;

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Key>([^<]*)</Key>").expect("key regex"));
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<NextContinuationToken>([^<]*)</NextContinuationToken>").expect("token regex")
});

const OBJECT_SUFFIX: &str = ".json";

/// Connection settings for an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// e.g. `https://s3.eu-central-1.amazonaws.com` or `http://minio:9000`
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Key prefix ("folder") for credential objects
    pub prefix: String,
}

/// AWS Signature Version 4 signer for the `s3` service
#[derive(Clone)]
pub struct SigV4Signer {
    access_key_id: String,
    secret_access_key: String,
    region: String,
}

impl SigV4Signer {
    pub fn new(access_key_id: &str, secret_access_key: &str, region: &str) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            region: region.to_string(),
        }
    }

    fn hmac(key: &[u8], data: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(data.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// `YYYYMMDD` prefix of an `x-amz-date` timestamp
    fn date_stamp(amz_date: &str) -> &str {
        amz_date.get(..8).unwrap_or(amz_date)
    }

    fn scope(&self, date: &str) -> String {
        format!("{}/{}/s3/aws4_request", date, self.region)
    }

    /// Hex signature over a request.
    ///
    /// `headers` must use lowercase names and contain every header to sign,
    /// including `host` and `x-amz-date`.
    pub fn signature(
        &self,
        method: &str,
        canonical_uri: &str,
        canonical_query: &str,
        headers: &BTreeMap<String, String>,
        payload_hash: &str,
        amz_date: &str,
    ) -> String {
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let signed_headers = Self::signed_headers(headers);

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let date = Self::date_stamp(amz_date);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            self.scope(date),
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = Self::hmac(format!("AWS4{}", self.secret_access_key).as_bytes(), date);
        let k_region = Self::hmac(&k_date, &self.region);
        let k_service = Self::hmac(&k_region, "s3");
        let k_signing = Self::hmac(&k_service, "aws4_request");

        hex::encode(Self::hmac(&k_signing, &string_to_sign))
    }

    /// Value of the `Authorization` header
    pub fn authorization(
        &self,
        method: &str,
        canonical_uri: &str,
        canonical_query: &str,
        headers: &BTreeMap<String, String>,
        payload_hash: &str,
        amz_date: &str,
    ) -> String {
        let signature = self.signature(
            method,
            canonical_uri,
            canonical_query,
            headers,
            payload_hash,
            amz_date,
        );
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
            self.access_key_id,
            self.scope(Self::date_stamp(amz_date)),
            Self::signed_headers(headers),
            signature
        )
    }

    fn signed_headers(headers: &BTreeMap<String, String>) -> String {
        headers.keys().cloned().collect::<Vec<_>>().join(";")
    }
}

/// RFC 3986 encoding as SigV4 expects it
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// S3 object backend
pub struct S3Backend {
    client: Client,
    signer: SigV4Signer,
    endpoint: Url,
    bucket: String,
    prefix: String,
}

impl S3Backend {
    pub fn new(settings: S3Settings) -> StoreResult<Self> {
        let endpoint = Url::parse(settings.endpoint.trim_end_matches('/')).map_err(|e| {
            StoreError::ObjectStorage(format!("invalid endpoint {}: {}", settings.endpoint, e))
        })?;
        if endpoint.host_str().is_none() {
            return Err(StoreError::ObjectStorage(format!(
                "endpoint {} has no host",
                settings.endpoint
            )));
        }
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            signer: SigV4Signer::new(
                &settings.access_key_id,
                &settings.secret_access_key,
                &settings.region,
            ),
            endpoint,
            bucket: settings.bucket,
            prefix: settings.prefix.trim_matches('/').to_string(),
        })
    }

    fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}{}", key, OBJECT_SUFFIX)
        } else {
            format!("{}/{}{}", self.prefix, key, OBJECT_SUFFIX)
        }
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Path under the endpoint, e.g. `/bucket/prefix/u1.json`
    fn canonical_uri(&self, object_key: Option<&str>) -> String {
        let base = self.endpoint.path().trim_end_matches('/');
        match object_key {
            Some(key) => format!("{}/{}/{}", base, uri_encode(&self.bucket, true), uri_encode(key, false)),
            None => format!("{}/{}", base, uri_encode(&self.bucket, true)),
        }
    }

    async fn send(
        &self,
        method: Method,
        object_key: Option<&str>,
        query: &[(&str, &str)],
        body: Vec<u8>,
    ) -> StoreResult<reqwest::Response> {
        let canonical_uri = self.canonical_uri(object_key);

        let mut sorted: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
            .collect();
        sorted.sort();
        let canonical_query = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex::encode(Sha256::digest(&body));
        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), self.host());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), amz_date.clone());

        let authorization = self.signer.authorization(
            method.as_str(),
            &canonical_uri,
            &canonical_query,
            &headers,
            &payload_hash,
            &amz_date,
        );

        let mut url = self.endpoint.clone();
        url.set_path(&canonical_uri);
        url.set_query(if canonical_query.is_empty() {
            None
        } else {
            Some(&canonical_query)
        });

        debug!("s3: {} {}", method, url.path());

        let response = self
            .client
            .request(method, url)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date)
            .header("authorization", authorization)
            .body(body)
            .send()
            .await?;
        Ok(response)
    }

    async fn error_for(context: &str, response: reqwest::Response) -> StoreError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        warn!("s3: {} failed with {}", context, status);
        StoreError::ObjectStorage(format!("{} failed: {} {}", context, status, text.trim()))
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let object_key = self.object_key(key);
        let response = self.send(Method::PUT, Some(&object_key), &[], bytes).await?;
        if !response.status().is_success() {
            return Err(Self::error_for("PutObject", response).await);
        }
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let object_key = self.object_key(key);
        let response = self.send(Method::GET, Some(&object_key), &[], Vec::new()).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            _ => Err(Self::error_for("GetObject", response).await),
        }
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        let object_key = self.object_key(key);
        let response = self
            .send(Method::DELETE, Some(&object_key), &[], Vec::new())
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            _ => Err(Self::error_for("DeleteObject", response).await),
        }
    }

    async fn list_keys(&self) -> StoreResult<Vec<String>> {
        let list_prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };

        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query = vec![("list-type", "2"), ("prefix", list_prefix.as_str())];
            if let Some(t) = token.as_deref() {
                query.push(("continuation-token", t));
            }
            let response = self.send(Method::GET, None, &query, Vec::new()).await?;
            if !response.status().is_success() {
                return Err(Self::error_for("ListObjectsV2", response).await);
            }
            let body = response.text().await?;

            keys.extend(
                KEY_RE
                    .captures_iter(&body)
                    .filter_map(|c| c.get(1))
                    .filter_map(|m| {
                        m.as_str()
                            .strip_prefix(list_prefix.as_str())
                            .and_then(|k| k.strip_suffix(OBJECT_SUFFIX))
                            .map(str::to_string)
                    }),
            );

            token = if body.contains("<IsTruncated>true</IsTruncated>") {
                TOKEN_RE
                    .captures(&body)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
            } else {
                None
            };
            if token.is_none() {
                break;
            }
        }
        Ok(keys)
    }
}
