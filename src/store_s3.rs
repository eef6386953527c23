//! Amazon S3 object store.
//!
//! Implements [`ObjectStore`] with the S3 REST API and AWS Signature V4
//! authentication. Listing follows `ListObjectsV2` continuation tokens, and
//! read URLs are SigV4 presigned GETs.
//!
//! # Configuration
//!
//! ```toml
//! [store]
//! bucket = "acme-archive"
//! region = "us-east-2"
//! root = "users"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! # Environment Variables
//!
//! Credentials are read from environment variables:
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)
//!
//! # Addressing
//!
//! On AWS, requests use virtual-hosted style
//! (`<bucket>.s3.<region>.amazonaws.com/<key>`). With a custom
//! `endpoint_url`, requests use path style (`<endpoint>/<bucket>/<key>`),
//! which is what MinIO and LocalStack expect.
//!
//! # Error Classification
//!
//! | Condition | [`StoreError`] |
//! |-----------|----------------|
//! | Network error, HTTP 429, 500, 502, 503, 504 | `Transient` |
//! | HTTP 404 | `NotFound` |
//! | Any other non-success status | `Permanent` |
//! | HEAD answer without a usable `Content-Length` | `Permanent` |

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::models::ObjectInfo;
use crate::sigv4::{self, AwsCredentials, SigningRequest};
use crate::traits::ObjectStore;

/// An S3 bucket accessed through signed REST calls.
pub struct S3ObjectStore {
    bucket: String,
    region: String,
    scheme: String,
    host: String,
    path_style: bool,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3ObjectStore {
    /// Create a store from configuration, reading credentials from the
    /// environment.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::new(config, AwsCredentials::from_env()?)
    }

    pub fn new(config: &StoreConfig, creds: AwsCredentials) -> Result<Self> {
        let (scheme, host, path_style) = match config.endpoint_url {
            Some(ref endpoint) => {
                let (scheme, rest) = match endpoint.split_once("://") {
                    Some((scheme, rest)) => (scheme.to_string(), rest),
                    None => ("https".to_string(), endpoint.as_str()),
                };
                (scheme, rest.trim_end_matches('/').to_string(), true)
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", config.bucket, config.region),
                false,
            ),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            scheme,
            host,
            path_style,
            creds,
            client,
        })
    }

    /// Canonical URI of an object (or of the bucket when `key` is empty).
    fn canonical_uri(&self, key: &str) -> String {
        let encoded = sigv4::encode_key_path(key);
        if self.path_style {
            format!("/{}/{}", sigv4::uri_encode(&self.bucket), encoded)
        } else {
            format!("/{}", encoded)
        }
    }

    /// Send a signed request and classify failures.
    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(String, String)],
        body: Option<(Vec<u8>, &str)>,
    ) -> Result<reqwest::Response, StoreError> {
        let canonical_uri = self.canonical_uri(key);
        let payload_hash = match body {
            Some((ref bytes, _)) => sigv4::hex_sha256(bytes),
            None => sigv4::hex_sha256(b""),
        };
        let extra_headers: Vec<(String, String)> = match body {
            Some((_, content_type)) => vec![("content-type".to_string(), content_type.to_string())],
            None => Vec::new(),
        };

        let signed = sigv4::sign_request(
            &self.creds,
            &SigningRequest {
                method: method.as_str(),
                host: &self.host,
                canonical_uri: &canonical_uri,
                query,
                headers: &extra_headers,
                payload_hash: &payload_hash,
                region: &self.region,
                service: "s3",
                time: Utc::now(),
            },
        );

        let mut url = format!("{}://{}{}", self.scheme, self.host, canonical_uri);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&sigv4::canonical_query(query));
        }

        let mut req_builder = self.client.request(method.clone(), &url);
        for (name, value) in signed.iter().chain(extra_headers.iter()) {
            req_builder = req_builder.header(name.as_str(), value.as_str());
        }
        if let Some((bytes, _)) = body {
            req_builder = req_builder.body(bytes);
        }

        debug!(%method, key, "s3 request");
        let resp = req_builder.send().await.map_err(|e| {
            StoreError::Transient(format!(
                "{} s3://{}/{} failed: {}",
                method, self.bucket, key, e
            ))
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status, &self.bucket, key, &body))
    }
}

/// Object size from a HEAD answer. A missing or garbled length is an error,
/// not an empty object.
fn content_length(
    headers: &reqwest::header::HeaderMap,
    bucket: &str,
    key: &str,
) -> Result<u64, StoreError> {
    headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            StoreError::Permanent(format!(
                "HEAD s3://{}/{}: missing or invalid Content-Length",
                bucket, key
            ))
        })
}

fn classify_status(status: StatusCode, bucket: &str, key: &str, body: &str) -> StoreError {
    let detail = format!(
        "HTTP {} for s3://{}/{}: {}",
        status,
        bucket,
        key,
        body.chars().take(300).collect::<String>()
    );
    match status.as_u16() {
        404 => StoreError::NotFound(format!("s3://{}/{}", bucket, key)),
        429 | 500 | 502 | 503 | 504 => StoreError::Transient(detail),
        _ => StoreError::Permanent(detail),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !prefix.is_empty() {
                query.push(("prefix".to_string(), prefix.to_string()));
            }
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self.send(Method::GET, "", &query, None).await?;
            let xml = resp
                .text()
                .await
                .map_err(|e| StoreError::Transient(format!("reading list response: {}", e)))?;
            let page = parse_list_objects_response(&xml)
                .map_err(|e| StoreError::Permanent(format!("bad ListObjectsV2 response: {}", e)))?;
            objects.extend(page.objects);

            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo, StoreError> {
        let resp = self.send(Method::HEAD, key, &[], None).await?;
        let size = content_length(resp.headers(), &self.bucket, key)?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let resp = self.send(Method::GET, key, &[], None).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StoreError::Transient(format!("reading s3://{}/{}: {}", self.bucket, key, e)))?;
        Ok(bytes.to_vec())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        self.send(Method::PUT, key, &[], Some((bytes, content_type)))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.send(Method::DELETE, key, &[], None).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn signed_read_url(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError> {
        let canonical_uri = self.canonical_uri(key);
        let query = sigv4::presign_query(
            &self.creds,
            &self.host,
            &canonical_uri,
            &self.region,
            "s3",
            ttl.as_secs(),
            Utc::now(),
        );
        Ok(Some(format!(
            "{}://{}{}?{}",
            self.scheme, self.host, canonical_uri, query
        )))
    }
}

// ============ XML Parsing ============

/// One page of a `ListObjectsV2` response.
#[derive(Debug, Default)]
struct ListPage {
    objects: Vec<ObjectInfo>,
    is_truncated: bool,
    next_token: Option<String>,
}

/// Parse a `ListObjectsV2` XML response.
///
/// Directory-marker keys (ending in `/`) are skipped.
fn parse_list_objects_response(xml: &str) -> Result<ListPage, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListPage::default();
    let mut path: Vec<String> = Vec::new();
    let mut key = String::new();
    let mut size = 0u64;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                if path.last().map(String::as_str) == Some("Contents") {
                    key.clear();
                    size = 0;
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map(|s| s.into_owned()).unwrap_or_default();
                let parent = path.len().checked_sub(2).and_then(|i| path.get(i));
                match (parent.map(String::as_str), path.last().map(String::as_str)) {
                    (Some("Contents"), Some("Key")) => key = text,
                    (Some("Contents"), Some("Size")) => size = text.parse().unwrap_or(0),
                    (Some("ListBucketResult"), Some("IsTruncated")) => {
                        page.is_truncated = text == "true"
                    }
                    (Some("ListBucketResult"), Some("NextContinuationToken")) => {
                        page.next_token = Some(text)
                    }
                    _ => {}
                }
            }
            Event::End(_) => {
                if path.pop().as_deref() == Some("Contents") && !key.is_empty() && !key.ends_with('/')
                {
                    page.objects.push(ObjectInfo {
                        key: std::mem::take(&mut key),
                        size,
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(page)
}
