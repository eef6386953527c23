//! Amazon Textract OCR backend.
//!
//! Implements [`OcrBackend`] with the asynchronous text-detection API:
//! `StartDocumentTextDetection` to submit a stored document and
//! `GetDocumentTextDetection` to poll and page through results. Requests are
//! SigV4-signed JSON 1.1 POSTs, so no AWS SDK is needed.
//!
//! # Status Mapping
//!
//! | Textract `JobStatus` | [`JobStatus`] |
//! |----------------------|---------------|
//! | `IN_PROGRESS` | `Running` |
//! | `SUCCEEDED`, `PARTIAL_SUCCESS` | `Succeeded` |
//! | `FAILED` | `Failed` |
//!
//! Throttling exceptions, network errors and 5xx answers are reported as
//! [`OcrError::Transient`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::{ExtractionConfig, StoreConfig};
use crate::error::OcrError;
use crate::models::{Block, BlockKind, JobHandle, JobStatus, ResultPage};
use crate::sigv4::{self, AwsCredentials, SigningRequest};
use crate::traits::OcrBackend;

/// Largest page Textract returns per `GetDocumentTextDetection` call.
const MAX_RESULTS: u32 = 1000;

/// Textract client bound to the bucket the documents live in.
pub struct TextractBackend {
    bucket: String,
    region: String,
    scheme: String,
    host: String,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl TextractBackend {
    pub fn from_config(store: &StoreConfig, extraction: &ExtractionConfig) -> Result<Self> {
        Self::new(store, extraction, AwsCredentials::from_env()?)
    }

    pub fn new(
        store: &StoreConfig,
        extraction: &ExtractionConfig,
        creds: AwsCredentials,
    ) -> Result<Self> {
        let region = extraction
            .region
            .clone()
            .unwrap_or_else(|| store.region.clone());
        let (scheme, host) = match extraction.endpoint_url {
            Some(ref endpoint) => match endpoint.split_once("://") {
                Some((scheme, rest)) => (scheme.to_string(), rest.trim_end_matches('/').to_string()),
                None => ("https".to_string(), endpoint.trim_end_matches('/').to_string()),
            },
            None => ("https".to_string(), format!("textract.{}.amazonaws.com", region)),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(store.request_timeout_secs))
            .build()?;
        Ok(Self {
            bucket: store.bucket.clone(),
            region,
            scheme,
            host,
            creds,
            client,
        })
    }

    /// POST one Textract operation and decode its JSON answer.
    async fn call<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        operation: &str,
        request: &Req,
    ) -> Result<Resp, OcrError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| OcrError::Malformed(format!("encoding {}: {}", operation, e)))?;
        let target = format!("Textract.{}", operation);
        let extra_headers = vec![
            (
                "content-type".to_string(),
                "application/x-amz-json-1.1".to_string(),
            ),
            ("x-amz-target".to_string(), target),
        ];
        let payload_hash = sigv4::hex_sha256(&body);
        let signed = sigv4::sign_request(
            &self.creds,
            &SigningRequest {
                method: "POST",
                host: &self.host,
                canonical_uri: "/",
                query: &[],
                headers: &extra_headers,
                payload_hash: &payload_hash,
                region: &self.region,
                service: "textract",
                time: Utc::now(),
            },
        );

        let mut req_builder = self
            .client
            .post(format!("{}://{}/", self.scheme, self.host))
            .body(body);
        for (name, value) in signed.iter().chain(extra_headers.iter()) {
            req_builder = req_builder.header(name.as_str(), value.as_str());
        }

        let resp = req_builder
            .send()
            .await
            .map_err(|e| OcrError::Transient(format!("{} request failed: {}", operation, e)))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| OcrError::Transient(format!("reading {} response: {}", operation, e)))?;

        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| OcrError::Malformed(format!("decoding {} response: {}", operation, e)))
    }

    async fn get_detection(
        &self,
        job: &JobHandle,
        max_results: u32,
        next_token: Option<&str>,
    ) -> Result<GetDetectionResponse, OcrError> {
        self.call(
            "GetDocumentTextDetection",
            &GetDetectionRequest {
                job_id: job.as_str(),
                max_results,
                next_token,
            },
        )
        .await
    }
}

/// Map a non-success answer to an [`OcrError`].
fn classify_failure(status: u16, body: &str) -> OcrError {
    let parsed: Option<AwsErrorBody> = serde_json::from_str(body).ok();
    let kind = parsed
        .as_ref()
        .and_then(|b| b.kind.as_deref())
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_default();
    let message = parsed
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.chars().take(300).collect());
    let detail = format!("HTTP {} {}: {}", status, kind, message);

    let throttled = matches!(
        kind.as_str(),
        "ThrottlingException"
            | "ProvisionedThroughputExceededException"
            | "LimitExceededException"
            | "InternalServerError"
    );
    if throttled || status == 429 || status >= 500 {
        OcrError::Transient(detail)
    } else {
        OcrError::Rejected(detail)
    }
}

#[async_trait]
impl OcrBackend for TextractBackend {
    fn name(&self) -> &str {
        "textract"
    }

    async fn submit(&self, key: &str, request_token: &str) -> Result<JobHandle, OcrError> {
        let request = StartDetectionRequest {
            document_location: DocumentLocation {
                s3_object: S3ObjectRef {
                    bucket: &self.bucket,
                    name: key,
                },
            },
            client_request_token: request_token,
        };
        let resp: StartDetectionResponse = self.call("StartDocumentTextDetection", &request).await?;
        debug!(key, job = %resp.job_id, "textract job started");
        Ok(JobHandle::new(resp.job_id))
    }

    async fn poll_status(&self, job: &JobHandle) -> Result<JobStatus, OcrError> {
        let resp = self.get_detection(job, 1, None).await?;
        parse_job_status(&resp.job_status, resp.status_message)
    }

    async fn fetch_results(
        &self,
        job: &JobHandle,
        page_token: Option<&str>,
    ) -> Result<ResultPage, OcrError> {
        let resp = self.get_detection(job, MAX_RESULTS, page_token).await?;
        Ok(resp.into_result_page())
    }
}

fn parse_job_status(status: &str, message: Option<String>) -> Result<JobStatus, OcrError> {
    match status {
        "IN_PROGRESS" => Ok(JobStatus::Running),
        "SUCCEEDED" | "PARTIAL_SUCCESS" => Ok(JobStatus::Succeeded),
        "FAILED" => Ok(JobStatus::Failed(message)),
        other => Err(OcrError::Malformed(format!("unknown job status '{}'", other))),
    }
}

// ============ Wire Types ============

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartDetectionRequest<'a> {
    document_location: DocumentLocation<'a>,
    client_request_token: &'a str,
}

#[derive(Serialize)]
struct DocumentLocation<'a> {
    #[serde(rename = "S3Object")]
    s3_object: S3ObjectRef<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct S3ObjectRef<'a> {
    bucket: &'a str,
    name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartDetectionResponse {
    job_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetDetectionRequest<'a> {
    job_id: &'a str,
    max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetDetectionResponse {
    job_status: String,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    next_token: Option<String>,
    #[serde(default)]
    blocks: Vec<WireBlock>,
}

impl GetDetectionResponse {
    fn into_result_page(self) -> ResultPage {
        ResultPage {
            blocks: self.blocks.into_iter().map(WireBlock::into_block).collect(),
            next_token: self.next_token.filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireBlock {
    block_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    geometry: Option<WireGeometry>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    relationships: Vec<WireRelationship>,
}

impl WireBlock {
    fn into_block(self) -> Block {
        let children = self
            .relationships
            .into_iter()
            .filter(|r| r.kind == "CHILD")
            .flat_map(|r| r.ids)
            .collect();
        Block {
            kind: BlockKind::parse(&self.block_type),
            text: self.text,
            bbox: self
                .geometry
                .and_then(|g| g.bounding_box)
                .map(|b| (b.left, b.top, b.width, b.height)),
            page: self.page,
            id: self.id,
            children,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireRelationship {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireGeometry {
    #[serde(default)]
    bounding_box: Option<WireBoundingBox>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireBoundingBox {
    width: f64,
    height: f64,
    left: f64,
    top: f64,
}

#[derive(Deserialize)]
struct AwsErrorBody {
    #[serde(rename = "__type")]
    kind: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_result_page() {
        let json = r#"{
            "JobStatus": "SUCCEEDED",
            "NextToken": "page-2",
            "DocumentMetadata": {"Pages": 2},
            "Blocks": [
                {"BlockType": "PAGE", "Page": 1, "Geometry": {"BoundingBox": {"Width": 1, "Height": 1, "Left": 0, "Top": 0}}},
                {"BlockType": "LINE", "Id": "l1", "Text": "invoice 123", "Page": 1,
                 "Relationships": [{"Type": "CHILD", "Ids": ["w1", "w2"]}]},
                {"BlockType": "WORD", "Id": "w1", "Text": "invoice", "Page": 1,
                 "Geometry": {"BoundingBox": {"Width": 0.3, "Height": 0.1, "Left": 0.1, "Top": 0.2}, "Polygon": []}}
            ]
        }"#;
        let resp: GetDetectionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            parse_job_status(&resp.job_status, None).unwrap(),
            JobStatus::Succeeded
        );
        let page = resp.into_result_page();
        assert_eq!(page.next_token.as_deref(), Some("page-2"));
        assert_eq!(page.blocks.len(), 3);
        assert_eq!(page.blocks[0].kind, BlockKind::Other("PAGE".to_string()));
        assert_eq!(page.blocks[1].kind, BlockKind::Line);
        assert_eq!(page.blocks[1].bbox, None);
        assert_eq!(page.blocks[1].children, vec!["w1", "w2"]);
        assert_eq!(page.blocks[2].bbox, Some((0.1, 0.2, 0.3, 0.1)));
        assert_eq!(page.blocks[2].id.as_deref(), Some("w1"));
        assert!(page.blocks[2].children.is_empty());
    }

    #[test]
    fn maps_job_statuses() {
        assert_eq!(parse_job_status("IN_PROGRESS", None).unwrap(), JobStatus::Running);
        assert_eq!(
            parse_job_status("PARTIAL_SUCCESS", None).unwrap(),
            JobStatus::Succeeded
        );
        assert_eq!(
            parse_job_status("FAILED", Some("bad pdf".into())).unwrap(),
            JobStatus::Failed(Some("bad pdf".into()))
        );
        assert!(parse_job_status("WEIRD", None).is_err());
    }

    #[test]
    fn throttling_is_transient() {
        let body = r#"{"__type":"com.amazonaws.textract#ThrottlingException","message":"Rate exceeded"}"#;
        assert!(classify_failure(400, body).is_transient());
        let body = r#"{"__type":"InvalidS3ObjectException","Message":"Unable to get object"}"#;
        assert!(matches!(classify_failure(400, body), OcrError::Rejected(m) if m.contains("InvalidS3ObjectException")));
        assert!(classify_failure(503, "").is_transient());
    }

    #[test]
    fn start_request_uses_pascal_case() {
        let request = StartDetectionRequest {
            document_location: DocumentLocation {
                s3_object: S3ObjectRef {
                    bucket: "archive",
                    name: "users/a/f/x.pdf",
                },
            },
            client_request_token: "tok",
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value["DocumentLocation"]["S3Object"]["Name"],
            "users/a/f/x.pdf"
        );
        assert_eq!(value["ClientRequestToken"], "tok");
    }
}
