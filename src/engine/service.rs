//! Export service contract and its HTTP binding.

use crate::error::ServiceError;
use crate::model::{ExportConfig, ExportFile, ExportFilters, JobId, JobSnapshot};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::{Response, Url};
use serde::Deserialize;

/// The four logical operations the orchestrator consumes.
#[async_trait]
pub trait ExportService: Send + Sync {
    /// Export in a single request/response cycle.
    async fn export_direct(&self, filters: &ExportFilters) -> Result<ExportFile, ServiceError>;

    /// Create a background export job.
    async fn submit_job(&self, filters: &ExportFilters) -> Result<JobId, ServiceError>;

    /// Observe a background job.
    async fn query_job(&self, job_id: &JobId) -> Result<JobSnapshot, ServiceError>;

    /// Fetch the file produced by a completed job.
    async fn download_result(
        &self,
        job_id: &JobId,
        filename: &str,
    ) -> Result<ExportFile, ServiceError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: String,
}

#[derive(Clone)]
pub struct HttpExportService {
    pub http: reqwest::Client,
    base_url: Url,
}

impl HttpExportService {
    pub fn new(cfg: &ExportConfig) -> Result<Self, ServiceError> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| ServiceError::Decode(format!("base url {}: {e}", cfg.base_url)))?;
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ServiceError::Decode(format!("base url {} cannot be a base", self.base_url)))?;
            segments.pop_if_empty();
            for seg in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(seg);
            }
        }
        Ok(url)
    }

    fn job_url(&self, job_id: &JobId, suffix: Option<&str>) -> Result<Url, ServiceError> {
        let mut url = self.endpoint("api/export/jobs")?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ServiceError::Decode("job url".into()))?;
            segments.push(&job_id.0);
            if let Some(s) = suffix {
                segments.push(s);
            }
        }
        Ok(url)
    }
}

/// Turn a non-success response into [`ServiceError::Status`].
async fn check_status(resp: Response) -> Result<Response, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

/// Extract the filename from a `Content-Disposition` header, if any.
pub(crate) fn filename_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    let mut plain = None;
    for part in value.split(';').map(str::trim) {
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // RFC 5987: charset'lang'value; only the percent-decoded value matters here.
            let raw = encoded.rsplit('\'').next().unwrap_or(encoded);
            let decoded = urlencoding::decode_binary(raw.as_bytes());
            return Some(String::from_utf8_lossy(&decoded).into_owned());
        }
        if let Some(name) = part.strip_prefix("filename=") {
            plain = Some(name.trim_matches('"').to_string());
        }
    }
    plain.filter(|n| !n.is_empty())
}

fn default_direct_filename() -> String {
    let stamp = time::OffsetDateTime::now_utc()
        .format(time::macros::format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .unwrap_or_else(|_| "now".into());
    format!("export-{stamp}.xlsx")
}

#[async_trait]
impl ExportService for HttpExportService {
    async fn export_direct(&self, filters: &ExportFilters) -> Result<ExportFile, ServiceError> {
        let url = self.endpoint("api/export/direct")?;
        let resp = check_status(self.http.post(url).json(filters).send().await?).await?;
        let filename = filename_from_headers(resp.headers()).unwrap_or_else(default_direct_filename);
        let bytes = resp.bytes().await?;
        Ok(ExportFile { filename, bytes })
    }

    async fn submit_job(&self, filters: &ExportFilters) -> Result<JobId, ServiceError> {
        let url = self.endpoint("api/export/jobs")?;
        let resp = check_status(self.http.post(url).json(filters).send().await?).await?;
        let body: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::Decode(format!("submit response: {e}")))?;
        if body.job_id.trim().is_empty() {
            return Err(ServiceError::Decode("submit response: empty jobId".into()));
        }
        Ok(JobId(body.job_id))
    }

    async fn query_job(&self, job_id: &JobId) -> Result<JobSnapshot, ServiceError> {
        let url = self.job_url(job_id, None)?;
        let resp = check_status(self.http.get(url).send().await?).await?;
        resp.json::<JobSnapshot>()
            .await
            .map_err(|e| ServiceError::Decode(format!("job status: {e}")))
    }

    async fn download_result(
        &self,
        job_id: &JobId,
        filename: &str,
    ) -> Result<ExportFile, ServiceError> {
        let mut url = self.job_url(job_id, Some("download"))?;
        url.query_pairs_mut().append_pair("filename", filename);
        let resp = check_status(self.http.get(url).send().await?).await?;
        let bytes = resp.bytes().await?;
        Ok(ExportFile {
            filename: filename.to_string(),
            bytes,
        })
    }
}
