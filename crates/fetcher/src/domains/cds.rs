//! Minimal Climate Data Store client: submit a process execution, wait for
//! the job and download its single result asset.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use slog::{debug, info, Logger};

use crate::{HttpRequest, HttpSource, Result, SshError};

pub const DEFAULT_URL: &str = "https://cds.climate.copernicus.eu/api";
const RC_FILE_NAME: &str = ".cdsapirc";
const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdsCredentials {
    pub url: String,
    pub key: String,
}

/// `url: ...` / `key: ...` lines of a `.cdsapirc` file. Only this flat
/// `key: value` subset of YAML is understood.
pub fn parse_rc(text: &str) -> (Option<String>, Option<String>) {
    let mut url = None;
    let mut key = None;
    for line in text.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.trim() {
            "url" => url = Some(value),
            "key" => key = Some(value),
            _ => {}
        }
    }
    (url, key)
}

fn rc_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| Path::new(&home).join(RC_FILE_NAME))
}

/// Configured values first, then `CDSAPI_URL`/`CDSAPI_KEY`, then `~/.cdsapirc`
pub fn resolve_credentials(url: Option<&str>, key: Option<&str>) -> Result<CdsCredentials> {
    let (rc_url, rc_key) = rc_path()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .map(|text| parse_rc(&text))
        .unwrap_or_default();

    let url = url
        .map(str::to_string)
        .or_else(|| std::env::var("CDSAPI_URL").ok())
        .or(rc_url)
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    let key = key
        .map(str::to_string)
        .or_else(|| std::env::var("CDSAPI_KEY").ok())
        .or(rc_key)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            SshError::InvalidArgument(
                "no CDS API key, set 'cds_key', CDSAPI_KEY or create ~/.cdsapirc \
                 (see https://cds.climate.copernicus.eu/how-to-api)"
                    .to_string(),
            )
        })?;
    Ok(CdsCredentials {
        url: url.trim_end_matches('/').to_string(),
        key,
    })
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(rename = "jobID")]
    job_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct JobResults {
    asset: Asset,
}

#[derive(Debug, Deserialize)]
struct Asset {
    value: AssetValue,
}

#[derive(Debug, Deserialize)]
struct AssetValue {
    href: String,
}

pub struct CdsClient {
    logger: Logger,
    http: Arc<dyn HttpSource>,
    credentials: CdsCredentials,
    poll_interval: Duration,
}

impl CdsClient {
    pub fn new(logger: Logger, http: Arc<dyn HttpSource>, credentials: CdsCredentials) -> Self {
        CdsClient {
            logger,
            http,
            credentials,
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn authorized(&self, request: HttpRequest) -> HttpRequest {
        request.header(TOKEN_HEADER, self.credentials.key.clone())
    }

    async fn send_json<T: serde::de::DeserializeOwned>(&self, request: HttpRequest) -> Result<T> {
        let url = request.url.clone();
        self.http
            .send(self.authorized(request))
            .await?
            .error_for_status(&url)?
            .json()
    }

    async fn wait_for(&self, job: JobStatus) -> Result<String> {
        let status_url = format!("{}/retrieve/v1/jobs/{}", self.credentials.url, job.job_id);
        let mut status = job.status;
        loop {
            match status.as_str() {
                "successful" => return Ok(job.job_id),
                "failed" | "rejected" | "dismissed" => {
                    return Err(SshError::Provider(format!("CDS job {} {}", job.job_id, status)))
                }
                _ => debug!(self.logger, "CDS job {} is {}", job.job_id, status),
            }
            tokio::time::sleep(self.poll_interval).await;
            let polled: JobStatus = self.send_json(HttpRequest::get(&status_url)).await?;
            status = polled.status;
        }
    }

    /// Run `dataset` with `inputs` and write the result to `target`
    pub async fn retrieve(&self, dataset: &str, inputs: Value, target: &Path) -> Result<()> {
        let url = format!(
            "{}/retrieve/v1/processes/{}/execution",
            self.credentials.url, dataset
        );
        info!(self.logger, "submitting CDS request for {}", dataset);
        let job: JobStatus = self
            .send_json(HttpRequest::post_json(&url, json!({ "inputs": inputs })))
            .await?;
        let job_id = self.wait_for(job).await?;

        let results_url = format!("{}/retrieve/v1/jobs/{}/results", self.credentials.url, job_id);
        let results: JobResults = self.send_json(HttpRequest::get(&results_url)).await?;
        let href = results.asset.value.href;
        let body = self
            .http
            .send(HttpRequest::get(&href))
            .await?
            .error_for_status(&href)?
            .body;
        std::fs::write(target, &body)?;
        info!(self.logger, "downloaded {} bytes to {}", body.len(), target.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_rc_file() {
        let (url, key) = parse_rc("url: https://cds.example/api\nkey: abc-123\n");
        assert_eq!(url.as_deref(), Some("https://cds.example/api"));
        assert_eq!(key.as_deref(), Some("abc-123"));
        assert_eq!(parse_rc("garbage"), (None, None));
    }

    #[test]
    fn configured_values_win() {
        let credentials = resolve_credentials(Some("https://cds.example/api/"), Some("k")).unwrap();
        assert_eq!(credentials.url, "https://cds.example/api");
        assert_eq!(credentials.key, "k");
    }
}
