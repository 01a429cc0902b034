//! REST import trigger.
//!
//! Staged VMs are imported with one `POST /rest/v1/VirDomain/import` call that
//! points the hypervisor at the share holding the staging directory.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::{Error, Result};

/// Path of the import endpoint relative to the API base URL.
pub const IMPORT_PATH: &str = "/rest/v1/VirDomain/import";

/// Body of the import request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRequest {
    pub source: ImportSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSource {
    #[serde(rename = "pathURI")]
    pub path_uri: String,
    pub format: String,
    pub definition_file_name: String,
    pub allow_non_sequential_writes: bool,
    pub parallel_count_per_transfer: u32,
}

impl ImportRequest {
    /// Request importing `vm` from `<share_prefix><vm>`.
    pub fn for_vm(share_prefix: &str, vm: &str) -> Self {
        Self {
            source: ImportSource {
                path_uri: format!("{}{}", share_prefix, vm),
                format: "qcow2".to_string(),
                definition_file_name: format!("{}.xml", vm),
                allow_non_sequential_writes: true,
                parallel_count_per_transfer: 0,
            },
        }
    }
}

/// Successful import response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportReceipt {
    #[serde(rename = "taskTag")]
    pub task_tag: String,
    #[serde(rename = "createdUUID")]
    pub created_uuid: String,
}

/// Something that can import a staged VM.
pub trait Importer {
    fn import(&self, vm: &str) -> Result<ImportReceipt>;
}

/// Blocking HTTP client for the hypervisor REST API.
///
/// Self-signed certificates are accepted.
pub struct ApiClient {
    client: reqwest::blocking::Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Full URL of the import endpoint.
    pub fn import_url(&self) -> String {
        import_url(&self.config.base_url)
    }
}

/// Join `base_url` and [`IMPORT_PATH`], ignoring trailing slashes on the base.
pub fn import_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), IMPORT_PATH)
}

impl Importer for ApiClient {
    fn import(&self, vm: &str) -> Result<ImportReceipt> {
        let body = ImportRequest::for_vm(&self.config.share_prefix, vm);
        let url = self.import_url();

        let mut request = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body);
        if !self.config.username.is_empty() {
            request = request.basic_auth(&self.config.username, Some(&self.config.password));
        }

        tracing::info!(vm = %vm, url = %url, "importing");
        let response = request
            .send()
            .map_err(|e| Error::network(format!("API call failed: {}", e)))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().unwrap_or_default();
            return Err(Error::network(format!(
                "API error {}: {}",
                status.as_u16(),
                body
            )));
        }

        let receipt: ImportReceipt = response
            .json()
            .map_err(|e| Error::network(format!("invalid import response: {}", e)))?;
        tracing::info!(
            vm = %vm,
            task = %receipt.task_tag,
            uuid = %receipt.created_uuid,
            "import queued"
        );
        Ok(receipt)
    }
}
