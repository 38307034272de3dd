//! Heavy-lane converter client
//!
//! The converter is a black box: the dispatcher hands it a job and the
//! converter later reports the outcome through the internal callback route.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::ConverterConfig;
use crate::error::{Error, Result};
use crate::types::job::ProcessingJob;

/// One-way dispatch to the external conversion worker
#[async_trait]
pub trait ConverterClient: Send + Sync {
    /// Hand a reserved job to the converter. Returning Ok only means the
    /// converter accepted the work; the result arrives via callback.
    async fn dispatch(&self, job: &ProcessingJob) -> Result<()>;
}

/// HTTP converter client
pub struct HttpConverter {
    client: reqwest::Client,
    endpoint: String,
    callback_url: String,
}

impl HttpConverter {
    pub fn new(config: &ConverterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.dispatch_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            callback_url: config.callback_url.clone(),
        })
    }
}

#[async_trait]
impl ConverterClient for HttpConverter {
    async fn dispatch(&self, job: &ProcessingJob) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/convert", self.endpoint))
            .json(&serde_json::json!({
                "documentId": job.document_id,
                "filePath": job.file_path,
                "format": job.format,
                "profileConfig": job.profile_config,
                "callbackUrl": self.callback_url,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Converter(format!(
                "converter rejected job: {}",
                response.status()
            )));
        }
        Ok(())
    }
}
