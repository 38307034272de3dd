//! Remote folder store client (Drive-style listing, changes and download)

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::types::remote::{ChangePage, RemoteChange, RemoteFile};

/// Trait over the remote object store consumed by the synchronizer
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fresh change cursor representing "now"; persisted after a full sync.
    async fn start_page_token(&self) -> Result<String>;

    /// Full listing of a folder, optionally recursive.
    async fn list_folder(&self, folder_id: &str, recursive: bool) -> Result<Vec<RemoteFile>>;

    /// One page of the change stream starting at `page_token`.
    async fn changes(&self, page_token: &str) -> Result<ChangePage>;

    /// Download a file's bytes.
    async fn download(&self, file_id: &str) -> Result<Vec<u8>>;
}

/// HTTP implementation of the remote source
pub struct HttpRemoteSource {
    list_client: reqwest::Client,
    download_client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    files: Vec<RemoteFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangesResponse {
    changes: Vec<RemoteChange>,
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    new_start_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartTokenResponse {
    start_page_token: String,
}

impl HttpRemoteSource {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let list_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.list_timeout_secs))
            .build()?;
        let download_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()?;
        Ok(Self {
            list_client,
            download_client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T> {
        let response = self.list_client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::RemoteSource(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    async fn start_page_token(&self) -> Result<String> {
        let body: StartTokenResponse = self
            .get_json(format!("{}/changes/startPageToken", self.endpoint))
            .await?;
        Ok(body.start_page_token)
    }

    async fn list_folder(&self, folder_id: &str, recursive: bool) -> Result<Vec<RemoteFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/folders/{}/files?recursive={}",
                self.endpoint, folder_id, recursive
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", token));
            }

            let body: ListResponse = self.get_json(url).await?;
            files.extend(body.files);

            match body.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(files)
    }

    async fn changes(&self, page_token: &str) -> Result<ChangePage> {
        let body: ChangesResponse = self
            .get_json(format!(
                "{}/changes?pageToken={}",
                self.endpoint, page_token
            ))
            .await?;
        Ok(ChangePage {
            changes: body.changes,
            next_page_token: body.next_page_token,
            new_start_page_token: body.new_start_page_token,
        })
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let response = self
            .download_client
            .get(format!("{}/files/{}/content", self.endpoint, file_id))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::RemoteSource(format!(
                "download of {} returned {}",
                file_id,
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}
