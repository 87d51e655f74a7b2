//! Model artifact resolution
//!
//! Turns the configured [`ModelSource`] into files on local disk. Remote
//! artifacts are downloaded once into the cache directory and reused on
//! later starts.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::config::{ModelConfig, ModelSource};

/// Model files ready to be handed to the inference runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    pub model_path: PathBuf,
    /// Separate weights file (OpenVINO IR `.bin`), if any
    pub weights_path: Option<PathBuf>,
}

/// Resolves a model source to local files
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    async fn fetch(&self) -> Result<ModelArtifact>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Build the fetcher for the configured source
pub fn fetcher_for(config: &ModelConfig) -> Box<dyn ModelFetcher> {
    match &config.source {
        ModelSource::Local { path, weights_path } => Box::new(LocalFetcher {
            path: path.clone(),
            weights_path: weights_path.clone(),
        }),
        ModelSource::HuggingFace {
            repo_id,
            filename,
            revision,
            weights_filename,
        } => Box::new(HubFetcher {
            repo_id: repo_id.clone(),
            filename: filename.clone(),
            revision: revision.clone(),
            weights_filename: weights_filename.clone(),
            cache_dir: config.cache_dir.clone(),
            token: std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
        }),
        ModelSource::Dropbox { url, filename } => Box::new(DropboxFetcher {
            url: url.clone(),
            filename: filename.clone(),
            cache_dir: config.cache_dir.clone(),
        }),
    }
}

/// Model already present on disk
pub struct LocalFetcher {
    pub path: PathBuf,
    pub weights_path: Option<PathBuf>,
}

#[async_trait]
impl ModelFetcher for LocalFetcher {
    async fn fetch(&self) -> Result<ModelArtifact> {
        ensure_file(&self.path).await?;
        if let Some(weights) = &self.weights_path {
            ensure_file(weights).await?;
        }
        Ok(ModelArtifact {
            model_path: self.path.clone(),
            weights_path: self.weights_path.clone(),
        })
    }

    fn describe(&self) -> String {
        format!("local file {}", self.path.display())
    }
}

/// Model hosted in a Hugging Face Hub repository
pub struct HubFetcher {
    pub repo_id: String,
    pub filename: String,
    pub revision: String,
    pub weights_filename: Option<String>,
    pub cache_dir: PathBuf,
    pub token: Option<String>,
}

impl HubFetcher {
    pub fn file_url(&self, filename: &str) -> String {
        format!(
            "https://huggingface.co/{}/resolve/{}/{}",
            self.repo_id, self.revision, filename
        )
    }

    pub fn local_path(&self, filename: &str) -> PathBuf {
        self.cache_dir.join(&self.repo_id).join(filename)
    }

    async fn fetch_file(&self, client: &reqwest::Client, filename: &str) -> Result<PathBuf> {
        let dest = self.local_path(filename);
        download_file(client, &self.file_url(filename), &dest, self.token.as_deref()).await?;
        Ok(dest)
    }
}

#[async_trait]
impl ModelFetcher for HubFetcher {
    async fn fetch(&self) -> Result<ModelArtifact> {
        let client = reqwest::Client::new();
        let model_path = self.fetch_file(&client, &self.filename).await?;
        let weights_path = match &self.weights_filename {
            Some(name) => Some(self.fetch_file(&client, name).await?),
            None => None,
        };
        Ok(ModelArtifact {
            model_path,
            weights_path,
        })
    }

    fn describe(&self) -> String {
        format!("huggingface {}@{}/{}", self.repo_id, self.revision, self.filename)
    }
}

/// Model shared through a Dropbox link
pub struct DropboxFetcher {
    pub url: String,
    pub filename: String,
    pub cache_dir: PathBuf,
}

impl DropboxFetcher {
    pub fn local_path(&self) -> PathBuf {
        self.cache_dir.join("dropbox").join(&self.filename)
    }
}

#[async_trait]
impl ModelFetcher for DropboxFetcher {
    async fn fetch(&self) -> Result<ModelArtifact> {
        let dest = self.local_path();
        let client = reqwest::Client::new();
        download_file(&client, &direct_dropbox_url(&self.url), &dest, None).await?;
        Ok(ModelArtifact {
            model_path: dest,
            weights_path: None,
        })
    }

    fn describe(&self) -> String {
        format!("dropbox {}", self.url)
    }
}

/// Rewrite a Dropbox share link so it serves the raw file
pub fn direct_dropbox_url(url: &str) -> String {
    if url.contains("dl=0") {
        url.replacen("dl=0", "dl=1", 1)
    } else if url.contains("dl=1") || url.contains("raw=1") {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&dl=1", url)
    } else {
        format!("{}?dl=1", url)
    }
}

async fn ensure_file(path: &Path) -> Result<()> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Model file not found: {}", path.display()))?;
    if !meta.is_file() {
        bail!("Model path is not a file: {}", path.display());
    }
    Ok(())
}

/// Download `url` to `dest`, skipping the request when `dest` already exists.
///
/// The body is written to a `.part` file first and renamed on success, so an
/// interrupted download never leaves a truncated model behind.
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    token: Option<&str>,
) -> Result<()> {
    if tokio::fs::try_exists(dest).await.unwrap_or(false) {
        info!("Using cached model file {}", dest.display());
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    info!("Downloading {} -> {}", url, dest.display());

    let mut request = client.get(url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let mut response = request
        .send()
        .await
        .with_context(|| format!("Failed to request {}", url))?;

    if !response.status().is_success() {
        bail!("Download of {} failed with status {}", url, response.status());
    }

    let tmp_dest = part_path(dest);
    let written = match write_body(&mut response, &tmp_dest).await {
        Ok(written) => written,
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp_dest).await;
            return Err(e.context(format!("Download of {} was interrupted", url)));
        }
    };

    tokio::fs::rename(&tmp_dest, dest)
        .await
        .with_context(|| format!("Failed to rename {}", tmp_dest.display()))?;

    info!("Downloaded {} bytes to {}", written, dest.display());
    Ok(())
}

/// `model.xml` -> `model.xml.part`, so sibling files never share a temp file
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn write_body(response: &mut reqwest::Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
