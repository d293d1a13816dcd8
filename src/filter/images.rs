use crate::classifier::ImageInput;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use std::time::Duration;

/// Turns an image URL into classifier input.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ImageInput>;
}

/// Downloads the image and inlines it as base64, so providers that cannot
/// reach the host's CDN still see the pixels.
pub struct InliningFetcher {
    client: Client,
}

impl InliningFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for InliningFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ImageFetcher for InliningFetcher {
    async fn fetch(&self, url: &str) -> Result<ImageInput> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("image fetch returned {}", response.status()));
        }

        let media_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| "image/jpeg".to_string());
        let bytes = response.bytes().await?;

        Ok(ImageInput::Inline {
            media_type,
            base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
        })
    }
}

/// Sends the URL as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlPassthrough;

#[async_trait]
impl ImageFetcher for UrlPassthrough {
    async fn fetch(&self, url: &str) -> Result<ImageInput> {
        Ok(ImageInput::Url(url.to_string()))
    }
}

/// Inline when possible, URL otherwise.
pub async fn image_input(fetcher: &dyn ImageFetcher, url: &str) -> ImageInput {
    match fetcher.fetch(url).await {
        Ok(input) => input,
        Err(e) => {
            log::debug!("Could not inline image {:.80}: {e}", url);
            ImageInput::Url(url.to_string())
        }
    }
}
