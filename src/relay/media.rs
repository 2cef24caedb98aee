// Payload preparation: download media and build outbound attachments.
//
// Media are fetched into memory and uploaded so the chat service never has
// to reach the source CDN. Any download failure falls back to handing the
// URL over instead, so a slow CDN degrades quality of service rather than
// dropping the relay.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tracing::{debug, warn};

use super::caption::build_caption_with_alt_text;
use super::{MediaSource, OutboundMedia};
use crate::feed::url::{clear_query, extension};
use crate::feed::{ContentItem, Media, MediaKind};

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_DOWNLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Photo rendition requested from the CDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoSize {
    Large,
    Orig,
}

impl PhotoSize {
    fn name(self) -> &'static str {
        match self {
            PhotoSize::Large => "large",
            PhotoSize::Orig => "orig",
        }
    }
}

/// Rewrite a photo URL to request a specific rendition:
/// `…/abc.jpg` → `…/abc?format=jpg&name=large`. Other extensions are left
/// without a query.
pub fn photo_url(url: &str, size: PhotoSize) -> String {
    let bare = clear_query(url);
    match extension(&bare).as_deref() {
        Some(ext @ ("jpg" | "jpeg" | "png")) => {
            let stem = &bare[..bare.len() - ext.len() - 1];
            format!("{stem}?format={ext}&name={}", size.name())
        }
        _ => bare,
    }
}

/// `<content id>_<NN>.<ext>`, numbered from 1.
fn file_name(content_id: &str, index: usize, url: &str) -> String {
    let ext = extension(url).unwrap_or_else(|| "bin".into());
    format!("{content_id}_{:02}.{ext}", index + 1)
}

/// Downloads media with a timeout and size cap.
#[derive(Clone)]
pub struct MediaFetcher {
    client: Option<reqwest::Client>,
    max_bytes: u64,
}

impl MediaFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("Failed to build download client")?;
        Ok(Self {
            client: Some(client),
            max_bytes: MAX_DOWNLOAD_BYTES,
        })
    }

    /// A fetcher that never downloads: every source stays a URL.
    pub fn disabled() -> Self {
        Self {
            client: None,
            max_bytes: MAX_DOWNLOAD_BYTES,
        }
    }

    /// Download `url`, or fall back to passing the URL through.
    pub async fn fetch(&self, url: &str, file_name: String) -> MediaSource {
        let Some(client) = &self.client else {
            return MediaSource::Url(url.to_string());
        };
        match self.download(client, url).await {
            Ok(bytes) => {
                debug!(url = url, size = bytes.len(), "Downloaded media");
                MediaSource::Upload { file_name, bytes }
            }
            Err(e) => {
                warn!(url = url, error = %e, "Download failed, relaying by URL");
                MediaSource::Url(url.to_string())
            }
        }
    }

    async fn download(&self, client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
        let response = client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {url}"))?;

        if !response.status().is_success() {
            bail!("Download of {url} returned {}", response.status());
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            bail!("File too large: {url}");
        }

        // Content-Length can be absent or wrong; enforce the cap while reading.
        let mut bytes = Vec::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.with_context(|| format!("Failed to read {url}"))?;
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                bail!("File too large: {url}");
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

/// Build the channel payloads for an item. The first payload carries the
/// caption; a lone animated GIF becomes an animation.
pub async fn build_payloads(item: &ContentItem, fetcher: &MediaFetcher) -> Vec<OutboundMedia> {
    let caption = build_caption_with_alt_text(item);
    let lone = item.media.len() == 1;
    let mut payloads = Vec::with_capacity(item.media.len());

    for (i, media) in item.media.iter().enumerate() {
        let caption = if payloads.is_empty() { Some(caption.clone()) } else { None };
        let duration_secs = media.duration_ms.map(|ms| (ms / 1000) as u32);

        let payload = match media.kind {
            MediaKind::Photo => {
                let url = photo_url(&media.url, PhotoSize::Large);
                let source = fetcher.fetch(&url, file_name(&item.id, i, &media.url)).await;
                OutboundMedia::Photo { source, caption }
            }
            MediaKind::AnimatedGif if lone => {
                let url = clear_query(&media.url);
                let source = fetcher.fetch(&url, file_name(&item.id, i, &url)).await;
                OutboundMedia::Animation {
                    source,
                    caption,
                    width: media.width,
                    height: media.height,
                    duration_secs,
                }
            }
            MediaKind::Video | MediaKind::AnimatedGif => {
                let url = clear_query(&media.url);
                let source = fetcher.fetch(&url, file_name(&item.id, i, &url)).await;
                OutboundMedia::Video {
                    source,
                    caption,
                    width: media.width,
                    height: media.height,
                    duration_secs,
                    cover: media.thumb_url.clone(),
                }
            }
        };
        payloads.push(payload);
    }

    payloads
}

/// Original-resolution files for a relayed item, captioned with their
/// source URL.
pub async fn original_documents(
    content_id: &str,
    media: &[Media],
    fetcher: &MediaFetcher,
) -> Vec<OutboundMedia> {
    let mut documents = Vec::with_capacity(media.len());
    for (i, m) in media.iter().enumerate() {
        let url = match m.kind {
            MediaKind::Photo => photo_url(&m.url, PhotoSize::Orig),
            MediaKind::Video | MediaKind::AnimatedGif => clear_query(&m.url),
        };
        let source = fetcher
            .fetch(&url, file_name(content_id, i, &clear_query(&m.url)))
            .await;
        documents.push(OutboundMedia::Document {
            source,
            caption: Some(url),
        });
    }
    documents
}
