// Bot API client over reqwest.
//
// Implements the relay Transport. Uploads go as multipart forms; URL
// sources are sent as plain fields and fetched by the Bot API server.
// BOT_API_URL can point at a self-hosted server, which returns local
// absolute paths from getFile; those are read from disk.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::types::{ApiResponse, File, Message, Update, User};
use crate::relay::{InlineKeyboard, MediaSource, OutboundMedia, TextOptions, Transport};

pub const DEFAULT_BOT_API_URL: &str = "https://api.telegram.org";

/// Server-side wait for getUpdates.
pub const POLL_TIMEOUT_SECS: u64 = 59;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        debug!(method = method, "Bot API request");
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Bot API request failed: {method}"))?;
        Self::unwrap_response(method, response).await
    }

    async fn call_multipart<T: DeserializeOwned>(&self, method: &str, form: Form) -> Result<T> {
        debug!(method = method, "Bot API multipart request");
        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Bot API request failed: {method}"))?;
        Self::unwrap_response(method, response).await
    }

    async fn unwrap_response<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to deserialize {method} response ({status})"))?;

        if !body.ok {
            let description = body.description.unwrap_or_default();
            if let Some(retry) = body.parameters.and_then(|p| p.retry_after) {
                bail!("{method} failed: {description} (retry after {retry}s)");
            }
            bail!(
                "{method} failed with code {}: {description}",
                body.error_code.unwrap_or_default()
            );
        }
        body.result
            .with_context(|| format!("{method} returned ok without a result"))
    }

    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", &json!({})).await
    }

    /// Long polling and a webhook can't both be active.
    pub async fn delete_webhook(&self) -> Result<()> {
        let _: bool = self.call("deleteWebhook", &json!({})).await?;
        Ok(())
    }

    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let mut body = json!({
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message", "channel_post", "callback_query"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call("getUpdates", &body).await
    }

    pub async fn get_file(&self, file_id: &str) -> Result<File> {
        self.call("getFile", &json!({ "file_id": file_id })).await
    }
}

/// `parse_mode` for a payload: relay captions are MarkdownV2, document
/// captions are bare URLs.
fn parse_mode(media: &OutboundMedia) -> Option<&'static str> {
    match media {
        OutboundMedia::Document { .. } => None,
        _ => media.caption().map(|_| "MarkdownV2"),
    }
}

fn keyboard_markup(keyboard: &InlineKeyboard) -> Value {
    let rows: Vec<Vec<Value>> = keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| json!({ "text": b.text, "callback_data": b.callback_data }))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

fn upload_part(file_name: &str, bytes: &[u8]) -> Part {
    Part::bytes(bytes.to_vec()).file_name(file_name.to_string())
}

/// Type-specific fields shared by single sends and album entries.
fn media_fields(media: &OutboundMedia) -> Vec<(&'static str, Value)> {
    let mut fields = Vec::new();
    if let Some(caption) = media.caption() {
        fields.push(("caption", json!(caption)));
    }
    if let Some(mode) = parse_mode(media) {
        fields.push(("parse_mode", json!(mode)));
    }
    match media {
        OutboundMedia::Video {
            width,
            height,
            duration_secs,
            cover,
            ..
        } => {
            fields.extend(width.map(|w| ("width", json!(w))));
            fields.extend(height.map(|h| ("height", json!(h))));
            fields.extend(duration_secs.map(|d| ("duration", json!(d))));
            fields.extend(cover.as_ref().map(|c| ("cover", json!(c))));
            fields.push(("supports_streaming", json!(true)));
        }
        OutboundMedia::Animation {
            width,
            height,
            duration_secs,
            ..
        } => {
            fields.extend(width.map(|w| ("width", json!(w))));
            fields.extend(height.map(|h| ("height", json!(h))));
            fields.extend(duration_secs.map(|d| ("duration", json!(d))));
        }
        OutboundMedia::Photo { .. } | OutboundMedia::Document { .. } => {}
    }
    fields
}

fn as_form_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn send_method(media: &OutboundMedia) -> &'static str {
    match media {
        OutboundMedia::Photo { .. } => "sendPhoto",
        OutboundMedia::Video { .. } => "sendVideo",
        OutboundMedia::Animation { .. } => "sendAnimation",
        OutboundMedia::Document { .. } => "sendDocument",
    }
}

/// The `media` array for sendMediaGroup plus the attachments it references.
fn album_body(media: &[OutboundMedia]) -> (Value, Vec<(String, Part)>) {
    let mut entries = Vec::with_capacity(media.len());
    let mut parts = Vec::new();

    for (i, item) in media.iter().enumerate() {
        let reference = match item.source() {
            MediaSource::Url(url) => url.clone(),
            MediaSource::Upload { file_name, bytes } => {
                let name = format!("file{i}");
                parts.push((name.clone(), upload_part(file_name, bytes)));
                format!("attach://{name}")
            }
        };
        let mut entry = json!({ "type": item.kind(), "media": reference });
        for (key, value) in media_fields(item) {
            entry[key] = value;
        }
        entries.push(entry);
    }
    (Value::Array(entries), parts)
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_single(
        &self,
        chat_id: i64,
        media: &OutboundMedia,
        reply_to: Option<i64>,
    ) -> Result<i64> {
        let field = media.kind();
        let mut form = Form::new().text("chat_id", chat_id.to_string());
        form = match media.source() {
            MediaSource::Url(url) => form.text(field, url.clone()),
            MediaSource::Upload { file_name, bytes } => {
                form.part(field, upload_part(file_name, bytes))
            }
        };
        for (key, value) in media_fields(media) {
            form = form.text(key, as_form_text(&value));
        }
        if let Some(id) = reply_to {
            form = form.text("reply_parameters", json!({ "message_id": id }).to_string());
        }

        let message: Message = self.call_multipart(send_method(media), form).await?;
        Ok(message.message_id)
    }

    async fn send_album(
        &self,
        chat_id: i64,
        media: &[OutboundMedia],
        reply_to: Option<i64>,
    ) -> Result<Vec<i64>> {
        let (entries, parts) = album_body(media);
        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("media", entries.to_string());
        for (name, part) in parts {
            form = form.part(name, part);
        }
        if let Some(id) = reply_to {
            form = form.text("reply_parameters", json!({ "message_id": id }).to_string());
        }

        let messages: Vec<Message> = self.call_multipart("sendMediaGroup", form).await?;
        Ok(messages.into_iter().map(|m| m.message_id).collect())
    }

    async fn send_text(&self, chat_id: i64, text: &str, opts: &TextOptions) -> Result<i64> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if opts.markdown {
            body["parse_mode"] = json!("MarkdownV2");
        }
        if opts.disable_preview {
            body["link_preview_options"] = json!({ "is_disabled": true });
        }
        if let Some(id) = opts.reply_to {
            body["reply_parameters"] = json!({ "message_id": id });
        }
        if let Some(keyboard) = &opts.keyboard {
            body["reply_markup"] = keyboard_markup(keyboard);
        }

        let message: Message = self.call("sendMessage", &body).await?;
        Ok(message.message_id)
    }

    async fn answer_callback(&self, callback_id: &str, text: &str, show_alert: bool) -> Result<()> {
        let body = json!({
            "callback_query_id": callback_id,
            "text": text,
            "show_alert": show_alert,
            "cache_time": 60,
        });
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self.get_file(file_id).await?;
        let path = file
            .file_path
            .with_context(|| format!("getFile returned no path for {file_id}"))?;

        // A self-hosted Bot API server in local mode hands back absolute paths.
        if path.starts_with('/') {
            match tokio::fs::read(&path).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => warn!(path = %path, error = %e, "Local file unreadable, downloading"),
            }
        }

        let url = format!("{}/file/bot{}/{}", self.base_url, self.token, path.trim_start_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to download file {file_id}"))?;
        if !response.status().is_success() {
            bail!("File download for {file_id} returned {}", response.status());
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read file {file_id}"))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(source: MediaSource, caption: Option<&str>) -> OutboundMedia {
        OutboundMedia::Photo {
            source,
            caption: caption.map(String::from),
        }
    }

    #[test]
    fn album_references_uploads_by_attachment_name() {
        let media = vec![
            photo(
                MediaSource::Upload {
                    file_name: "1_01.jpg".into(),
                    bytes: vec![1, 2, 3],
                },
                Some("caption"),
            ),
            photo(MediaSource::Url("https://example.com/b.jpg".into()), None),
        ];
        let (entries, parts) = album_body(&media);

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].0, "file0");
        assert_eq!(entries[0]["media"], "attach://file0");
        assert_eq!(entries[0]["parse_mode"], "MarkdownV2");
        assert_eq!(entries[1]["media"], "https://example.com/b.jpg");
        assert!(entries[1].get("caption").is_none());
    }

    #[test]
    fn documents_are_sent_without_markdown() {
        let doc = OutboundMedia::Document {
            source: MediaSource::Url("https://example.com/a.png".into()),
            caption: Some("https://example.com/a.png".into()),
        };
        assert_eq!(parse_mode(&doc), None);
        assert_eq!(send_method(&doc), "sendDocument");
    }

    #[test]
    fn video_fields_include_cover_and_duration() {
        let video = OutboundMedia::Video {
            source: MediaSource::Url("https://video.example.com/v.mp4".into()),
            caption: None,
            width: Some(1280),
            height: Some(720),
            duration_secs: Some(12),
            cover: Some("https://example.com/thumb.jpg".into()),
        };
        let fields = media_fields(&video);
        let get = |k: &str| fields.iter().find(|(key, _)| *key == k).map(|(_, v)| v.clone());
        assert_eq!(get("width"), Some(json!(1280)));
        assert_eq!(get("duration"), Some(json!(12)));
        assert_eq!(get("cover"), Some(json!("https://example.com/thumb.jpg")));
        assert_eq!(get("parse_mode"), None);
    }

    #[test]
    fn keyboard_json_shape() {
        let markup = keyboard_markup(&crate::relay::follow_keyboard("artist"));
        assert_eq!(markup["inline_keyboard"][0][1]["callback_data"], "unfollow.artist");
    }

    #[tokio::test]
    async fn unreachable_api_is_an_error() {
        let client = TelegramClient::new("http://127.0.0.1:9", "token").unwrap();
        let err = client.get_me().await.unwrap_err();
        assert!(format!("{err:#}").contains("getMe"));
    }
}
