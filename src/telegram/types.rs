// Bot API objects, limited to the fields the bot reads.

use serde::Deserialize;

/// Envelope around every Bot API result.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub channel_post: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

/// Where a forwarded message came from. Only channel origins carry the
/// original message id.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageOrigin {
    Channel { chat: Chat, message_id: i64 },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub sender_chat: Option<Chat>,
    pub chat: Chat,
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    /// Available sizes, smallest first.
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    #[serde(default)]
    pub is_automatic_forward: bool,
    pub forward_origin: Option<MessageOrigin>,
}

impl Message {
    pub fn is_private(&self) -> bool {
        self.chat.kind == "private"
    }

    pub fn sender_id(&self) -> Option<i64> {
        self.from.as_ref().map(|u| u.id)
    }

    /// The channel post id this message was forwarded from.
    pub fn origin_message_id(&self) -> Option<i64> {
        match &self.forward_origin {
            Some(MessageOrigin::Channel { message_id, .. }) => Some(*message_id),
            _ => None,
        }
    }

    pub fn largest_photo(&self) -> Option<&PhotoSize> {
        self.photo.last()
    }

    /// The command name without the slash or `@botname`, if the text starts
    /// with a bot command.
    pub fn command(&self) -> Option<&str> {
        let text = self.text.as_deref()?;
        let entity = self.entities.first()?;
        if entity.kind != "bot_command" || entity.offset != 0 {
            return None;
        }
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        Some(name.split('@').next().unwrap_or(name))
    }

    /// True when the first entity is a URL.
    pub fn starts_with_url_entity(&self) -> bool {
        self.entities.first().is_some_and(|e| e.kind == "url")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct File {
    pub file_id: String,
    pub file_size: Option<u64>,
    pub file_path: Option<String>,
}
