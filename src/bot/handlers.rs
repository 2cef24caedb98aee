// Update routing and the per-update handlers.
//
// Routing order: discussion-group messages first (automatic forwards of
// relayed posts), then operator commands, then private messages. Channel
// posts only matter in the similar-image channel; callbacks only from the
// operator.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::operator::{follow_author, unfollow_author, CallbackAction};
use crate::correlation::CorrelationCache;
use crate::db::Database;
use crate::feed::url::parse_profile_link;
use crate::feed::FeedClient;
use crate::relay::caption::build_caption;
use crate::relay::media::{build_payloads, original_documents, MediaFetcher};
use crate::relay::{follow_keyboard, send_media, Notifier, TextOptions, Transport};
use crate::similar::index::render_notice;
use crate::similar::{phash, NearDuplicateIndex, NoticeQueue};
use crate::telegram::types::{CallbackQuery, Message, Update};

/// Chats the bot acts in.
#[derive(Debug, Clone, Copy)]
pub struct ChatIds {
    pub owner_id: i64,
    /// Where items are relayed.
    pub channel_id: i64,
    /// The channel's discussion group.
    pub group_id: i64,
}

struct SimilarChannel {
    channel_id: i64,
    index: NearDuplicateIndex,
    notices: NoticeQueue,
}

pub struct Handlers {
    transport: Arc<dyn Transport>,
    feed: Arc<dyn FeedClient>,
    db: Arc<dyn Database>,
    cache: CorrelationCache,
    notifier: Notifier,
    fetcher: MediaFetcher,
    chats: ChatIds,
    similar: Option<SimilarChannel>,
}

impl Handlers {
    pub fn new(
        transport: Arc<dyn Transport>,
        feed: Arc<dyn FeedClient>,
        db: Arc<dyn Database>,
        cache: CorrelationCache,
        chats: ChatIds,
    ) -> Self {
        let notifier = Notifier::new(transport.clone(), chats.owner_id);
        Self {
            transport,
            feed,
            db,
            cache,
            notifier,
            fetcher: MediaFetcher::disabled(),
            chats,
            similar: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: MediaFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Watch `channel_id` for near-duplicate photos and queue notices.
    pub fn with_similar_channel(mut self, channel_id: i64, notices: NoticeQueue) -> Self {
        self.similar = Some(SimilarChannel {
            channel_id,
            index: NearDuplicateIndex::new(self.db.clone()),
            notices,
        });
        self
    }

    pub async fn handle(&self, update: Update) -> Result<()> {
        if let Some(msg) = &update.message {
            return self.on_message(msg).await;
        }
        if let Some(post) = &update.channel_post {
            return self.on_channel_post(post).await;
        }
        if let Some(query) = &update.callback_query {
            return self.on_callback(query).await;
        }
        Ok(())
    }

    async fn on_message(&self, msg: &Message) -> Result<()> {
        if msg.chat.id == self.chats.group_id {
            return self.on_group_message(msg).await;
        }
        match msg.command() {
            Some("follow") => self.on_follow_command(msg, true).await,
            Some("unfollow") => self.on_follow_command(msg, false).await,
            _ if msg.is_private() => self.on_private_message(msg).await,
            _ => Ok(()),
        }
    }

    async fn on_channel_post(&self, post: &Message) -> Result<()> {
        match &self.similar {
            Some(similar) if post.chat.id == similar.channel_id && !post.photo.is_empty() => {
                self.on_similar_photo(similar, post).await
            }
            _ => Ok(()),
        }
    }

    async fn reply(&self, msg: &Message, text: &str, opts: TextOptions) -> Result<()> {
        let opts = TextOptions {
            reply_to: Some(msg.message_id),
            ..opts
        };
        self.transport.send_text(msg.chat.id, text, &opts).await?;
        Ok(())
    }

    /// `/follow <handle-or-url>` and `/unfollow <handle-or-url>`, owner only.
    async fn on_follow_command(&self, msg: &Message, follow: bool) -> Result<()> {
        if msg.sender_id() != Some(self.chats.owner_id) {
            return Ok(());
        }
        let Some(text) = msg.text.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(());
        };
        let verb = if follow { "follow" } else { "unfollow" };

        let words: Vec<&str> = text.split(' ').collect();
        if words.len() != 2 {
            let usage = format!("Invalid command format.\nUsage:\n/{verb} <username>\n/{verb} <url>");
            return self.reply(msg, &usage, TextOptions::default()).await;
        }
        info!(command = text, "Operator command");

        let link = match parse_profile_link(words[1]) {
            Ok(link) => link,
            Err(e) => return self.reply(msg, &e.to_string(), TextOptions::default()).await,
        };
        let Some(handle) = link.handle else {
            return self
                .reply(msg, "Invalid twitter username", TextOptions::default())
                .await;
        };

        let result = if follow {
            follow_author(self.feed.as_ref(), self.db.as_ref(), &handle).await
        } else {
            unfollow_author(self.feed.as_ref(), self.db.as_ref(), &handle).await
        };
        match result {
            Ok(profile) => {
                let done = if follow { "Following" } else { "Unfollowed" };
                let opts = TextOptions::default().with_keyboard(follow_keyboard(&profile.handle));
                self.reply(msg, &format!("{done} https://x.com/{handle}"), opts)
                    .await
            }
            Err(e) => {
                self.reply(msg, &format!("Error {e:#}"), TextOptions::default())
                    .await
            }
        }
    }

    async fn on_callback(&self, query: &CallbackQuery) -> Result<()> {
        if query.from.id != self.chats.owner_id {
            return Ok(());
        }
        let action = query.data.as_deref().and_then(CallbackAction::parse);
        let text = match action {
            None => "Wrong data".to_string(),
            Some(CallbackAction::Follow(handle)) => {
                match follow_author(self.feed.as_ref(), self.db.as_ref(), &handle).await {
                    Ok(_) => format!("Followed https://x.com/{handle}"),
                    Err(e) => format!("Error {e:#}"),
                }
            }
            Some(CallbackAction::Unfollow(handle)) => {
                match unfollow_author(self.feed.as_ref(), self.db.as_ref(), &handle).await {
                    Ok(_) => format!("Unfollowed https://x.com/{handle}"),
                    Err(e) => format!("Error {e:#}"),
                }
            }
        };
        self.transport.answer_callback(&query.id, &text, true).await
    }

    /// Reply to the automatic forward of a relayed post with the original
    /// files and a link to the author.
    async fn on_group_message(&self, msg: &Message) -> Result<()> {
        let from_channel = msg
            .sender_chat
            .as_ref()
            .is_some_and(|c| c.id == self.chats.channel_id);
        if !msg.is_automatic_forward && !from_channel {
            return Ok(());
        }
        let Some(origin) = msg.origin_message_id() else {
            return Ok(());
        };
        let Some(entry) = self.cache.take_if_present(origin) else {
            debug!(origin = origin, "No correlation for forwarded post");
            return Ok(());
        };
        if entry.media.is_empty() {
            return Ok(());
        }

        let documents = original_documents(&entry.content_id, &entry.media, &self.fetcher).await;
        if let Err(e) = send_media(
            self.transport.as_ref(),
            msg.chat.id,
            &documents,
            Some(msg.message_id),
        )
        .await
        {
            self.notifier
                .notify(&format!("{e:#}\n\n{documents:?}"))
                .await;
            return Err(e);
        }

        let link = format!("https://x.com/{}", entry.author_handle);
        let opts = TextOptions::default().with_keyboard(follow_keyboard(&entry.author_handle));
        if let Err(e) = self.reply(msg, &link, opts).await {
            self.notifier.notify(&format!("{e:#}\n\n{link}")).await;
            return Err(e);
        }
        Ok(())
    }

    async fn on_similar_photo(&self, similar: &SimilarChannel, post: &Message) -> Result<()> {
        let Some(photo) = post.largest_photo() else {
            return Ok(());
        };
        let bytes = self.transport.download_file(&photo.file_id).await?;
        let hash = phash::hash_bytes(&bytes)
            .with_context(|| format!("Failed to hash photo in message {}", post.message_id))?;

        let matches = similar
            .index
            .check_and_insert(post.chat.id, post.message_id, hash)
            .await?;
        if matches.is_empty() {
            return Ok(());
        }

        info!(message_id = post.message_id, matches = matches.len(), "Similar images found");
        similar
            .notices
            .push(render_notice(post.chat.id, post.message_id, &matches))
            .await
    }

    /// The operator pastes a status link in private: send the item the way
    /// the channel would get it, then its original files.
    async fn on_private_message(&self, msg: &Message) -> Result<()> {
        if msg.sender_id() != Some(self.chats.owner_id) {
            return Ok(());
        }
        let Some(text) = msg.text.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(());
        };
        if !msg.starts_with_url_entity() {
            return Ok(());
        }

        let link = match parse_profile_link(text) {
            Ok(link) => link,
            Err(e) => return self.reply(msg, &e.to_string(), TextOptions::default()).await,
        };
        let Some(status_id) = link.status_id else {
            return Ok(());
        };
        let item = match self.feed.item_by_id(&status_id).await {
            Ok(item) => item,
            Err(e) => return self.reply(msg, &format!("{e:#}"), TextOptions::default()).await,
        };

        let payloads = build_payloads(&item, &self.fetcher).await;
        let sent = if payloads.is_empty() {
            let opts = TextOptions {
                markdown: true,
                disable_preview: true,
                ..Default::default()
            };
            self.reply(msg, &build_caption(&item), opts).await
        } else {
            send_media(
                self.transport.as_ref(),
                msg.chat.id,
                &payloads,
                Some(msg.message_id),
            )
            .await
            .map(|_| ())
        };
        if let Err(e) = sent {
            warn!(error = %e, id = %status_id, "Private lookup send failed");
            return self.reply(msg, &format!("{e:#}"), TextOptions::default()).await;
        }

        if item.has_media() {
            let documents = original_documents(&item.id, &item.media, &self.fetcher).await;
            if let Err(e) = send_media(
                self.transport.as_ref(),
                msg.chat.id,
                &documents,
                Some(msg.message_id),
            )
            .await
            {
                self.notifier
                    .notify(&format!("{e:#}\n\n{documents:?}\n\n{}", item.url))
                    .await;
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::correlation::CorrelationEntry;
    use crate::db::schema::create_tables;
    use crate::db::sqlite::SqliteDatabase;
    use crate::feed::{AuthorProfile, ContentItem, Media};
    use crate::relay::OutboundMedia;
    use crate::telegram::types::{Chat, MessageEntity, MessageOrigin, PhotoSize, User};
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream, StreamExt};
    use rusqlite::Connection;
    use std::sync::Mutex;

    const OWNER: i64 = 1;
    const CHANNEL: i64 = -1001;
    const GROUP: i64 = -1002;
    const SIMILAR: i64 = -1003;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Text { chat: i64, text: String, reply_to: Option<i64>, keyboard: bool },
        Media { chat: i64, kinds: Vec<&'static str>, reply_to: Option<i64> },
        Answer { text: String },
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
        file: Vec<u8>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_single(&self, chat_id: i64, media: &OutboundMedia, reply_to: Option<i64>) -> Result<i64> {
            self.sent.lock().unwrap().push(Sent::Media { chat: chat_id, kinds: vec![media.kind()], reply_to });
            Ok(10)
        }
        async fn send_album(&self, chat_id: i64, media: &[OutboundMedia], reply_to: Option<i64>) -> Result<Vec<i64>> {
            let kinds = media.iter().map(|m| m.kind()).collect();
            self.sent.lock().unwrap().push(Sent::Media { chat: chat_id, kinds, reply_to });
            Ok((10..10 + media.len() as i64).collect())
        }
        async fn send_text(&self, chat_id: i64, text: &str, opts: &TextOptions) -> Result<i64> {
            self.sent.lock().unwrap().push(Sent::Text {
                chat: chat_id,
                text: text.to_string(),
                reply_to: opts.reply_to,
                keyboard: opts.keyboard.is_some(),
            });
            Ok(20)
        }
        async fn answer_callback(&self, _: &str, text: &str, _: bool) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Answer { text: text.to_string() });
            Ok(())
        }
        async fn download_file(&self, _: &str) -> Result<Vec<u8>> {
            Ok(self.file.clone())
        }
    }

    #[derive(Default)]
    struct StubFeed {
        follows: Mutex<Vec<String>>,
        unfollows: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FeedClient for StubFeed {
        fn ranked_timeline(&self, _: usize) -> BoxStream<'_, Result<ContentItem>> {
            stream::empty().boxed()
        }
        fn chronological_timeline(&self, _: usize) -> BoxStream<'_, Result<ContentItem>> {
            stream::empty().boxed()
        }
        async fn follow(&self, handle: &str) -> Result<()> {
            self.follows.lock().unwrap().push(handle.to_string());
            Ok(())
        }
        async fn unfollow(&self, handle: &str) -> Result<()> {
            self.unfollows.lock().unwrap().push(handle.to_string());
            Ok(())
        }
        async fn author_by_handle(&self, handle: &str) -> Result<AuthorProfile> {
            Ok(AuthorProfile {
                id: format!("id-{handle}"),
                handle: handle.to_string(),
                following: false,
            })
        }
        async fn item_by_id(&self, id: &str) -> Result<ContentItem> {
            anyhow::bail!("no item {id}")
        }
    }

    struct Fixture {
        handlers: Handlers,
        transport: Arc<RecordingTransport>,
        feed: Arc<StubFeed>,
        db: Arc<SqliteDatabase>,
        cache: CorrelationCache,
    }

    fn fixture(file: Vec<u8>) -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        let db = Arc::new(SqliteDatabase::new(conn));
        let transport = Arc::new(RecordingTransport { file, ..Default::default() });
        let feed = Arc::new(StubFeed::default());
        let cache = CorrelationCache::new();
        let handlers = Handlers::new(
            transport.clone(),
            feed.clone(),
            db.clone(),
            cache.clone(),
            ChatIds { owner_id: OWNER, channel_id: CHANNEL, group_id: GROUP },
        );
        Fixture { handlers, transport, feed, db, cache }
    }

    fn chat(id: i64, kind: &str) -> Chat {
        Chat { id, kind: kind.into(), title: None }
    }

    fn user(id: i64) -> User {
        User { id, is_bot: false, first_name: "op".into(), username: None }
    }

    fn command(from: i64, text: &str) -> Update {
        let name_len = text.split(' ').next().unwrap_or_default().len();
        Update {
            update_id: 1,
            message: Some(Message {
                message_id: 5,
                from: Some(user(from)),
                sender_chat: None,
                chat: chat(from, "private"),
                text: Some(text.into()),
                entities: vec![MessageEntity { kind: "bot_command".into(), offset: 0, length: name_len, url: None }],
                photo: vec![],
                is_automatic_forward: false,
                forward_origin: None,
            }),
            channel_post: None,
            callback_query: None,
        }
    }

    #[tokio::test]
    async fn follow_command_lifts_suppression() {
        let f = fixture(vec![]);
        f.db.suppress("id-artist").await.unwrap();

        f.handlers.handle(command(OWNER, "/follow https://x.com/artist")).await.unwrap();

        assert!(!f.db.is_suppressed("id-artist").await.unwrap());
        assert_eq!(f.feed.follows.lock().unwrap().clone(), vec!["artist".to_string()]);
        assert_eq!(
            f.transport.sent(),
            vec![Sent::Text { chat: OWNER, text: "Following https://x.com/artist".into(), reply_to: Some(5), keyboard: true }]
        );
    }

    #[tokio::test]
    async fn unfollow_command_suppresses() {
        let f = fixture(vec![]);
        f.handlers.handle(command(OWNER, "/unfollow artist")).await.unwrap();
        assert!(f.db.is_suppressed("id-artist").await.unwrap());
        assert_eq!(f.feed.unfollows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commands_from_others_are_ignored() {
        let f = fixture(vec![]);
        f.handlers.handle(command(42, "/unfollow artist")).await.unwrap();
        assert!(f.transport.sent().is_empty());
        assert!(!f.db.is_suppressed("id-artist").await.unwrap());
    }

    #[tokio::test]
    async fn malformed_command_gets_usage() {
        let f = fixture(vec![]);
        f.handlers.handle(command(OWNER, "/follow a b")).await.unwrap();
        match &f.transport.sent()[..] {
            [Sent::Text { text, .. }] => assert!(text.starts_with("Invalid command format.")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn callback_with_bad_data_is_rejected() {
        let f = fixture(vec![]);
        let update = Update {
            update_id: 2,
            message: None,
            channel_post: None,
            callback_query: Some(CallbackQuery { id: "q".into(), from: user(OWNER), data: Some("block.x".into()) }),
        };
        f.handlers.handle(update).await.unwrap();
        assert_eq!(f.transport.sent(), vec![Sent::Answer { text: "Wrong data".into() }]);
    }

    #[tokio::test]
    async fn automatic_forward_gets_documents_and_author_link() {
        let f = fixture(vec![]);
        f.cache.put(
            500,
            CorrelationEntry {
                author_handle: "artist".into(),
                content_id: "42".into(),
                media: vec![Media::photo("https://pbs.twimg.com/media/a.jpg"), Media::photo("https://pbs.twimg.com/media/b.png")],
            },
        );
        let update = Update {
            update_id: 3,
            message: Some(Message {
                message_id: 900,
                from: None,
                sender_chat: Some(chat(CHANNEL, "channel")),
                chat: chat(GROUP, "supergroup"),
                text: None,
                entities: vec![],
                photo: vec![],
                is_automatic_forward: true,
                forward_origin: Some(MessageOrigin::Channel { chat: chat(CHANNEL, "channel"), message_id: 500 }),
            }),
            channel_post: None,
            callback_query: None,
        };
        f.handlers.handle(update).await.unwrap();

        assert_eq!(
            f.transport.sent(),
            vec![
                Sent::Media { chat: GROUP, kinds: vec!["document", "document"], reply_to: Some(900) },
                Sent::Text { chat: GROUP, text: "https://x.com/artist".into(), reply_to: Some(900), keyboard: true },
            ]
        );
        assert!(f.cache.is_empty());
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_fn(96, 96, |x, y| {
            let v = ((x as f32 / 8.0).sin() * 60.0 + (y as f32 / 13.0).cos() * 60.0 + 128.0) as u8;
            image::Rgb([v, v / 2, 255 - v])
        });
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn photo_post(message_id: i64) -> Update {
        Update {
            update_id: message_id,
            message: None,
            channel_post: Some(Message {
                message_id,
                from: None,
                sender_chat: Some(chat(SIMILAR, "channel")),
                chat: chat(SIMILAR, "channel"),
                text: None,
                entities: vec![],
                photo: vec![PhotoSize { file_id: "f".into(), file_unique_id: "u".into(), width: 96, height: 96, file_size: None }],
                is_automatic_forward: false,
                forward_origin: None,
            }),
            callback_query: None,
        }
    }

    #[tokio::test]
    async fn repeated_photo_queues_a_notice() {
        let f = fixture(png_bytes());
        let (queue, mut rx) = NoticeQueue::channel();
        let handlers = f.handlers.with_similar_channel(SIMILAR, queue);

        handlers.handle(photo_post(7)).await.unwrap();
        handlers.handle(photo_post(8)).await.unwrap();

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice, "Similar images:\nhttps://t.me/c/3/8\nhttps://t.me/c/3/7 0\n");
    }
}
