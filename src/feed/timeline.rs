// Timeline GraphQL response types and their conversion to ContentItem.
//
// The web API nests everything several levels deep and changes shape
// between deploys, so every field is optional or defaulted and conversion
// drops entries it can't make sense of instead of failing the page.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{Author, AuthorProfile, ContentItem, Media, MediaKind, Mention};

const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

// -- Envelope --

#[derive(Debug, Deserialize)]
pub struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct HomeData {
    pub home: Option<Home>,
}

#[derive(Debug, Deserialize)]
pub struct Home {
    pub home_timeline_urt: Timeline,
}

#[derive(Debug, Deserialize)]
pub struct DetailData {
    pub threaded_conversation_with_injections_v2: Option<Timeline>,
}

#[derive(Debug, Deserialize)]
pub struct UserData {
    pub user: Option<UserResults>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Deserialize)]
pub struct Instruction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(rename = "entryId")]
    pub entry_id: String,
    pub content: EntryContent,
}

#[derive(Debug, Deserialize)]
pub struct EntryContent {
    #[serde(rename = "itemContent")]
    pub item_content: Option<ItemContent>,
    #[serde(default)]
    pub items: Vec<ModuleItem>,
    pub value: Option<String>,
    #[serde(rename = "cursorType")]
    pub cursor_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModuleItem {
    pub item: ModuleItemInner,
}

#[derive(Debug, Deserialize)]
pub struct ModuleItemInner {
    #[serde(rename = "itemContent")]
    pub item_content: Option<ItemContent>,
}

#[derive(Debug, Deserialize)]
pub struct ItemContent {
    pub tweet_results: Option<TweetResults>,
    #[serde(rename = "promotedMetadata")]
    pub promoted_metadata: Option<serde_json::Value>,
    #[serde(rename = "socialContext")]
    pub social_context: Option<serde_json::Value>,
}

// -- Tweets --

#[derive(Debug, Deserialize)]
pub struct TweetResults {
    pub result: Option<TweetResult>,
}

#[derive(Debug, Deserialize)]
pub struct TweetResult {
    #[serde(rename = "__typename")]
    pub typename: Option<String>,
    pub rest_id: Option<String>,
    pub core: Option<TweetCore>,
    pub legacy: Option<TweetLegacy>,
    pub views: Option<Views>,
    /// Present on `TweetWithVisibilityResults` wrappers.
    pub tweet: Option<Box<TweetResult>>,
}

#[derive(Debug, Deserialize)]
pub struct TweetCore {
    pub user_results: UserResults,
}

#[derive(Debug, Deserialize)]
pub struct Views {
    pub count: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TweetLegacy {
    #[serde(default)]
    pub full_text: String,
    pub created_at: String,
    #[serde(default)]
    pub favorite_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub entities: Entities,
    pub extended_entities: Option<ExtendedEntities>,
    pub retweeted_status_result: Option<Box<TweetResults>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub hashtags: Vec<Hashtag>,
    #[serde(default)]
    pub user_mentions: Vec<UserMention>,
}

#[derive(Debug, Deserialize)]
pub struct Hashtag {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct UserMention {
    pub id_str: String,
    pub screen_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtendedEntities {
    #[serde(default)]
    pub media: Vec<RawMedia>,
}

#[derive(Debug, Deserialize)]
pub struct RawMedia {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_url_https: String,
    pub ext_alt_text: Option<String>,
    pub original_info: Option<OriginalInfo>,
    pub video_info: Option<VideoInfo>,
}

#[derive(Debug, Deserialize)]
pub struct OriginalInfo {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
pub struct VideoInfo {
    pub duration_millis: Option<u64>,
    #[serde(default)]
    pub variants: Vec<VideoVariant>,
}

#[derive(Debug, Deserialize)]
pub struct VideoVariant {
    pub bitrate: Option<u64>,
    pub content_type: String,
    pub url: String,
}

// -- Users --

#[derive(Debug, Deserialize)]
pub struct UserResults {
    pub result: Option<UserResult>,
}

#[derive(Debug, Deserialize)]
pub struct UserResult {
    pub rest_id: Option<String>,
    pub core: Option<UserCore>,
    pub legacy: Option<UserLegacy>,
    pub relationship_perspectives: Option<RelationshipPerspectives>,
}

#[derive(Debug, Deserialize)]
pub struct UserCore {
    pub screen_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RelationshipPerspectives {
    #[serde(default)]
    pub following: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserLegacy {
    pub screen_name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub following: bool,
    pub url: Option<String>,
    pub entities: Option<UserEntities>,
}

#[derive(Debug, Deserialize)]
pub struct UserEntities {
    pub url: Option<UrlEntity>,
}

#[derive(Debug, Deserialize)]
pub struct UrlEntity {
    #[serde(default)]
    pub urls: Vec<ExpandedUrl>,
}

#[derive(Debug, Deserialize)]
pub struct ExpandedUrl {
    pub expanded_url: Option<String>,
}

/// One page of a home timeline.
#[derive(Debug, Default)]
pub struct TimelinePage {
    pub items: Vec<ContentItem>,
    pub bottom_cursor: Option<String>,
}

/// Convert a timeline into relay items plus the cursor for the next page.
///
/// Promoted entries are dropped. Entries with a social context ("Suggested
/// for you", "X liked") are marked as recommended. Conversation modules
/// become their root item with the remaining items attached as `thread`.
pub fn parse_timeline(timeline: Timeline) -> TimelinePage {
    let mut page = TimelinePage::default();

    for instruction in timeline.instructions {
        if instruction.kind != "TimelineAddEntries" {
            continue;
        }
        for entry in instruction.entries {
            let id = entry.entry_id.as_str();
            if id.starts_with("cursor-bottom-") || entry.content.cursor_type.as_deref() == Some("Bottom") {
                page.bottom_cursor = entry.content.value.clone();
                continue;
            }
            if id.starts_with("tweet-") {
                if let Some(item) = entry.content.item_content.and_then(convert_entry_item) {
                    page.items.push(item);
                }
                continue;
            }
            if id.contains("conversation") {
                let mut module = entry
                    .content
                    .items
                    .into_iter()
                    .filter_map(|m| m.item.item_content)
                    .filter_map(convert_entry_item);
                if let Some(mut root) = module.next() {
                    root.thread = module.collect();
                    page.items.push(root);
                }
                continue;
            }
            debug!(entry_id = id, "Skipping unsupported timeline entry");
        }
    }

    page
}

/// Find the focal item in a conversation timeline.
pub fn find_item(timeline: Timeline, id: &str) -> Option<ContentItem> {
    parse_timeline(timeline)
        .items
        .into_iter()
        .flat_map(|item| {
            let thread = item.thread.clone();
            std::iter::once(item).chain(thread)
        })
        .find(|item| item.id == id)
}

fn convert_entry_item(content: ItemContent) -> Option<ContentItem> {
    if content.promoted_metadata.is_some() {
        return None;
    }
    let recommended = content.social_context.is_some();
    let mut item = content.tweet_results?.result.and_then(convert_tweet)?;
    item.recommended = recommended;
    Some(item)
}

/// Convert a tweet result, unwrapping visibility wrappers.
pub fn convert_tweet(result: TweetResult) -> Option<ContentItem> {
    let result = if result.typename.as_deref() == Some("TweetWithVisibilityResults") {
        *result.tweet?
    } else {
        result
    };

    let id = result.rest_id?;
    let legacy = result.legacy?;
    let author = result.core?.user_results.result.and_then(convert_user)?;

    let created_at = DateTime::parse_from_str(&legacy.created_at, CREATED_AT_FORMAT)
        .ok()?
        .with_timezone(&Utc);

    let media = legacy
        .extended_entities
        .map(|e| e.media.into_iter().filter_map(convert_media).collect())
        .unwrap_or_default();

    let reposted = legacy
        .retweeted_status_result
        .and_then(|r| r.result)
        .and_then(convert_tweet)
        .map(Box::new);

    let url = format!("https://x.com/{}/status/{}", author.handle, id);

    Some(ContentItem {
        id,
        created_at,
        favorite_count: legacy.favorite_count,
        repost_count: legacy.retweet_count,
        reply_count: legacy.reply_count,
        view_count: result
            .views
            .and_then(|v| v.count)
            .and_then(|c| c.parse().ok()),
        media,
        text: legacy.full_text,
        hashtags: legacy.entities.hashtags.into_iter().map(|h| h.text).collect(),
        mentions: legacy
            .entities
            .user_mentions
            .into_iter()
            .map(|m| Mention {
                id: m.id_str,
                handle: m.screen_name,
            })
            .collect(),
        url,
        reposted,
        recommended: false,
        thread: Vec::new(),
        author,
    })
}

fn convert_user(user: UserResult) -> Option<Author> {
    let id = user.rest_id?;
    let legacy = user.legacy;
    let handle = user
        .core
        .and_then(|c| c.screen_name)
        .or_else(|| legacy.as_ref().and_then(|l| l.screen_name.clone()))?;
    let following = legacy.as_ref().is_some_and(|l| l.following)
        || user.relationship_perspectives.is_some_and(|r| r.following);
    let (description, url) = match legacy {
        Some(l) => {
            let expanded = l
                .entities
                .and_then(|e| e.url)
                .and_then(|u| u.urls.into_iter().find_map(|u| u.expanded_url));
            (l.description, expanded.or(l.url).unwrap_or_default())
        }
        None => (String::new(), String::new()),
    };
    Some(Author {
        id,
        handle,
        following,
        description,
        url,
    })
}

/// Convert a user lookup result into a profile.
pub fn convert_profile(user: UserResult) -> Option<AuthorProfile> {
    convert_user(user).map(|a| AuthorProfile {
        id: a.id,
        handle: a.handle,
        following: a.following,
    })
}

fn convert_media(raw: RawMedia) -> Option<Media> {
    let (width, height) = raw
        .original_info
        .map(|o| (Some(o.width), Some(o.height)))
        .unwrap_or((None, None));

    let kind = match raw.kind.as_str() {
        "photo" => MediaKind::Photo,
        "video" => MediaKind::Video,
        "animated_gif" => MediaKind::AnimatedGif,
        other => {
            debug!(kind = other, "Skipping unknown media type");
            return None;
        }
    };

    match kind {
        MediaKind::Photo => Some(Media {
            kind,
            url: raw.media_url_https,
            alt_text: raw.ext_alt_text.filter(|s| !s.is_empty()),
            width,
            height,
            duration_ms: None,
            thumb_url: None,
        }),
        MediaKind::Video | MediaKind::AnimatedGif => {
            let info = raw.video_info?;
            let best = info
                .variants
                .into_iter()
                .filter(|v| v.content_type == "video/mp4")
                .max_by_key(|v| v.bitrate.unwrap_or(0))?;
            Some(Media {
                kind,
                url: best.url,
                alt_text: raw.ext_alt_text.filter(|s| !s.is_empty()),
                width,
                height,
                duration_ms: info.duration_millis,
                thumb_url: Some(raw.media_url_https),
            })
        }
    }
}
