// Cookie-authenticated client for the web timeline API.
//
// Reads go through the GraphQL endpoints the web app uses; follow and
// unfollow go through the legacy 1.1 REST endpoints. The session is the
// logged-in browser session: the auth cookie plus its CSRF token.

use std::collections::VecDeque;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::timeline::{
    self, DetailData, GraphqlResponse, HomeData, Timeline, TimelinePage, UserData,
};
use super::{AuthorProfile, ContentItem, FeedClient};

/// Default API host.
pub const DEFAULT_API_URL: &str = "https://x.com";

/// The public bearer token the web app ships with.
const WEB_BEARER_TOKEN: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

/// A GraphQL operation: persisted query id plus operation name.
#[derive(Debug, Clone, Copy)]
struct Operation {
    query_id: &'static str,
    name: &'static str,
}

const HOME_TIMELINE: Operation = Operation {
    query_id: "HJFjzBgCs16TqxewQOeLNg",
    name: "HomeTimeline",
};
const HOME_LATEST_TIMELINE: Operation = Operation {
    query_id: "DiTkXJgLqBBxCs7zaYsbtA",
    name: "HomeLatestTimeline",
};
const USER_BY_SCREEN_NAME: Operation = Operation {
    query_id: "G3KGOASz96M-Qu0nwmGXNg",
    name: "UserByScreenName",
};
const TWEET_DETAIL: Operation = Operation {
    query_id: "nBS-WpgA6ZG0CyNHD517JQ",
    name: "TweetDetail",
};

/// Largest page size the timeline endpoints accept.
const MAX_PAGE_SIZE: usize = 40;

fn features() -> serde_json::Value {
    serde_json::json!({
        "rweb_tipjar_consumption_enabled": true,
        "responsive_web_graphql_exclude_directive_enabled": true,
        "verified_phone_label_enabled": false,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "communities_web_enable_tweet_community_results_fetch": true,
        "c9s_tweet_anatomy_moderator_badge_enabled": true,
        "articles_preview_enabled": true,
        "tweetypie_unmention_optimization_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "responsive_web_twitter_article_tweet_consumption_enabled": true,
        "tweet_awards_web_tipping_enabled": false,
        "creator_subscriptions_quote_tweet_preview_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "rweb_video_timestamps_enabled": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "responsive_web_enhance_cards_enabled": false,
        "hidden_profile_subscriptions_enabled": true,
        "subscriptions_verification_info_is_identity_verified_enabled": true,
        "subscriptions_verification_info_verified_since_enabled": true,
        "highlights_tweets_tab_ui_enabled": true,
        "responsive_web_twitter_article_notes_tab_enabled": true,
        "subscriptions_feature_can_gift_premium": true,
    })
}

/// HTTP client for the logged-in web session.
pub struct XClient {
    client: reqwest::Client,
    base_url: String,
    cookie: String,
    csrf_token: String,
}

impl XClient {
    pub fn new(base_url: &str, cookie: &str, csrf_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie: cookie.to_string(),
            csrf_token: csrf_token.to_string(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(percent_decode(WEB_BEARER_TOKEN))
            .header("cookie", &self.cookie)
            .header("x-csrf-token", &self.csrf_token)
            .header("x-twitter-auth-type", "OAuth2Session")
            .header("x-twitter-active-user", "yes")
    }

    /// GET a GraphQL operation and return its `data` payload.
    async fn graphql_get<T: DeserializeOwned>(
        &self,
        op: Operation,
        variables: serde_json::Value,
    ) -> Result<T> {
        let url = format!(
            "{}/i/api/graphql/{}/{}",
            self.base_url, op.query_id, op.name
        );

        debug!(operation = op.name, "GraphQL GET request");

        let variables = variables.to_string();
        let features = features().to_string();
        let response = self
            .authorize(self.client.get(&url))
            .query(&[("variables", variables.as_str()), ("features", features.as_str())])
            .send()
            .await
            .with_context(|| format!("GraphQL request failed: {}", op.name))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("GraphQL {} returned {status}: {body}", op.name);
        }

        let body: GraphqlResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to deserialize {} response", op.name))?;

        match body.data {
            Some(data) => Ok(data),
            None => {
                let messages: Vec<_> = body.errors.into_iter().map(|e| e.message).collect();
                bail!("GraphQL {} returned no data: {}", op.name, messages.join("; "))
            }
        }
    }

    async fn rest_post(&self, path: &str, form: &[(&str, &str)]) -> Result<()> {
        let url = format!("{}/i/api/1.1/{}", self.base_url, path);
        let response = self
            .authorize(self.client.post(&url))
            .form(form)
            .send()
            .await
            .with_context(|| format!("REST request failed: {path}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("REST {path} returned {status}: {body}");
        }
        Ok(())
    }

    async fn home_page(&self, op: Operation, cursor: Option<&str>, count: usize) -> Result<TimelinePage> {
        let mut variables = serde_json::json!({
            "count": count.min(MAX_PAGE_SIZE),
            "includePromotedContent": false,
            "latestControlAvailable": true,
            "withCommunity": true,
        });
        if let Some(cursor) = cursor {
            variables["cursor"] = serde_json::Value::String(cursor.to_string());
        }

        let data: HomeData = self.graphql_get(op, variables).await?;
        let timeline = data.home.map(|h| h.home_timeline_urt).unwrap_or_default();
        let page = timeline::parse_timeline(timeline);

        debug!(
            operation = op.name,
            page_size = page.items.len(),
            has_cursor = page.bottom_cursor.is_some(),
            "Fetched timeline page"
        );

        Ok(page)
    }

    fn timeline_stream(&self, op: Operation, limit: usize) -> BoxStream<'_, Result<ContentItem>> {
        let state = PageState {
            client: self,
            op,
            limit,
            cursor: None,
            buffer: VecDeque::new(),
            yielded: 0,
            exhausted: false,
        };

        stream::unfold(state, |mut st| async move {
            loop {
                if st.yielded >= st.limit {
                    return None;
                }
                if let Some(item) = st.buffer.pop_front() {
                    st.yielded += 1;
                    return Some((Ok(item), st));
                }
                if st.exhausted {
                    return None;
                }

                let remaining = st.limit - st.yielded;
                match st.client.home_page(st.op, st.cursor.as_deref(), remaining).await {
                    Ok(page) => {
                        if page.items.is_empty()
                            || page.bottom_cursor.is_none()
                            || page.bottom_cursor == st.cursor
                        {
                            st.exhausted = true;
                        }
                        st.cursor = page.bottom_cursor;
                        st.buffer.extend(page.items);
                    }
                    Err(e) => {
                        st.exhausted = true;
                        st.buffer.clear();
                        return Some((Err(e), st));
                    }
                }
            }
        })
        .boxed()
    }
}

struct PageState<'a> {
    client: &'a XClient,
    op: Operation,
    limit: usize,
    cursor: Option<String>,
    buffer: VecDeque<ContentItem>,
    yielded: usize,
    exhausted: bool,
}

fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .into_owned()
}

#[async_trait]
impl FeedClient for XClient {
    fn ranked_timeline(&self, limit: usize) -> BoxStream<'_, Result<ContentItem>> {
        self.timeline_stream(HOME_TIMELINE, limit)
    }

    fn chronological_timeline(&self, limit: usize) -> BoxStream<'_, Result<ContentItem>> {
        self.timeline_stream(HOME_LATEST_TIMELINE, limit)
    }

    async fn follow(&self, handle: &str) -> Result<()> {
        self.rest_post(
            "friendships/create.json",
            &[("screen_name", handle), ("include_profile_interstitial_type", "1")],
        )
        .await
        .with_context(|| format!("Failed to follow @{handle}"))?;
        info!(handle = handle, "Followed account");
        Ok(())
    }

    async fn unfollow(&self, handle: &str) -> Result<()> {
        self.rest_post("friendships/destroy.json", &[("screen_name", handle)])
            .await
            .with_context(|| format!("Failed to unfollow @{handle}"))?;
        info!(handle = handle, "Unfollowed account");
        Ok(())
    }

    async fn author_by_handle(&self, handle: &str) -> Result<AuthorProfile> {
        let data: UserData = self
            .graphql_get(
                USER_BY_SCREEN_NAME,
                serde_json::json!({
                    "screen_name": handle,
                    "withSafetyModeUserFields": true,
                }),
            )
            .await
            .with_context(|| format!("Failed to look up @{handle}"))?;

        data.user
            .and_then(|u| u.result)
            .and_then(timeline::convert_profile)
            .ok_or_else(|| anyhow::anyhow!("No such account: @{handle}"))
    }

    async fn item_by_id(&self, id: &str) -> Result<ContentItem> {
        let data: DetailData = self
            .graphql_get(
                TWEET_DETAIL,
                serde_json::json!({
                    "focalTweetId": id,
                    "with_rux_injections": false,
                    "includePromotedContent": false,
                    "withCommunity": true,
                    "withVoice": true,
                    "withV2Timeline": true,
                }),
            )
            .await
            .with_context(|| format!("Failed to fetch item {id}"))?;

        let timeline: Timeline = data
            .threaded_conversation_with_injections_v2
            .unwrap_or_default();
        timeline::find_item(timeline, id).ok_or_else(|| anyhow::anyhow!("Item {id} not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_is_decoded() {
        let decoded = percent_decode(WEB_BEARER_TOKEN);
        assert!(decoded.contains('='));
        assert!(!decoded.contains("%3D"));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = XClient::new("https://x.com/", "auth_token=a", "b").unwrap();
        assert_eq!(client.base_url, "https://x.com");
    }

    #[tokio::test]
    async fn zero_limit_yields_nothing_without_fetching() {
        // Unroutable base URL: any request would fail and surface as Err.
        let client = XClient::new("http://127.0.0.1:9", "c", "t").unwrap();
        let items: Vec<_> = client.ranked_timeline(0).collect().await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_ends_the_sequence_after_one_error() {
        let client = XClient::new("http://127.0.0.1:9", "c", "t").unwrap();
        let items: Vec<_> = client.chronological_timeline(100).collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
