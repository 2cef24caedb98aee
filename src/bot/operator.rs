// Follow / unfollow as the operator sees them.
//
// Following an author lifts any suppression so their reposts can be relayed
// again; unfollowing suppresses them so reposts of their work are dropped.

use anyhow::{Context, Result};
use tracing::info;

use crate::db::Database;
use crate::feed::{AuthorProfile, FeedClient};

pub async fn follow_author(
    feed: &dyn FeedClient,
    db: &dyn Database,
    handle: &str,
) -> Result<AuthorProfile> {
    let profile = feed
        .author_by_handle(handle)
        .await
        .with_context(|| format!("Profile lookup failed for {handle}"))?;
    db.unsuppress(&profile.id).await?;
    feed.follow(&profile.handle).await?;
    info!(handle = %profile.handle, id = %profile.id, "Followed author");
    Ok(profile)
}

pub async fn unfollow_author(
    feed: &dyn FeedClient,
    db: &dyn Database,
    handle: &str,
) -> Result<AuthorProfile> {
    let profile = feed
        .author_by_handle(handle)
        .await
        .with_context(|| format!("Profile lookup failed for {handle}"))?;
    db.suppress(&profile.id).await?;
    feed.unfollow(&profile.handle).await?;
    info!(handle = %profile.handle, id = %profile.id, "Unfollowed and suppressed author");
    Ok(profile)
}

/// What a follow/unfollow button asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Follow(String),
    Unfollow(String),
}

impl CallbackAction {
    /// Parse `follow.<handle>` or `unfollow.<handle>`.
    pub fn parse(data: &str) -> Option<Self> {
        let (verb, handle) = data.split_once('.')?;
        if handle.is_empty() {
            return None;
        }
        match verb {
            "follow" => Some(Self::Follow(handle.to_string())),
            "unfollow" => Some(Self::Unfollow(handle.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_data() {
        assert_eq!(
            CallbackAction::parse("follow.some_artist"),
            Some(CallbackAction::Follow("some_artist".into()))
        );
        assert_eq!(
            CallbackAction::parse("unfollow.a"),
            Some(CallbackAction::Unfollow("a".into()))
        );
        assert_eq!(CallbackAction::parse("follow."), None);
        assert_eq!(CallbackAction::parse("block.a"), None);
        assert_eq!(CallbackAction::parse("garbage"), None);
    }
}
