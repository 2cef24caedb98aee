// Parsing of handles and profile/status links typed by the operator.

use anyhow::{bail, Context, Result};
use regex_lite::Regex;
use reqwest::Url;
use std::sync::OnceLock;

/// What an operator-supplied handle or link points at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileLink {
    pub handle: Option<String>,
    pub user_id: Option<String>,
    pub status_id: Option<String>,
}

struct Patterns {
    bare_handle: Regex,
    profile_path: Regex,
    status_path: Regex,
    web_status_path: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        bare_handle: Regex::new(r"^([a-zA-Z0-9_]{1,15})$").expect("static pattern"),
        profile_path: Regex::new(r"^/([a-zA-Z0-9_]{1,15})(/)?$").expect("static pattern"),
        status_path: Regex::new(r"^/([a-zA-Z0-9_]{1,15})/status/(\d+)(/)?$")
            .expect("static pattern"),
        web_status_path: Regex::new(r"^/i/web/status/(\d+)(/)?$").expect("static pattern"),
    })
}

/// Parse a bare handle, a profile URL, a status URL or an intent URL.
pub fn parse_profile_link(raw: &str) -> Result<ProfileLink> {
    let raw = raw.trim();
    let p = patterns();

    if p.bare_handle.is_match(raw) {
        return Ok(ProfileLink {
            handle: Some(raw.to_string()),
            ..Default::default()
        });
    }

    let url = Url::parse(raw).context("failed to parse url")?;
    let host = url.host_str().unwrap_or_default();
    if !host.ends_with("twitter.com") && !host.ends_with("x.com") {
        bail!("url is not a twitter url");
    }

    let path = url.path();
    if let Some(caps) = p.profile_path.captures(path) {
        return Ok(ProfileLink {
            handle: Some(caps[1].to_string()),
            ..Default::default()
        });
    }
    if let Some(caps) = p.status_path.captures(path) {
        return Ok(ProfileLink {
            handle: Some(caps[1].to_string()),
            status_id: Some(caps[2].to_string()),
            ..Default::default()
        });
    }
    if let Some(caps) = p.web_status_path.captures(path) {
        return Ok(ProfileLink {
            status_id: Some(caps[1].to_string()),
            ..Default::default()
        });
    }
    if path == "/intent/user" {
        let user_id = url
            .query_pairs()
            .find(|(k, _)| k == "user_id")
            .map(|(_, v)| v.into_owned());
        return Ok(ProfileLink {
            user_id,
            ..Default::default()
        });
    }

    bail!("url is not a twitter url")
}

/// Strip the query string from a media URL.
pub fn clear_query(link: &str) -> String {
    match Url::parse(link) {
        Ok(mut url) => {
            url.set_query(None);
            url.to_string()
        }
        Err(_) => link.to_string(),
    }
}

/// The lowercase file extension of a URL path, if any.
pub fn extension(link: &str) -> Option<String> {
    let path = clear_query(link);
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}
