// Caption rendering in Telegram's MarkdownV2 dialect.
//
// The item text and permalink are escaped, then the first occurrence of each
// mention and hashtag is rewritten into a link back to the source site.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::feed::{ContentItem, MediaKind};

/// Characters MarkdownV2 requires to be backslash-escaped.
const RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

/// Query-component encoding: everything but unreserved characters.
const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn escape_markdown_v2(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + s.len() / 4);
    for c in s.chars() {
        if RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn query_escape(s: &str) -> String {
    utf8_percent_encode(s, QUERY).to_string().replace("%20", "+")
}

/// Text plus permalink, with mention and hashtag links.
pub fn build_caption(item: &ContentItem) -> String {
    let text = item.text.replace('＃', "#");
    let mut caption = format!(
        "{}\n\n{}",
        escape_markdown_v2(&text),
        escape_markdown_v2(&item.url)
    );

    for mention in &item.mentions {
        let handle = escape_markdown_v2(&mention.handle);
        caption = caption.replacen(
            &format!("@{handle}"),
            &format!("[@{handle}](https://x\\.com/{handle})"),
            1,
        );
    }

    for tag in &item.hashtags {
        let escaped = escape_markdown_v2(tag);
        caption = caption.replacen(
            &format!("\\#{escaped}"),
            &format!(
                "[\\#{escaped}](https://x\\.com/hashtag/{})",
                escape_markdown_v2(&query_escape(tag))
            ),
            1,
        );
    }

    caption
}

/// Caption with numbered alt texts appended, one per described attachment.
pub fn build_caption_with_alt_text(item: &ContentItem) -> String {
    let mut caption = build_caption(item);
    for (i, media) in item.media.iter().enumerate() {
        let alt = match media.kind {
            MediaKind::Photo | MediaKind::Video => media.alt_text.as_deref(),
            MediaKind::AnimatedGif => None,
        };
        if let Some(alt) = alt.filter(|a| !a.is_empty()) {
            caption.push_str(&format!("\n\n\\[{}\\] {}", i + 1, escape_markdown_v2(alt)));
        }
    }
    caption
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Author, Media, Mention};
    use chrono::Utc;

    fn item(text: &str) -> ContentItem {
        ContentItem {
            id: "100".into(),
            author: Author {
                id: "7".into(),
                handle: "artist".into(),
                ..Default::default()
            },
            created_at: Utc::now(),
            favorite_count: 0,
            repost_count: 0,
            reply_count: 0,
            view_count: None,
            media: vec![],
            text: text.into(),
            hashtags: vec![],
            mentions: vec![],
            url: "https://x.com/artist/status/100".into(),
            reposted: None,
            recommended: false,
            thread: vec![],
        }
    }

    #[test]
    fn escapes_reserved_characters() {
        assert_eq!(escape_markdown_v2("a.b-c!"), "a\\.b\\-c\\!");
        assert_eq!(escape_markdown_v2("(x)[y]"), "\\(x\\)\\[y\\]");
        assert_eq!(escape_markdown_v2("日本語"), "日本語");
    }

    #[test]
    fn caption_has_text_blank_line_and_escaped_url() {
        let c = build_caption(&item("done!"));
        assert_eq!(c, "done\\!\n\nhttps://x\\.com/artist/status/100");
    }

    #[test]
    fn mentions_and_hashtags_become_links() {
        let mut it = item("thanks @some_friend ＃オリジナル #fan art");
        it.mentions.push(Mention {
            id: "1".into(),
            handle: "some_friend".into(),
        });
        it.hashtags = vec!["オリジナル".into(), "fan".into()];
        let c = build_caption(&it);
        assert!(c.contains("[@some\\_friend](https://x\\.com/some\\_friend)"), "{c}");
        assert!(
            c.contains("[\\#オリジナル](https://x\\.com/hashtag/%E3%82%AA%E3%83%AA%E3%82%B8%E3%83%8A%E3%83%AB)"),
            "{c}"
        );
        assert!(c.contains("[\\#fan](https://x\\.com/hashtag/fan) art"), "{c}");
    }

    #[test]
    fn alt_texts_are_numbered_by_position() {
        let mut it = item("two pics");
        let mut a = Media::photo("https://pbs.twimg.com/media/a.jpg");
        a.alt_text = None;
        let mut b = Media::photo("https://pbs.twimg.com/media/b.jpg");
        b.alt_text = Some("a red fox.".into());
        it.media = vec![a, b];
        let c = build_caption_with_alt_text(&it);
        assert!(c.ends_with("\n\n\\[2\\] a red fox\\."), "{c}");
        assert!(!c.contains("\\[1\\]"));
    }

    #[test]
    fn query_escape_uses_plus_for_space() {
        assert_eq!(query_escape("a b"), "a+b");
        assert_eq!(query_escape("a-b_c.d~e"), "a-b_c.d~e");
    }
}
