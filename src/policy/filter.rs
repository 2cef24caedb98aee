// Deny-list classifier for low-value reposts and prompt-bait hashtags.
//
// Hashtag campaigns ("#見た人は...", "#フォロワーさんに...") and re-uploads of
// old work are common on art timelines and make poor relays. Patterns are
// compiled once at construction; regex-lite's ASCII-only `\W` and `\b` are
// what the Japanese patterns rely on (kana count as non-word characters).

use regex_lite::Regex;

const HASHTAG_SUBSTRINGS: &[&str] = &[
    "フォロー",
    "フォロワー",
    "連休",
    "見た人",
    "自分が",
    "晒そう",
    "晒す",
    "貼る",
];

const HASHTAG_PATTERNS: &[&str] = &[
    r"^いい\W+の日$",
    r"を(見|み)せてください$",
    r"見てみましょう$",
    r"^自分の",
    r"^今までで",
    r"^太ももは",
    r"^見た",
    r"^今(年|月)",
    r"^あなたの",
    r"^(春|夏|秋|冬)が終わり",
    r"^独学でここまで",
    r"一本勝負$",
    r"^みんなさん",
    r"(?i)^aiart(work|community)?$",
    r"(?i)^midjourney$",
    r"(?i)^(stable|waifu)diffusion(art)?$",
    r"(?i)^dreambooth$",
    r"(?i)^novelai$",
    r"(?i)^AIイラスト$",
];

const TEXT_SUBSTRINGS: &[&str] = &["再掲", "過去絵", "去年", "あなたのサークル", "貴方のサークル"];

const TEXT_PATTERNS: &[&str] = &[r"(?i)\bwip\b"];

/// Bio and profile-link keywords that mark an illustrator or animator.
const CREATOR_KEYWORDS: &[&str] = &[
    "illustrator",
    "pixiv",
    "skeb",
    "potofu",
    "fanbox",
    "patreon",
    "rkgk",
    "アニメーション",
    "animator",
    "アニメーター",
    "原画",
    "二原",
    "作監",
];

/// Compiled deny lists. Build once and share.
#[derive(Debug)]
pub struct ContentFilter {
    hashtag_patterns: Vec<Regex>,
    text_patterns: Vec<Regex>,
}

impl ContentFilter {
    pub fn new() -> Self {
        Self {
            hashtag_patterns: compile(HASHTAG_PATTERNS),
            text_patterns: compile(TEXT_PATTERNS),
        }
    }

    /// True if the item looks like a re-upload, a hashtag campaign entry or
    /// AI-generated work.
    pub fn is_repost<S: AsRef<str>>(&self, text: &str, hashtags: &[S]) -> bool {
        for tag in hashtags {
            let tag = tag.as_ref();
            if HASHTAG_SUBSTRINGS.iter().any(|s| tag.contains(s)) {
                return true;
            }
            if self.hashtag_patterns.iter().any(|re| re.is_match(tag)) {
                return true;
            }
        }

        TEXT_SUBSTRINGS.iter().any(|s| text.contains(s))
            || self.text_patterns.iter().any(|re| re.is_match(text))
    }

    /// True if an author's bio or profile link mentions a creator keyword.
    pub fn is_creator(&self, bio: &str, url: &str) -> bool {
        looks_like_creator(bio) || looks_like_creator(url)
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn looks_like_creator(text: &str) -> bool {
    let lower = text.to_lowercase();
    CREATOR_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid deny pattern {p}: {e}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(t: &[&str]) -> Vec<String> {
        t.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn all_patterns_compile() {
        let f = ContentFilter::new();
        assert_eq!(f.hashtag_patterns.len(), HASHTAG_PATTERNS.len());
        assert_eq!(f.text_patterns.len(), TEXT_PATTERNS.len());
    }

    #[test]
    fn follower_campaign_hashtag_is_rejected() {
        let f = ContentFilter::new();
        assert!(f.is_repost("new drawing", &tags(&["フォロワーさんに見てほしい"])));
    }

    #[test]
    fn day_hashtag_uses_ascii_non_word() {
        let f = ContentFilter::new();
        assert!(f.is_repost("", &tags(&["いい夫婦の日"])));
        assert!(!f.is_repost("", &tags(&["いいの日"])));
        // ASCII letters are word characters, so they don't satisfy \W.
        assert!(!f.is_repost("", &tags(&["いいabcの日"])));
    }

    #[test]
    fn ai_hashtags_are_case_insensitive() {
        let f = ContentFilter::new();
        for tag in ["AIArt", "aiartwork", "Midjourney", "StableDiffusionArt", "NovelAI", "aiイラスト"] {
            assert!(f.is_repost("", &tags(&[tag])), "{tag}");
        }
        assert!(!f.is_repost("", &tags(&["aiartist"])));
    }

    #[test]
    fn text_markers() {
        let f = ContentFilter::new();
        assert!(f.is_repost("再掲です", &tags(&[])));
        assert!(f.is_repost("still a WIP!", &tags(&[])));
        assert!(!f.is_repost("wipe the slate", &tags(&[])));
        assert!(!f.is_repost("finished piece", &tags(&["original"])));
    }

    #[test]
    fn creator_keywords_match_bio_or_url() {
        let f = ContentFilter::new();
        assert!(f.is_creator("Freelance Illustrator", ""));
        assert!(f.is_creator("", "https://www.pixiv.net/users/1"));
        assert!(f.is_creator("TVアニメ原画", ""));
        assert!(!f.is_creator("cat pictures", "https://example.com"));
    }
}
