use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Search-engine crawler families the detector recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpiderKind {
    Googlebot,
    Bingbot,
    Baiduspider,
    YandexBot,
    DuckDuckBot,
    Sogou,
    Bytespider,
}

impl SpiderKind {
    pub const ALL: [SpiderKind; 7] = [
        SpiderKind::Googlebot,
        SpiderKind::Bingbot,
        SpiderKind::Baiduspider,
        SpiderKind::YandexBot,
        SpiderKind::DuckDuckBot,
        SpiderKind::Sogou,
        SpiderKind::Bytespider,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SpiderKind::Googlebot => "googlebot",
            SpiderKind::Bingbot => "bingbot",
            SpiderKind::Baiduspider => "baiduspider",
            SpiderKind::YandexBot => "yandexbot",
            SpiderKind::DuckDuckBot => "duckduckbot",
            SpiderKind::Sogou => "sogou",
            SpiderKind::Bytespider => "bytespider",
        }
    }

    /// Case-insensitive user-agent substrings that mark a candidate.
    pub fn ua_tokens(&self) -> &'static [&'static str] {
        match self {
            SpiderKind::Googlebot => &["googlebot", "google-inspectiontool", "adsbot-google"],
            SpiderKind::Bingbot => &["bingbot", "adidxbot", "bingpreview"],
            SpiderKind::Baiduspider => &["baiduspider"],
            SpiderKind::YandexBot => &["yandexbot", "yandeximages"],
            SpiderKind::DuckDuckBot => &["duckduckbot", "duckduckgo-favicons-bot"],
            SpiderKind::Sogou => &["sogou web spider", "sogou inst spider"],
            SpiderKind::Bytespider => &["bytespider"],
        }
    }

    /// DNS suffixes a verified reverse lookup must land under.
    pub fn dns_suffixes(&self) -> &'static [&'static str] {
        match self {
            SpiderKind::Googlebot => &[".googlebot.com", ".google.com"],
            SpiderKind::Bingbot => &[".search.msn.com"],
            SpiderKind::Baiduspider => &[".baidu.com", ".baidu.jp"],
            SpiderKind::YandexBot => &[".yandex.ru", ".yandex.net", ".yandex.com"],
            SpiderKind::DuckDuckBot => &[".duckduckgo.com"],
            SpiderKind::Sogou => &[".sogou.com"],
            SpiderKind::Bytespider => &[".bytedance.com"],
        }
    }

    pub fn from_name(name: &str) -> Option<SpiderKind> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

/// Cached verdict for one (truncated) user-agent string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiderDetection {
    pub is_spider: bool,
    pub spider_type: Option<SpiderKind>,
    pub dns_verified: bool,
    pub ttl_expiry: DateTime<Utc>,
}

impl SpiderDetection {
    /// Negative verdict, cached to avoid repeated token scans.
    pub fn negative(ttl_expiry: DateTime<Utc>) -> Self {
        Self {
            is_spider: false,
            spider_type: None,
            dns_verified: false,
            ttl_expiry,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.ttl_expiry
    }

    pub fn spider_name(&self) -> &'static str {
        self.spider_type.map(|k| k.name()).unwrap_or("none")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_lowercase() {
        for kind in SpiderKind::ALL {
            for token in kind.ua_tokens() {
                assert_eq!(*token, token.to_lowercase());
            }
        }
    }

    #[test]
    fn name_round_trip() {
        for kind in SpiderKind::ALL {
            assert_eq!(SpiderKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(SpiderKind::from_name("mozilla"), None);
    }
}
