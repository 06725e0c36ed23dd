//! Kind-specific item producers invoked per batch step by refill workers.
//!
//! Producers draw only from in-memory corpora and therefore never block;
//! a producer that cannot synthesize emits its kind's fallback instead.

use crate::reusable::{ReusablePools, EMOJI_GROUP};
use pagemill_types::ConsumableKind;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Title emitted when the keyword corpus is empty. Never an error: the page
/// must still render.
pub const TITLE_FALLBACK: &str = "Welcome";

/// Everything but unreserved characters is escaped in generated slugs.
const SLUG_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'&')
    .add(b'=')
    .add(b'+');

const CLS_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789_-";
const CLS_FIRST: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// One synthesis step. `None` means the producer currently has nothing to
/// emit (the worker ends its batch early).
pub trait ItemProducer: Send + Sync {
    fn kind(&self) -> ConsumableKind;
    fn produce(&self) -> Option<String>;
}

/// `kw1 emoji1 kw2 emoji2 kw3` composite titles.
pub struct TitleProducer {
    pools: Arc<ReusablePools>,
    underflows: Arc<AtomicU64>,
}

impl TitleProducer {
    pub fn new(pools: Arc<ReusablePools>, underflows: Arc<AtomicU64>) -> Self {
        Self { pools, underflows }
    }
}

impl ItemProducer for TitleProducer {
    fn kind(&self) -> ConsumableKind {
        ConsumableKind::Title
    }

    fn produce(&self) -> Option<String> {
        let Some(group_id) = self.pools.keywords.default_group() else {
            self.underflows.fetch_add(1, Ordering::Relaxed);
            return Some(TITLE_FALLBACK.to_string());
        };
        let keywords = self.pools.keywords.get_random(group_id, 3);
        if keywords.len() < 3 {
            self.underflows.fetch_add(1, Ordering::Relaxed);
            return Some(TITLE_FALLBACK.to_string());
        }
        let emojis = self.pools.emojis.get_random(EMOJI_GROUP, 2);
        let (e1, e2) = match emojis.as_slice() {
            [a, b, ..] => (a.as_str(), b.as_str()),
            [a] => (a.as_str(), a.as_str()),
            [] => ("", ""),
        };
        Some(format!(
            "{}{}{}{}{}",
            keywords[0], e1, keywords[1], e2, keywords[2]
        ))
    }
}

/// 1–3 article bodies concatenated; empty group emits the empty sentinel
/// and raises the exhaustion counter the alerting side watches.
pub struct ContentProducer {
    pools: Arc<ReusablePools>,
    exhausted: Arc<AtomicU64>,
}

impl ContentProducer {
    pub fn new(pools: Arc<ReusablePools>, exhausted: Arc<AtomicU64>) -> Self {
        Self { pools, exhausted }
    }
}

impl ItemProducer for ContentProducer {
    fn kind(&self) -> ConsumableKind {
        ConsumableKind::Content
    }

    fn produce(&self) -> Option<String> {
        let Some(group_id) = self.pools.articles.default_group() else {
            self.exhausted.fetch_add(1, Ordering::Relaxed);
            return Some(String::new());
        };
        let available = self
            .pools
            .articles
            .get_all(group_id)
            .map(|g| g.len())
            .unwrap_or(0);
        // 1 to 3 distinct bodies, never more than the group holds.
        let count = rand::thread_rng().gen_range(1..=3).min(available.max(1));
        let bodies = self.pools.articles.get_random(group_id, count);
        if bodies.is_empty() {
            self.exhausted.fetch_add(1, Ordering::Relaxed);
            return Some(String::new());
        }
        Some(bodies.join("\n"))
    }
}

/// Pseudo-random CSS identifiers: a letter then 3..=8 of `[a-z0-9_-]`.
pub struct ClsProducer;

impl ItemProducer for ClsProducer {
    fn kind(&self) -> ConsumableKind {
        ConsumableKind::Cls
    }

    fn produce(&self) -> Option<String> {
        let mut rng = rand::thread_rng();
        let tail_len = rng.gen_range(3..=8);
        let mut cls = String::with_capacity(1 + tail_len);
        cls.push(*CLS_FIRST.choose(&mut rng).expect("non-empty alphabet") as char);
        for _ in 0..tail_len {
            cls.push(*CLS_ALPHABET.choose(&mut rng).expect("non-empty alphabet") as char);
        }
        Some(cls)
    }
}

/// Site-relative paths of 1–3 percent-encoded keyword slugs.
pub struct UrlProducer {
    pools: Arc<ReusablePools>,
}

impl UrlProducer {
    pub fn new(pools: Arc<ReusablePools>) -> Self {
        Self { pools }
    }
}

impl ItemProducer for UrlProducer {
    fn kind(&self) -> ConsumableKind {
        ConsumableKind::Url
    }

    fn produce(&self) -> Option<String> {
        let segments = rand::thread_rng().gen_range(1..=3);
        let slugs = self
            .pools
            .keywords
            .default_group()
            .map(|g| self.pools.keywords.get_random(g, segments))
            .unwrap_or_default();

        let mut path = String::from("/");
        if slugs.is_empty() {
            // No corpus yet; emit a numeric slug so links stay valid.
            path.push_str(&format!("p{}", rand::thread_rng().gen_range(1000..=999_999)));
            return Some(path);
        }
        for (i, slug) in slugs.iter().enumerate() {
            if i > 0 {
                path.push('/');
            }
            path.push_str(&utf8_percent_encode(slug, SLUG_ESCAPE).to_string());
        }
        Some(path)
    }
}

/// Keyword plus one random emoji.
pub struct KeywordEmojiProducer {
    pools: Arc<ReusablePools>,
}

impl KeywordEmojiProducer {
    pub fn new(pools: Arc<ReusablePools>) -> Self {
        Self { pools }
    }
}

impl ItemProducer for KeywordEmojiProducer {
    fn kind(&self) -> ConsumableKind {
        ConsumableKind::KeywordEmoji
    }

    fn produce(&self) -> Option<String> {
        let keyword = self
            .pools
            .keywords
            .default_group()
            .and_then(|g| self.pools.keywords.get_random(g, 1).pop())?;
        let emoji = self
            .pools
            .emojis
            .get_random(EMOJI_GROUP, 1)
            .pop()
            .unwrap_or_default();
        Some(format!("{keyword}{emoji}"))
    }
}

/// The five producers plus the counters the monitoring side watches.
pub struct ProducerSet {
    pub title: Arc<dyn ItemProducer>,
    pub content: Arc<dyn ItemProducer>,
    pub cls: Arc<dyn ItemProducer>,
    pub url: Arc<dyn ItemProducer>,
    pub keyword_emoji: Arc<dyn ItemProducer>,
    pub title_underflows: Arc<AtomicU64>,
    pub content_exhausted: Arc<AtomicU64>,
}

impl ProducerSet {
    pub fn new(pools: Arc<ReusablePools>) -> Self {
        let title_underflows = Arc::new(AtomicU64::new(0));
        let content_exhausted = Arc::new(AtomicU64::new(0));
        Self {
            title: Arc::new(TitleProducer::new(pools.clone(), title_underflows.clone())),
            content: Arc::new(ContentProducer::new(
                pools.clone(),
                content_exhausted.clone(),
            )),
            cls: Arc::new(ClsProducer),
            url: Arc::new(UrlProducer::new(pools.clone())),
            keyword_emoji: Arc::new(KeywordEmojiProducer::new(pools)),
            title_underflows,
            content_exhausted,
        }
    }

    pub fn for_kind(&self, kind: ConsumableKind) -> Arc<dyn ItemProducer> {
        match kind {
            ConsumableKind::Title => self.title.clone(),
            ConsumableKind::Content => self.content.clone(),
            ConsumableKind::Cls => self.cls.clone(),
            ConsumableKind::Url => self.url.clone(),
            ConsumableKind::KeywordEmoji => self.keyword_emoji.clone(),
        }
    }
}
