//! Reusable corpora: per-group in-memory slabs sampled non-destructively.
//!
//! Each kind keeps one corpus per group. Rebuilds swap an `Arc` under the
//! group map's write lock, so a reader that started before a reload keeps
//! its pre-reload snapshot; writers of the same kind serialize on a
//! per-kind mutex.

use pagemill_types::ports::CorpusStore;
use pagemill_types::{Result, ReusableKind};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Emoji fallback used until the stored set is loaded (or when it is empty).
const BUILTIN_EMOJIS: &[&str] = &[
    "✨", "🔥", "⭐", "💎", "🚀", "🌟", "🎯", "💡", "🏆", "📌", "🎁", "🌈",
];

/// One group's items in raw and render-ready form.
#[derive(Debug, Default)]
pub struct CorpusGroup {
    pub raw: Vec<String>,
    pub escaped: Vec<String>,
}

impl CorpusGroup {
    fn build(kind: ReusableKind, raw: Vec<String>) -> Self {
        let escaped = match kind {
            // Keywords and image URLs land in markup; articles are already
            // HTML bodies and emojis are plain symbols.
            ReusableKind::Keyword | ReusableKind::Image => raw
                .iter()
                .map(|s| html_escape::encode_quoted_attribute(s).into_owned())
                .collect(),
            ReusableKind::Article | ReusableKind::Emoji => raw.clone(),
        };
        Self { raw, escaped }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// All groups of one reusable kind.
pub struct ReusableCorpus {
    kind: ReusableKind,
    groups: RwLock<HashMap<i64, Arc<CorpusGroup>>>,
    default_group: RwLock<Option<i64>>,
    /// Serializes writers of this kind across groups.
    writer: tokio::sync::Mutex<()>,
}

impl ReusableCorpus {
    pub fn new(kind: ReusableKind) -> Self {
        Self {
            kind,
            groups: RwLock::new(HashMap::new()),
            default_group: RwLock::new(None),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    pub fn kind(&self) -> ReusableKind {
        self.kind
    }

    /// Constant-time snapshot of one group. The returned `Arc` stays valid
    /// across concurrent reloads.
    pub fn get_all(&self, group_id: i64) -> Option<Arc<CorpusGroup>> {
        self.groups.read().get(&group_id).cloned()
    }

    /// Sample `k` raw items: without replacement when the group is large
    /// enough, with replacement otherwise.
    pub fn get_random(&self, group_id: i64, k: usize) -> Vec<String> {
        let Some(group) = self.get_all(group_id) else {
            return Vec::new();
        };
        if group.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut rng = rand::thread_rng();
        if k <= group.len() {
            group
                .raw
                .choose_multiple(&mut rng, k)
                .cloned()
                .collect()
        } else {
            (0..k)
                .filter_map(|_| group.raw.choose(&mut rng).cloned())
                .collect()
        }
    }

    /// Sample `k` render-ready (escaped) items.
    pub fn get_random_escaped(&self, group_id: i64, k: usize) -> Vec<String> {
        let Some(group) = self.get_all(group_id) else {
            return Vec::new();
        };
        if group.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut rng = rand::thread_rng();
        if k <= group.len() {
            group
                .escaped
                .choose_multiple(&mut rng, k)
                .cloned()
                .collect()
        } else {
            (0..k)
                .filter_map(|_| group.escaped.choose(&mut rng).cloned())
                .collect()
        }
    }

    /// Append items and atomically swap the rebuilt group in.
    pub async fn append(&self, group_id: i64, items: Vec<String>) {
        let _guard = self.writer.lock().await;
        let mut raw = self
            .get_all(group_id)
            .map(|g| g.raw.clone())
            .unwrap_or_default();
        raw.extend(items);
        let rebuilt = Arc::new(CorpusGroup::build(self.kind, raw));
        self.groups.write().insert(group_id, rebuilt);
        debug!(kind = self.kind.name(), group_id, "Corpus group appended");
    }

    /// Replace one group wholesale.
    pub async fn replace(&self, group_id: i64, items: Vec<String>) {
        let _guard = self.writer.lock().await;
        let rebuilt = Arc::new(CorpusGroup::build(self.kind, items));
        self.groups.write().insert(group_id, rebuilt);
    }

    /// Default group for producers that are not bound to a site.
    pub fn default_group(&self) -> Option<i64> {
        (*self.default_group.read()).or_else(|| self.groups.read().keys().next().copied())
    }

    pub fn set_default_group(&self, group_id: Option<i64>) {
        *self.default_group.write() = group_id;
    }

    /// `(group_id, size)` pairs for telemetry.
    pub fn group_sizes(&self) -> Vec<(i64, usize)> {
        let mut sizes: Vec<_> = self
            .groups
            .read()
            .iter()
            .map(|(id, g)| (*id, g.len()))
            .collect();
        sizes.sort_unstable_by_key(|(id, _)| *id);
        sizes
    }

    pub fn total_items(&self) -> usize {
        self.groups.read().values().map(|g| g.len()).sum()
    }

    /// Estimated resident bytes across raw and escaped forms.
    pub fn memory_bytes(&self) -> usize {
        self.groups
            .read()
            .values()
            .map(|g| {
                g.raw.iter().map(String::len).sum::<usize>()
                    + g.escaped.iter().map(String::len).sum::<usize>()
            })
            .sum()
    }
}

/// The four reusable corpora plus their storage collaborator.
pub struct ReusablePools {
    store: Arc<dyn CorpusStore>,
    pub keywords: ReusableCorpus,
    pub images: ReusableCorpus,
    pub emojis: ReusableCorpus,
    pub articles: ReusableCorpus,
}

/// Synthetic group id for the kind-wide emoji set.
pub const EMOJI_GROUP: i64 = 0;

impl ReusablePools {
    pub fn new(store: Arc<dyn CorpusStore>) -> Self {
        Self {
            store,
            keywords: ReusableCorpus::new(ReusableKind::Keyword),
            images: ReusableCorpus::new(ReusableKind::Image),
            emojis: ReusableCorpus::new(ReusableKind::Emoji),
            articles: ReusableCorpus::new(ReusableKind::Article),
        }
    }

    pub fn corpus(&self, kind: ReusableKind) -> &ReusableCorpus {
        match kind {
            ReusableKind::Keyword => &self.keywords,
            ReusableKind::Image => &self.images,
            ReusableKind::Emoji => &self.emojis,
            ReusableKind::Article => &self.articles,
        }
    }

    /// Load every group of every kind from the source of truth.
    pub async fn load_all(&self) -> Result<()> {
        for kind in ReusableKind::ALL {
            self.refresh_all(kind).await?;
        }
        info!(
            keywords = self.keywords.total_items(),
            images = self.images.total_items(),
            emojis = self.emojis.total_items(),
            articles = self.articles.total_items(),
            "Reusable corpora loaded"
        );
        Ok(())
    }

    /// Rebuild every group of one kind.
    pub async fn refresh_all(&self, kind: ReusableKind) -> Result<()> {
        match kind {
            ReusableKind::Keyword => {
                let groups = self.store.keyword_groups().await?;
                self.keywords
                    .set_default_group(groups.iter().find(|g| g.is_default).map(|g| g.id));
                for group in groups {
                    let items = self.store.keywords(group.id).await?;
                    self.keywords.replace(group.id, items).await;
                }
            }
            ReusableKind::Image => {
                let groups = self.store.image_groups().await?;
                self.images
                    .set_default_group(groups.iter().find(|g| g.is_default).map(|g| g.id));
                for group in groups {
                    let items = self.store.images(group.id).await?;
                    self.images.replace(group.id, items).await;
                }
            }
            ReusableKind::Article => {
                let groups = self.store.article_groups().await?;
                self.articles
                    .set_default_group(groups.iter().find(|g| g.is_default).map(|g| g.id));
                for group in groups {
                    let items = self.store.articles(group.id).await?;
                    self.articles.replace(group.id, items).await;
                }
            }
            ReusableKind::Emoji => {
                let mut symbols = self.store.emojis().await?;
                if symbols.is_empty() {
                    warn!("Stored emoji set is empty, falling back to builtin set");
                    symbols = BUILTIN_EMOJIS.iter().map(|s| s.to_string()).collect();
                }
                self.emojis.replace(EMOJI_GROUP, symbols).await;
            }
        }
        debug!(kind = kind.name(), "Reusable corpus refreshed");
        Ok(())
    }

    /// Rebuild one group of one kind after an upstream mutation.
    pub async fn reload_group(&self, kind: ReusableKind, group_id: i64) -> Result<()> {
        let items = match kind {
            ReusableKind::Keyword => self.store.keywords(group_id).await?,
            ReusableKind::Image => self.store.images(group_id).await?,
            ReusableKind::Article => self.store.articles(group_id).await?,
            ReusableKind::Emoji => {
                return self.refresh_all(ReusableKind::Emoji).await;
            }
        };
        self.corpus(kind).replace(group_id, items).await;
        info!(kind = kind.name(), group_id, "Corpus group reloaded");
        Ok(())
    }

    pub fn refresh_kind_by_name(&self, name: &str) -> Option<ReusableKind> {
        match name {
            "keywords" | "keyword" => Some(ReusableKind::Keyword),
            "images" | "image" => Some(ReusableKind::Image),
            "articles" | "article" => Some(ReusableKind::Article),
            "emojis" | "emoji" => Some(ReusableKind::Emoji),
            _ => None,
        }
    }
}
