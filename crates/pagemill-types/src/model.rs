use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a site is eligible for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Enabled,
    Disabled,
}

/// Whether a template may be compiled and served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatus {
    Enabled,
    Disabled,
}

/// One serving site, keyed by its unique lower-case domain.
///
/// A disabled site never reaches rendering; the page-assembly path treats it
/// the same as an unknown domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub id: i64,
    pub site_group_id: i64,
    pub domain: String,
    pub template_name: String,
    pub keyword_group_id: i64,
    pub image_group_id: i64,
    pub article_group_id: i64,
    pub baidu_token: Option<String>,
    pub analytics: Option<String>,
    pub status: SiteStatus,
}

impl SiteConfig {
    pub fn is_enabled(&self) -> bool {
        self.status == SiteStatus::Enabled
    }
}

/// Template source as stored; cache key is `(site_group_id, name)` and a
/// version bump forces recompilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: i64,
    pub site_group_id: i64,
    pub name: String,
    pub content: String,
    pub version: i32,
    pub status: TemplateStatus,
}

/// Per-template call counts for the six dynamic helpers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateAnalysis {
    pub cls: u32,
    pub random_url: u32,
    pub keyword_with_emoji: u32,
    pub random_keyword: u32,
    pub random_image: u32,
    pub random_content: u32,
}

impl TemplateAnalysis {
    /// Per-helper maximum of `self` and `other`; used to fold per-template
    /// counts into the global max that drives pool sizing.
    pub fn max(self, other: Self) -> Self {
        Self {
            cls: self.cls.max(other.cls),
            random_url: self.random_url.max(other.random_url),
            keyword_with_emoji: self.keyword_with_emoji.max(other.keyword_with_emoji),
            random_keyword: self.random_keyword.max(other.random_keyword),
            random_image: self.random_image.max(other.random_image),
            random_content: self.random_content.max(other.random_content),
        }
    }

    pub fn calls_for(&self, kind: ConsumableKind) -> u32 {
        match kind {
            ConsumableKind::Title => 1,
            ConsumableKind::Content => self.random_content,
            ConsumableKind::Cls => self.cls,
            ConsumableKind::Url => self.random_url,
            ConsumableKind::KeywordEmoji => self.keyword_with_emoji,
        }
    }
}

/// Consumable pool kinds: bounded rings refilled by background producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumableKind {
    Title,
    Content,
    Cls,
    Url,
    KeywordEmoji,
}

impl ConsumableKind {
    pub const ALL: [ConsumableKind; 5] = [
        ConsumableKind::Title,
        ConsumableKind::Content,
        ConsumableKind::Cls,
        ConsumableKind::Url,
        ConsumableKind::KeywordEmoji,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConsumableKind::Title => "title",
            ConsumableKind::Content => "content",
            ConsumableKind::Cls => "cls",
            ConsumableKind::Url => "url",
            ConsumableKind::KeywordEmoji => "keyword_emoji",
        }
    }

    /// Average per-item byte budget used by the sizing engine.
    pub fn bytes_per_item(&self) -> usize {
        match self {
            ConsumableKind::Title => 256,
            ConsumableKind::Content => 1024,
            ConsumableKind::Cls => 20,
            ConsumableKind::Url => 100,
            ConsumableKind::KeywordEmoji => 60,
        }
    }
}

/// Reusable pool kinds: in-memory corpora sampled non-destructively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReusableKind {
    Keyword,
    Image,
    Emoji,
    Article,
}

impl ReusableKind {
    pub const ALL: [ReusableKind; 4] = [
        ReusableKind::Keyword,
        ReusableKind::Image,
        ReusableKind::Emoji,
        ReusableKind::Article,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReusableKind::Keyword => "keyword",
            ReusableKind::Image => "image",
            ReusableKind::Emoji => "emoji",
            ReusableKind::Article => "article",
        }
    }
}

/// Disjoint partition of the keyword corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordGroup {
    pub id: i64,
    pub name: String,
    pub is_default: bool,
}

/// Disjoint partition of the image-URL corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGroup {
    pub id: i64,
    pub name: String,
    pub is_default: bool,
}

/// Disjoint partition of the article corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleGroup {
    pub id: i64,
    pub name: String,
    pub is_default: bool,
}

/// Rollup bucket granularity for spider-visit aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Minute,
    Hour,
    Day,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Minute => "minute",
            PeriodType::Hour => "hour",
            PeriodType::Day => "day",
        }
    }

    /// Next finer granularity for the chart-query fallback chain.
    pub fn finer(&self) -> Option<PeriodType> {
        match self {
            PeriodType::Day => Some(PeriodType::Hour),
            PeriodType::Hour => Some(PeriodType::Minute),
            PeriodType::Minute => None,
        }
    }
}

/// One raw spider visit, inserted asynchronously per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRecord {
    pub domain: String,
    pub path: String,
    pub spider_type: String,
    pub status: u16,
    pub resp_time_ms: u64,
    pub user_agent: String,
    pub remote_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One time-bucketed aggregate row written by the rollup task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupRow {
    pub period_type: PeriodType,
    pub period_start: DateTime<Utc>,
    pub spider_type: Option<String>,
    pub total: u64,
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub avg_resp_time: f64,
}

/// Severity of an operator alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// One entry in the operator alert stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub level: AlertLevel,
    pub source: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_max_is_per_helper() {
        let a = TemplateAnalysis {
            cls: 5,
            random_url: 1,
            ..Default::default()
        };
        let b = TemplateAnalysis {
            cls: 2,
            random_url: 9,
            random_content: 3,
            ..Default::default()
        };
        let m = a.max(b);
        assert_eq!(m.cls, 5);
        assert_eq!(m.random_url, 9);
        assert_eq!(m.random_content, 3);
    }

    #[test]
    fn period_fallback_chain() {
        assert_eq!(PeriodType::Day.finer(), Some(PeriodType::Hour));
        assert_eq!(PeriodType::Hour.finer(), Some(PeriodType::Minute));
        assert_eq!(PeriodType::Minute.finer(), None);
    }

    #[test]
    fn consumable_byte_budgets() {
        assert_eq!(ConsumableKind::Cls.bytes_per_item(), 20);
        assert_eq!(ConsumableKind::Content.bytes_per_item(), 1024);
    }
}
