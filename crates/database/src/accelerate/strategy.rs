use crate::error::DbError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Upper bound on tags attached to one cached result or one invalidation.
pub const MAX_TAGS: usize = 5;
/// Upper bound on the length of a single tag.
pub const MAX_TAG_LEN: usize = 64;

/// Per-call caching directive.
///
/// `ttl` is how long a result is served as fresh; `swr` extends that window
/// with stale-while-revalidate, where the stale value is returned immediately
/// and refreshed in the background. Both are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStrategy {
    pub ttl: Option<u64>,
    pub swr: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CacheStrategy {
    pub fn ttl(secs: u64) -> Self {
        Self { ttl: Some(secs), ..Self::default() }
    }

    pub fn swr(secs: u64) -> Self {
        Self { swr: Some(secs), ..Self::default() }
    }

    pub fn with_swr(mut self, secs: u64) -> Self {
        self.swr = Some(secs);
        self
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn fresh_for(&self) -> Duration {
        Duration::from_secs(self.ttl.unwrap_or(0))
    }

    pub fn stale_for(&self) -> Duration {
        Duration::from_secs(self.swr.unwrap_or(0))
    }

    pub fn validate(&self) -> Result<(), DbError> {
        if self.ttl.unwrap_or(0) == 0 && self.swr.unwrap_or(0) == 0 {
            return Err(DbError::InvalidCacheStrategy(
                "a cache strategy needs a non-zero ttl or swr".to_string(),
            ));
        }
        validate_tags(&self.tags)
    }
}

/// Tags are 1 to 64 characters of ASCII letters, digits and underscores.
pub fn validate_tags(tags: &[String]) -> Result<(), DbError> {
    if tags.len() > MAX_TAGS {
        return Err(DbError::InvalidCacheStrategy(format!(
            "at most {MAX_TAGS} tags are allowed, got {}",
            tags.len()
        )));
    }
    for tag in tags {
        if tag.is_empty() || tag.len() > MAX_TAG_LEN {
            return Err(DbError::InvalidCacheStrategy(format!(
                "tag `{tag}` must be between 1 and {MAX_TAG_LEN} characters"
            )));
        }
        if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DbError::InvalidCacheStrategy(format!(
                "tag `{tag}` may only contain letters, digits and underscores"
            )));
        }
    }
    Ok(())
}

/// How a read was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Served from the cache within its ttl.
    Ttl,
    /// Served stale from the cache while a refresh runs in the background.
    Swr,
    /// Not cached (or expired); the store was queried and the result cached.
    Miss,
    /// No caching directive applied; the store was queried directly.
    None,
}

/// Metadata returned by `AccelerateQuery::with_accelerate_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccelerateInfo {
    pub cache_status: CacheStatus,
    pub request_id: Uuid,
    /// When the returned data was fetched from the store.
    pub last_modified: DateTime<Utc>,
}

/// Tags whose cached results should be evicted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateInput {
    pub tags: Vec<String>,
}

impl InvalidateInput {
    pub fn tags<S: Into<String>>(tags: impl IntoIterator<Item = S>) -> Self {
        Self { tags: tags.into_iter().map(Into::into).collect() }
    }
}

/// Acknowledgement of an invalidation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReceipt {
    pub request_id: Uuid,
    /// Number of cached results removed.
    pub evicted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_needs_a_window() {
        assert!(CacheStrategy::default().validate().is_err());
        assert!(CacheStrategy::ttl(0).validate().is_err());
        assert!(CacheStrategy::ttl(60).validate().is_ok());
        assert!(CacheStrategy::swr(30).validate().is_ok());
    }

    #[test]
    fn tags_are_restricted() {
        assert!(CacheStrategy::ttl(1).with_tags(["users_list", "Tag9"]).validate().is_ok());
        assert!(CacheStrategy::ttl(1).with_tags(["has-dash"]).validate().is_err());
        assert!(CacheStrategy::ttl(1).with_tags([""]).validate().is_err());
        assert!(CacheStrategy::ttl(1).with_tags(["x".repeat(MAX_TAG_LEN + 1)]).validate().is_err());
        assert!(CacheStrategy::ttl(1).with_tags(["a", "b", "c", "d", "e", "f"]).validate().is_err());
    }

    #[test]
    fn windows_convert_to_durations() {
        let strategy = CacheStrategy::ttl(60).with_swr(15);
        assert_eq!(strategy.fresh_for(), Duration::from_secs(60));
        assert_eq!(strategy.stale_for(), Duration::from_secs(15));
    }
}
