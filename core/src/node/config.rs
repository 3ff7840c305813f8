//! Node configuration

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a Weft node
#[derive(Clone)]
pub struct NodeConfig {
    /// Repo directory holding the object-store repository and datastore
    pub repo_path: PathBuf,

    /// Whether this node runs on a mobile device (shorter flush period)
    pub is_mobile: bool,

    /// Queue flush period override; when None the mobile/desktop default
    /// applies (1 min mobile, 10 min otherwise)
    pub flush_interval: Option<Duration>,

    /// Maximum accepted clock skew on inbound block headers (seconds)
    /// Default: 3600
    pub max_block_skew_secs: i64,

    /// Maximum ancestors fetched while replaying a single inbound envelope
    /// Default: 64
    pub ancestor_fetch_budget: usize,

    /// Maximum delivery attempts before an outbox row is dropped
    /// Default: 10
    pub max_delivery_attempts: i64,

    /// Base backoff between delivery attempts (seconds), doubled per attempt
    /// Default: 60
    pub delivery_backoff_secs: i64,

    /// Backoff cap (seconds)
    /// Default: 3600
    pub delivery_backoff_cap_secs: i64,
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("repo_path", &self.repo_path)
            .field("is_mobile", &self.is_mobile)
            .field("flush_interval", &self.flush_interval)
            .field("max_block_skew_secs", &self.max_block_skew_secs)
            .field("ancestor_fetch_budget", &self.ancestor_fetch_budget)
            .field("max_delivery_attempts", &self.max_delivery_attempts)
            .field("delivery_backoff_secs", &self.delivery_backoff_secs)
            .field("delivery_backoff_cap_secs", &self.delivery_backoff_cap_secs)
            .finish()
    }
}

/// Queue flush period on mobile nodes
pub const MOBILE_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Queue flush period otherwise
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10 * 60);

impl NodeConfig {
    /// Config rooted at a repo path, with defaults
    pub fn new(repo_path: PathBuf) -> Self {
        Self {
            repo_path,
            is_mobile: false,
            flush_interval: None,
            max_block_skew_secs: 3600,
            ancestor_fetch_budget: 64,
            max_delivery_attempts: 10,
            delivery_backoff_secs: 60,
            delivery_backoff_cap_secs: 3600,
        }
    }

    /// Mark as a mobile node
    pub fn mobile(mut self) -> Self {
        self.is_mobile = true;
        self
    }

    /// Override the queue flush period
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Override the inbound clock-skew bound
    pub fn with_max_block_skew(mut self, secs: i64) -> Self {
        self.max_block_skew_secs = secs;
        self
    }

    /// Override the per-envelope ancestor fetch budget
    pub fn with_ancestor_fetch_budget(mut self, budget: usize) -> Self {
        self.ancestor_fetch_budget = budget;
        self
    }

    /// The effective flush period
    pub fn effective_flush_interval(&self) -> Duration {
        self.flush_interval.unwrap_or(if self.is_mobile {
            MOBILE_FLUSH_INTERVAL
        } else {
            DEFAULT_FLUSH_INTERVAL
        })
    }

    /// Configuration for testing (tight timings, temp-friendly)
    pub fn for_testing(repo_path: PathBuf) -> Self {
        Self {
            repo_path,
            is_mobile: false,
            flush_interval: Some(Duration::from_millis(50)),
            max_block_skew_secs: 3600,
            ancestor_fetch_budget: 64,
            max_delivery_attempts: 3,
            delivery_backoff_secs: 1,
            delivery_backoff_cap_secs: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::new(PathBuf::from("/tmp/repo"));
        assert!(!config.is_mobile);
        assert_eq!(config.max_block_skew_secs, 3600);
        assert_eq!(config.ancestor_fetch_budget, 64);
        assert_eq!(config.effective_flush_interval(), DEFAULT_FLUSH_INTERVAL);
    }

    #[test]
    fn test_mobile_flush_interval() {
        let config = NodeConfig::new(PathBuf::from("/tmp/repo")).mobile();
        assert_eq!(config.effective_flush_interval(), MOBILE_FLUSH_INTERVAL);
    }

    #[test]
    fn test_flush_override_wins() {
        let config = NodeConfig::new(PathBuf::from("/tmp/repo"))
            .mobile()
            .with_flush_interval(Duration::from_secs(5));
        assert_eq!(config.effective_flush_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_builders() {
        let config = NodeConfig::new(PathBuf::from("/r"))
            .with_max_block_skew(10)
            .with_ancestor_fetch_budget(3);
        assert_eq!(config.max_block_skew_secs, 10);
        assert_eq!(config.ancestor_fetch_budget, 3);
    }
}
