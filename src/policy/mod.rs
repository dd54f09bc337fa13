pub mod ledger;

use std::{
    collections::{HashMap, HashSet},
    sync::LazyLock,
};

use regex::Regex;

pub use ledger::Ledger;

/// Canonical policy key for a group of hostnames that share a quota.
pub type Initiator = String;

/// Resolved classification of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Blocked,
    Limited { quota_bytes: u64 },
}

/// Process-lifetime, immutable policy table built once from the loaded
/// config. Collapsed into two maps rather than one per-host entry since
/// a zero quota and an absent entry both collapse into non-metered
/// verdicts, and block/limit are resolved by precedence, not by storage.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    blocked: HashSet<String>,
    limited: HashMap<String, u64>,
}

impl PolicyTable {
    pub fn new(blocked: HashSet<String>, limited: HashMap<String, u64>) -> Self {
        Self { blocked, limited }
    }

    /// Classifies a hostname: canonicalize to its initiator bucket, then
    /// resolve a verdict. Block takes precedence over limit.
    pub fn classify(&self, hostname: &str) -> (Initiator, Verdict) {
        let initiator = canonicalize(hostname);
        if self.blocked.contains(&initiator) {
            return (initiator, Verdict::Blocked);
        }
        if let Some(&quota_bytes) = self.limited.get(&initiator) {
            return (initiator, Verdict::Limited { quota_bytes });
        }
        (initiator, Verdict::Allow)
    }
}

// Built-in canonicalisation buckets: sibling hosts of these two services
// share one quota with their canonical domain regardless of which
// physical host a request actually hits.
static VK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"vk\.com",
        r"im\.vk\.com",
        r"st\d{1,2}-\d{1,2}\.vk\.com",
        r"queuev\d{1,2}\.vk\.com",
        r".*\.vkuseraudio\.net",
        r"sun\d-\d{1,2}\.userapi.*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("vk bucket pattern is a valid static regex"))
    .collect()
});

static YOUTUBE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"youtube\.com",
        r"i\.ytimg\.com",
        r".*yt.*\.com",
        r".*\.googlevideo\.com",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("youtube bucket pattern is a valid static regex"))
    .collect()
});

/// Maps a hostname onto a shared initiator bucket, or returns it
/// unchanged if no bucket rule matches.
pub fn canonicalize(hostname: &str) -> Initiator {
    if VK_PATTERNS.iter().any(|re| re.is_match(hostname)) {
        return "vk.com".to_string();
    }
    if YOUTUBE_PATTERNS.iter().any(|re| re.is_match(hostname)) {
        return "youtube.com".to_string();
    }
    hostname.to_string()
}
