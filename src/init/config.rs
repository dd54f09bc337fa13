use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::policy::PolicyTable;

/// On-disk shape of the policy config: a black-list of bare hostnames
/// and a mapping from hostname to a positive byte quota.
///
/// A hostname appearing in both lists is legal input — block precedence
/// resolves the conflict at classification time, not here.
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    #[serde(rename = "black-list", default)]
    pub black_list: Vec<String>,
    #[serde(default)]
    pub limited: HashMap<String, u64>,
}

impl ProxyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading policy config {}", path.display()))?;
        let cfg: ProxyConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing policy config {}", path.display()))?;
        for (host, quota) in &cfg.limited {
            if *quota == 0 {
                bail!("limited quota for {host} must be a positive integer, got 0");
            }
        }
        Ok(cfg)
    }

    pub fn into_policy_table(self) -> PolicyTable {
        let blocked: HashSet<String> = self.black_list.into_iter().collect();
        PolicyTable::new(blocked, self.limited)
    }
}

/// The two pre-loaded HTML bodies served on block/limit events. Read
/// once at startup and shared by reference (not copied) across every
/// connection.
#[derive(Debug, Clone)]
pub struct ResponseBodies {
    pub block_html: Arc<str>,
    pub limit_html: Arc<str>,
}

impl ResponseBodies {
    pub fn load(block_page: &Path, limit_page: &Path) -> Result<Self> {
        let block_html: Arc<str> = fs::read_to_string(block_page)
            .with_context(|| format!("reading block page {}", block_page.display()))?
            .into();
        let limit_html: Arc<str> = fs::read_to_string(limit_page)
            .with_context(|| format!("reading limit page {}", limit_page.display()))?
            .into();
        Ok(Self {
            block_html,
            limit_html,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn scratch_path(name: &str) -> std::path::PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("meterproxy-test-{name}-{n}"))
    }

    #[test]
    fn loads_black_list_and_limited_map() {
        let path = scratch_path("config-ok.json");
        fs::write(
            &path,
            r#"{"black-list": ["bad.example"], "limited": {"slow.example": 1000}}"#,
        )
        .unwrap();
        let cfg = ProxyConfig::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(cfg.black_list, vec!["bad.example".to_string()]);
        assert_eq!(cfg.limited.get("slow.example"), Some(&1000));

        let table = cfg.into_policy_table();
        assert_eq!(
            table.classify("bad.example").1,
            crate::policy::Verdict::Blocked
        );
        assert_eq!(
            table.classify("slow.example").1,
            crate::policy::Verdict::Limited { quota_bytes: 1000 }
        );
    }

    #[test]
    fn rejects_zero_quota() {
        let path = scratch_path("config-zero.json");
        fs::write(&path, r#"{"black-list": [], "limited": {"h": 0}}"#).unwrap();
        let result = ProxyConfig::load(&path);
        fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        let path = scratch_path("config-bad.json");
        fs::write(&path, "not json").unwrap();
        let result = ProxyConfig::load(&path);
        fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = scratch_path("config-missing.json");
        assert!(ProxyConfig::load(&path).is_err());
    }
}
