use std::{collections::HashMap, sync::Arc};

use mea::mutex::Mutex;

/// Process-wide mapping `initiator -> bytes delivered to the client`,
/// accumulated across all connections, shared across every spawned
/// connection task.
///
/// One mutex is sufficient: contention is bounded by the number of
/// concurrent connections metered against the same initiator, and `add`
/// / `reached` never hold the lock across an await point.
#[derive(Clone, Debug)]
pub struct Ledger {
    spent: Arc<Mutex<HashMap<String, u64>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            spent: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `ledger[initiator] += n`, creating the entry at 0 if absent.
    pub async fn add(&self, initiator: &str, n: u64) {
        let mut spent = self.spent.lock().await;
        *spent.entry(initiator.to_string()).or_insert(0) += n;
    }

    /// `ledger[initiator] >= quota` (a missing entry is treated as 0).
    ///
    /// Ordering: since `add` returns only after releasing the same
    /// mutex `reached` acquires, any `reached` call issued after an
    /// `add` has returned observes that increment.
    pub async fn reached(&self, initiator: &str, quota: u64) -> bool {
        let spent = self.spent.lock().await;
        spent.get(initiator).copied().unwrap_or(0) >= quota
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accumulates_and_reached_observes_it() {
        smol::block_on(async {
            let ledger = Ledger::new();
            ledger.add("example.com", 10).await;
            ledger.add("example.com", 5).await;
            assert!(!ledger.reached("example.com", 16).await);
            assert!(ledger.reached("example.com", 15).await);
        });
    }

    #[test]
    fn missing_initiator_is_treated_as_zero() {
        smol::block_on(async {
            let ledger = Ledger::new();
            assert!(ledger.reached("never-seen.example", 0).await);
            assert!(!ledger.reached("never-seen.example", 1).await);
        });
    }

    #[test]
    fn concurrent_adds_to_the_same_initiator_all_land() {
        smol::block_on(async {
            let ledger = Ledger::new();
            let tasks: Vec<_> = (0..50)
                .map(|_| {
                    let ledger = ledger.clone();
                    smol::spawn(async move { ledger.add("shared.example", 1).await })
                })
                .collect();
            for t in tasks {
                t.await;
            }
            assert!(ledger.reached("shared.example", 50).await);
            assert!(!ledger.reached("shared.example", 51).await);
        });
    }
}
