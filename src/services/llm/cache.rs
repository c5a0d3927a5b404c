//! Result cache keyed by request fingerprint, plus the per-fingerprint
//! in-flight slots that keep concurrent identical requests to one paid call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use moka::sync::Cache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::types::AnalysisResult;
use crate::error::AnalysisError;
use crate::models::Table;

/// What one request for a fingerprint produced; waiters reuse it as is.
pub type SharedOutcome = Result<Arc<AnalysisResult>, AnalysisError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash of the problem text, the table content digest and the compact flag.
    pub fn compute(problem: &str, table: &Table, compact: bool) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((problem.len() as u64).to_le_bytes());
        hasher.update(problem.as_bytes());
        hasher.update(table.content_digest());
        hasher.update([u8::from(compact)]);
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..12])
    }
}

type Slot = Arc<AsyncMutex<Option<SharedOutcome>>>;
type Slots = Arc<Mutex<HashMap<Fingerprint, Slot>>>;

/// Process-lifetime cache. Entries never expire; they leave only through
/// [`ResultCache::clear`] or by being overwritten.
pub struct ResultCache {
    entries: Cache<Fingerprint, Arc<AnalysisResult>>,
    in_flight: Slots,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<AnalysisResult>> {
        self.entries.get(fingerprint)
    }

    pub fn insert(&self, fingerprint: Fingerprint, result: Arc<AnalysisResult>) {
        self.entries.insert(fingerprint, result);
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
        tracing::info!("Result cache cleared");
    }

    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until no other holder works on `fingerprint`, then claims it.
    /// The claim is released when the returned guard drops.
    pub async fn acquire(&self, fingerprint: &Fingerprint) -> InFlightGuard {
        let handle = SlotHandle {
            fingerprint: fingerprint.clone(),
            slots: Arc::clone(&self.in_flight),
        };
        let slot = {
            let mut slots = self.in_flight.lock();
            Arc::clone(slots.entry(fingerprint.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        InFlightGuard {
            guard,
            _handle: handle,
        }
    }

    /// Fingerprints currently claimed or waited on.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }
}

struct SlotHandle {
    fingerprint: Fingerprint,
    slots: Slots,
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        // Waiters clone the slot under this lock, so a count of one means the map is the last holder.
        let idle = slots
            .get(&self.fingerprint)
            .map_or(false, |slot| Arc::strong_count(slot) == 1);
        if idle {
            slots.remove(&self.fingerprint);
        }
    }
}

/// Exclusive claim on one fingerprint. Field order matters: the lock is
/// released before the slot bookkeeping runs.
pub struct InFlightGuard {
    guard: OwnedMutexGuard<Option<SharedOutcome>>,
    _handle: SlotHandle,
}

impl InFlightGuard {
    /// Outcome left by a holder that overlapped with this one, if any.
    pub fn shared_outcome(&self) -> Option<SharedOutcome> {
        self.guard.clone()
    }

    /// Leaves `outcome` for callers still waiting on this fingerprint.
    pub fn publish(&mut self, outcome: &SharedOutcome) {
        *self.guard = Some(outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, Value};
    use crate::services::llm::types::{AxisBindings, VisualizationSpec, VizType};
    use std::time::Duration;

    fn table(values: &[i64]) -> Table {
        Table::new(vec![
            Column::new("a", values.iter().map(|&v| Value::Int(v)).collect()),
            Column::new("b", values.iter().map(|&v| Value::Int(v * 2)).collect()),
        ])
        .unwrap()
    }

    fn result(problem: &str) -> Arc<AnalysisResult> {
        let spec = VisualizationSpec {
            viz_type: VizType::Histogram,
            title: "t".into(),
            bindings: AxisBindings {
                x_axis: Some("a".into()),
                ..Default::default()
            },
            justification: "j".into(),
            best_practices: vec![],
        };
        Arc::new(AnalysisResult {
            problem: problem.into(),
            analysis: "a".into(),
            visualizations: [spec.clone(), spec.clone(), spec],
        })
    }

    #[test]
    fn fingerprint_tracks_every_input() {
        let t = table(&[1, 2, 3]);
        let base = Fingerprint::compute("why", &t, true);
        assert_eq!(base, Fingerprint::compute("why", &table(&[1, 2, 3]), true));
        assert_ne!(base, Fingerprint::compute("why not", &t, true));
        assert_ne!(base, Fingerprint::compute("why", &t, false));
        assert_ne!(base, Fingerprint::compute("why", &table(&[1, 2, 4]), true));
        assert_eq!(base.as_str().len(), 64);
    }

    #[test]
    fn clear_removes_every_entry() {
        let cache = ResultCache::new();
        let t = table(&[1, 2, 3]);
        let fp = Fingerprint::compute("q", &t, true);
        cache.insert(fp.clone(), result("q"));
        assert_eq!(cache.get(&fp).unwrap().problem, "q");
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.get(&fp).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn slots_serialize_one_fingerprint_and_are_released() {
        let cache = Arc::new(ResultCache::new());
        let fp = Fingerprint::compute("q", &table(&[1, 2, 3]), true);

        let first = cache.acquire(&fp).await;
        assert_eq!(cache.in_flight_len(), 1);

        let waiter = {
            let cache = Arc::clone(&cache);
            let fp = fp.clone();
            tokio::spawn(async move {
                let _slot = cache.acquire(&fp).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn waiters_see_the_published_outcome() {
        let cache = Arc::new(ResultCache::new());
        let fp = Fingerprint::compute("q", &table(&[1, 2, 3]), true);

        let mut leader = cache.acquire(&fp).await;
        assert!(leader.shared_outcome().is_none());

        let waiter = {
            let cache = Arc::clone(&cache);
            let fp = fp.clone();
            tokio::spawn(async move { cache.acquire(&fp).await.shared_outcome() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.publish(&Ok(result("q")));
        drop(leader);

        let seen = waiter.await.unwrap();
        assert_eq!(seen.unwrap().unwrap().problem, "q");
        assert_eq!(cache.in_flight_len(), 0);

        // Once every holder has left, the next caller starts clean.
        assert!(cache.acquire(&fp).await.shared_outcome().is_none());
    }

    #[tokio::test]
    async fn different_fingerprints_do_not_block() {
        let cache = ResultCache::new();
        let a = Fingerprint::compute("a", &table(&[1, 2, 3]), true);
        let b = Fingerprint::compute("b", &table(&[1, 2, 3]), true);
        let _a = cache.acquire(&a).await;
        let _b = tokio::time::timeout(Duration::from_secs(1), cache.acquire(&b))
            .await
            .unwrap();
        assert_eq!(cache.in_flight_len(), 2);
    }
}
