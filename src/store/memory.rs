use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{FinishedKind, JobStore};
use crate::errors::{JobRsError, Result};

#[derive(Default)]
struct MemoryState {
    /// member -> score
    scores: HashMap<String, u64>,
    /// (score, member), ordered like a Redis sorted set
    ordered: BTreeSet<(u64, String)>,
    completed: VecDeque<String>,
    failed: VecDeque<String>,
}

impl MemoryState {
    fn history(&mut self, kind: FinishedKind) -> &mut VecDeque<String> {
        match kind {
            FinishedKind::Completed => &mut self.completed,
            FinishedKind::Failed => &mut self.failed,
        }
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }
}

/// An in-process store with the same semantics as the Redis one.
/// Clones share state, so a test can hand one clone to the queue and keep another.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the backend were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(JobRsError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        self.state
            .lock()
            .map_err(|e| JobRsError::StoreUnavailable(e.to_string()))
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn push(&self, member: &str, score: u64) -> Result<()> {
        let mut state = self.state()?;
        state.remove(member);
        state.scores.insert(member.to_string(), score);
        state.ordered.insert((score, member.to_string()));
        Ok(())
    }

    async fn claim(&self, now: u64) -> Result<Option<String>> {
        let mut state = self.state()?;
        let first = match state.ordered.iter().next() {
            Some((score, member)) if *score <= now => member.clone(),
            _ => return Ok(None),
        };
        state.remove(&first);
        Ok(Some(first))
    }

    async fn remove(&self, member: &str) -> Result<bool> {
        Ok(self.state()?.remove(member))
    }

    async fn range(&self, max_score: Option<u64>, limit: usize) -> Result<Vec<(String, u64)>> {
        let state = self.state()?;
        Ok(state
            .ordered
            .iter()
            .take_while(|(score, _)| max_score.map_or(true, |max| *score <= max))
            .take(limit)
            .map(|(score, member)| (member.clone(), *score))
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state()?.scores.len())
    }

    async fn record_finished(&self, kind: FinishedKind, member: &str, keep: usize) -> Result<()> {
        if keep == 0 {
            return Ok(());
        }
        let mut state = self.state()?;
        let history = state.history(kind);
        history.push_front(member.to_string());
        history.truncate(keep);
        Ok(())
    }

    async fn finished(&self, kind: FinishedKind, limit: usize) -> Result<Vec<String>> {
        let mut state = self.state()?;
        Ok(state.history(kind).iter().take(limit).cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state()?;
        *state = MemoryState::default();
        Ok(())
    }
}
