use crate::types::{InstanceId, MigrationId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Driver step recorded in the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JournalAction {
    MigrationStarted,
    Detached,
    Relocated,
    Attached,
    StateMigrated,
    DependentsMigrated,
    UnmappedRemoved,
    InstanceRemoved,
    MigrationCompleted,
    /// Terminal entry of an operation that failed; earlier entries of the
    /// same migration describe steps the enclosing command rolls back
    MigrationFailed,
}

impl JournalAction {
    fn tag(self) -> &'static str {
        match self {
            JournalAction::MigrationStarted => "migration_started",
            JournalAction::Detached => "detached",
            JournalAction::Relocated => "relocated",
            JournalAction::Attached => "attached",
            JournalAction::StateMigrated => "state_migrated",
            JournalAction::DependentsMigrated => "dependents_migrated",
            JournalAction::UnmappedRemoved => "unmapped_removed",
            JournalAction::InstanceRemoved => "instance_removed",
            JournalAction::MigrationCompleted => "migration_completed",
            JournalAction::MigrationFailed => "migration_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub migration_id: MigrationId,
    pub instance: Option<InstanceId>,
    pub action: JournalAction,
    pub detail: String,
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
}

impl JournalEntry {
    /// New unsealed entry; `append` fills sequence and hashes
    pub fn new(
        migration_id: MigrationId,
        instance: Option<InstanceId>,
        action: JournalAction,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            sequence: 0,
            recorded_at: Utc::now(),
            migration_id,
            instance,
            action,
            detail: detail.into(),
            prev_hash: [0u8; 32],
            hash: [0u8; 32],
        }
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Journal integrity failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("journal hash chain broken at entry {sequence}")]
pub struct IntegrityViolation {
    pub sequence: u64,
}

/// Append-only, hash-chained record of driver steps
#[derive(Debug, Default)]
pub struct MigrationJournal {
    inner: Mutex<Vec<JournalEntry>>,
}

impl MigrationJournal {
    pub fn append(&self, mut entry: JournalEntry) -> u64 {
        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map(|e| e.hash).unwrap_or([0u8; 32]);
        entry.sequence = guard.len() as u64;
        entry.prev_hash = prev_hash;
        entry.hash = compute_hash(&entry);
        let sequence = entry.sequence;
        guard.push(entry);
        sequence
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Entries of one migration operation, in order
    pub fn entries_for(&self, migration_id: MigrationId) -> Vec<JournalEntry> {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.migration_id == migration_id)
            .cloned()
            .collect()
    }

    /// Actions recorded for one node, in order
    pub fn actions_for(&self, instance: InstanceId) -> Vec<JournalAction> {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.instance == Some(instance))
            .map(|e| e.action)
            .collect()
    }

    pub fn verify_integrity(&self) -> Result<(), IntegrityViolation> {
        let guard = self.inner.lock();
        let mut prev = [0u8; 32];
        for e in guard.iter() {
            if e.prev_hash != prev || e.hash != compute_hash(e) {
                return Err(IntegrityViolation {
                    sequence: e.sequence,
                });
            }
            prev = e.hash;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn tamper(&self, index: usize, detail: &str) {
        self.inner.lock()[index].detail = detail.to_string();
    }
}

fn compute_hash(entry: &JournalEntry) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.sequence.to_le_bytes());
    hasher.update(entry.recorded_at.timestamp_micros().to_le_bytes());
    hasher.update(entry.migration_id.0.as_bytes());
    match entry.instance {
        Some(id) => {
            hasher.update([1u8]);
            hasher.update((id.0 as u64).to_le_bytes());
        }
        None => hasher.update([0u8]),
    }
    hasher.update(entry.action.tag().as_bytes());
    hasher.update([0u8]);
    hasher.update(entry.detail.as_bytes());
    hasher.update([0u8]);
    hasher.update(entry.prev_hash);
    hasher.finalize().into()
}
