//! Append-only audit log for flow-control events.
//!
//! Every enforcement decision that matters for a later review — sink
//! writes, refused writes, declassifications, scope lifecycle — lands
//! here as a sequence-numbered entry. Entries form a tamper-evident
//! SHA-256 hash chain: each entry records the hash of its predecessor.
//!
//! The log itself is an in-process collaborator; exporting it to durable
//! storage is the embedding application's concern.

use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Events recorded by the enforcement runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    /// A scope entered its active extent.
    ScopeOpened {
        /// The scope that opened.
        scope_id: Uuid,
        /// Its parent, if any.
        parent_id: Option<Uuid>,
        /// Effective ceiling level name.
        ceiling: String,
    },

    /// A scope left its active extent.
    ScopeClosed {
        /// The scope that closed.
        scope_id: Uuid,
        /// Whether the body completed without error.
        completed: bool,
    },

    /// A value passed a sink's ceiling check and was handed over.
    SinkWrite {
        /// The sink written to.
        sink: String,
        /// Level carried by the value.
        level: String,
    },

    /// A value was refused at a sink's ceiling check.
    SinkRefused {
        /// The sink that refused.
        sink: String,
        /// Level carried by the value.
        level: String,
        /// The sink's maximum level.
        max_level: String,
    },

    /// An explicit, justified level lowering.
    Declassified {
        /// Scope in which the declassification happened.
        scope_id: Uuid,
        /// Level before lowering.
        from: String,
        /// Level after lowering.
        to: String,
        /// The justification tag supplied by the caller.
        justification: String,
    },
}

/// One entry in the audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic sequence number, assigned by the log.
    pub sequence: u64,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The recorded event.
    pub event: FlowEvent,
    /// SHA-256 hash of the preceding entry; `None` for the first entry.
    pub prev_hash: Option<String>,
}

impl AuditEntry {
    fn new(event: FlowEvent) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            event,
            prev_hash: None,
        }
    }

    /// Compute this entry's hash.
    ///
    /// Covers all fields including `prev_hash`, so altering any entry
    /// breaks every later link in the chain.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_le_bytes());
        hasher.update(
            self.timestamp
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_le_bytes(),
        );
        hasher.update(format!("{:?}", self.event).as_bytes());
        if let Some(ref prev) = self.prev_hash {
            hasher.update(prev.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Chain verification failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The first entry carries a non-empty `prev_hash`.
    GenesisHasPrev {
        /// Sequence number of the offending entry.
        sequence: u64,
    },
    /// An entry's `prev_hash` does not match the hash of its predecessor.
    BrokenLink {
        /// Sequence number of the offending entry.
        sequence: u64,
    },
    /// Sequence numbers are not contiguous from zero.
    SequenceGap {
        /// Expected sequence number.
        expected: u64,
        /// Sequence number actually found.
        found: u64,
    },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenesisHasPrev { sequence } => {
                write!(f, "genesis entry (seq={sequence}) has a prev_hash")
            }
            Self::BrokenLink { sequence } => {
                write!(f, "entry (seq={sequence}) does not chain to its predecessor")
            }
            Self::SequenceGap { expected, found } => {
                write!(f, "sequence gap: expected {expected}, found {found}")
            }
        }
    }
}

impl std::error::Error for ChainError {}

#[derive(Debug, Default)]
struct LogInner {
    entries: Vec<AuditEntry>,
    tail_hash: Option<String>,
}

/// Shared, append-only audit log.
///
/// Cloning shares the underlying chain.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    inner: Arc<RwLock<LogInner>>,
}

impl AuditLog {
    /// Create an empty in-memory log.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Append an event. Returns the assigned sequence number.
    pub fn record(&self, event: FlowEvent) -> u64 {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut entry = AuditEntry::new(event);
        entry.sequence = inner.entries.len() as u64;
        entry.prev_hash = inner.tail_hash.clone();
        inner.tail_hash = Some(entry.hash());
        let sequence = entry.sequence;
        inner.entries.push(entry);
        sequence
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .clone()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries whose event matches a predicate.
    pub fn entries_where(&self, pred: impl Fn(&FlowEvent) -> bool) -> Vec<AuditEntry> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .iter()
            .filter(|e| pred(&e.event))
            .cloned()
            .collect()
    }

    /// Verify the hash chain end to end.
    pub fn verify_chain(&self) -> std::result::Result<(), ChainError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut prev_hash: Option<String> = None;
        for (i, entry) in inner.entries.iter().enumerate() {
            if entry.sequence != i as u64 {
                return Err(ChainError::SequenceGap {
                    expected: i as u64,
                    found: entry.sequence,
                });
            }
            match (i, &entry.prev_hash, &prev_hash) {
                (0, Some(_), _) => {
                    return Err(ChainError::GenesisHasPrev {
                        sequence: entry.sequence,
                    })
                }
                (0, None, _) => {}
                (_, stored, expected) if stored != expected => {
                    return Err(ChainError::BrokenLink {
                        sequence: entry.sequence,
                    })
                }
                _ => {}
            }
            prev_hash = Some(entry.hash());
        }
        Ok(())
    }
}
