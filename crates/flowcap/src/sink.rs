//! Output sinks and the single runtime choke point for writes.
//!
//! A sink is any boundary a value can escape through: a log line, a trace
//! span, a cache entry, an outbound model call. Each registered sink
//! declares the maximum capability level it may accept. The registry is
//! built once from configuration and never mutated, so consulting it on
//! the hot path needs no locking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::audit::FlowEvent;
use crate::config::Policy;
use crate::error::{FlowError, Result};
use crate::lattice::Level;
use crate::owned::Owned;

/// The kind of boundary a sink represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// A log writer.
    Log,
    /// A trace exporter.
    Trace,
    /// A cache store.
    Cache,
    /// An outbound call (model invocation, webhook, ...).
    ExternalCall,
}

/// A registered sink: name, ceiling, kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sink {
    /// The sink's registered name.
    pub name: String,
    /// The maximum capability level this sink accepts.
    pub max_level: Level,
    /// What kind of boundary this is.
    pub kind: SinkKind,
}

/// Immutable registry of declared sinks.
#[derive(Debug, Clone, Default)]
pub struct SinkRegistry {
    sinks: BTreeMap<String, Sink>,
}

impl SinkRegistry {
    /// Register a sink. Idempotent by name: re-registering an identical
    /// declaration is a no-op, while re-registering with a different
    /// ceiling or kind is a configuration error.
    pub(crate) fn register(&mut self, name: &str, max_level: Level, kind: SinkKind) -> Result<()> {
        if let Some(existing) = self.sinks.get(name) {
            if existing.max_level == max_level && existing.kind == kind {
                return Ok(());
            }
            return Err(FlowError::config(format!(
                "sink '{name}' re-registered with a different declaration"
            )));
        }
        self.sinks.insert(
            name.to_string(),
            Sink {
                name: name.to_string(),
                max_level,
                kind,
            },
        );
        Ok(())
    }

    /// Look up a sink by name.
    pub fn get(&self, name: &str) -> Option<&Sink> {
        self.sinks.get(name)
    }

    /// All registered sinks, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &Sink> {
        self.sinks.values()
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sinks are registered.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Policy {
    /// Check a value against a sink's ceiling and, if it flows, unwrap it.
    ///
    /// This is the single runtime choke point through which every sink
    /// write must pass. On success the raw value is returned for the
    /// caller to hand to the actual sink, and an audit event is recorded.
    /// On failure nothing reaches the sink and the caller gets a
    /// [`FlowError::Leak`] carrying the sink name and both levels. An
    /// unregistered sink name fails closed with [`FlowError::UnknownSink`].
    pub fn check_and_consume<T>(&self, sink_name: &str, owned: Owned<T>) -> Result<T> {
        let level_name = self.lattice().name(owned.level()).to_string();

        let Some(sink) = self.sinks().get(sink_name) else {
            tracing::warn!(sink = sink_name, level = %level_name, "write refused: unknown sink");
            return Err(FlowError::UnknownSink {
                sink: sink_name.to_string(),
            });
        };

        if self.lattice().leq(owned.level(), sink.max_level) {
            tracing::debug!(
                sink = sink_name,
                kind = ?sink.kind,
                level = %level_name,
                "sink write permitted"
            );
            self.audit().record(FlowEvent::SinkWrite {
                sink: sink_name.to_string(),
                level: level_name,
            });
            Ok(owned.into_value())
        } else {
            let max_name = self.lattice().name(sink.max_level).to_string();
            tracing::warn!(
                sink = sink_name,
                level = %level_name,
                max_level = %max_name,
                "leak blocked at sink"
            );
            self.audit().record(FlowEvent::SinkRefused {
                sink: sink_name.to_string(),
                level: level_name.clone(),
                max_level: max_name.clone(),
            });
            Err(FlowError::Leak {
                sink: sink_name.to_string(),
                owned_level: level_name,
                max_level: max_name,
            })
        }
    }
}
