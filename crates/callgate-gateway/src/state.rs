//! Shared application state and the registry of live calls

use crate::config::GatewayConfig;
use callgate_voice::{CallHandle, SessionStats, UtteranceHandler};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub responder: Arc<dyn UtteranceHandler>,
    pub calls: Arc<CallRegistry>,
}

impl AppState {
    pub fn new(config: GatewayConfig, responder: Arc<dyn UtteranceHandler>) -> Self {
        Self {
            config: Arc::new(config),
            responder,
            calls: Arc::new(CallRegistry::default()),
        }
    }
}

struct CallEntry {
    call_id: String,
    started_at: DateTime<Utc>,
    handle: CallHandle,
}

/// Point-in-time view of one call for `/calls`
#[derive(Debug, Clone, Serialize)]
pub struct CallSummary {
    pub call_id: String,
    pub stream_sid: String,
    pub started_at: DateTime<Utc>,
    pub stats: SessionStats,
}

/// Live calls keyed by stream SID, which is unique per socket; a carrier may
/// reuse a call SID across streams. Holds handles only; each call's state
/// stays in its actor.
#[derive(Default)]
pub struct CallRegistry {
    calls: DashMap<String, CallEntry>,
}

impl CallRegistry {
    pub fn insert(&self, stream_sid: &str, handle: CallHandle) {
        self.calls.insert(
            stream_sid.to_string(),
            CallEntry {
                call_id: handle.call_id().to_string(),
                started_at: Utc::now(),
                handle,
            },
        );
    }

    pub fn remove(&self, stream_sid: &str) {
        self.calls.remove(stream_sid);
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Summaries sorted by start time, oldest first.
    pub fn snapshot(&self) -> Vec<CallSummary> {
        let mut calls: Vec<CallSummary> = self
            .calls
            .iter()
            .map(|entry| CallSummary {
                call_id: entry.call_id.clone(),
                stream_sid: entry.key().clone(),
                started_at: entry.started_at,
                stats: entry.handle.stats(),
            })
            .collect();
        calls.sort_by_key(|c| c.started_at);
        calls
    }
}
