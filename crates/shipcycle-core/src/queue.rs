//! Durable priority queue model for cycle requests.
//!
//! Pure data structure: the async drain loop lives in the daemon crate.
//! Ordering is priority descending, then `requested_at` ascending; exact ties
//! keep insertion order.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default priorities: `(normal, forced)`.
const RUN_PRIORITY: (i32, i32) = (5, 10);
const DETECT_PRIORITY: (i32, i32) = (4, 8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Full cycle: detection through broadcast.
    Run,
    /// Detection-only pass.
    Detect,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Detect => "detect",
        }
    }

    pub fn default_priority(self, force: bool) -> i32 {
        let (normal, forced) = match self {
            Self::Run => RUN_PRIORITY,
            Self::Detect => DETECT_PRIORITY,
        };
        if force { forced } else { normal }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied shape of an enqueue request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRequest {
    pub requested_by: String,
    pub reason: Option<String>,
    pub force: bool,
    pub source: Option<String>,
    pub priority: Option<i32>,
}

impl JobRequest {
    pub fn by(requested_by: impl Into<String>) -> Self {
        Self {
            requested_by: requested_by.into(),
            ..Self::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub requested_at: DateTime<Utc>,
    pub requested_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub priority: i32,
}

impl QueueItem {
    pub fn new(id: String, kind: JobKind, request: JobRequest, now: DateTime<Utc>) -> Self {
        let priority = request
            .priority
            .unwrap_or_else(|| kind.default_priority(request.force));
        let requested_by = if request.requested_by.trim().is_empty() {
            "unknown".to_string()
        } else {
            request.requested_by
        };
        Self {
            id,
            kind,
            requested_at: now,
            requested_by,
            reason: request.reason,
            force: request.force,
            source: request.source,
            priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveJob {
    pub item: QueueItem,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued(QueueItem),
    /// A same-type item was already waiting; the new request was dropped.
    AlreadyQueued(QueueItem),
}

impl EnqueueOutcome {
    pub fn item(&self) -> &QueueItem {
        match self {
            Self::Queued(item) | Self::AlreadyQueued(item) => item,
        }
    }

    pub fn into_item(self) -> QueueItem {
        match self {
            Self::Queued(item) | Self::AlreadyQueued(item) => item,
        }
    }

    pub fn was_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunQueue {
    pub items: Vec<QueueItem>,
    pub active: Option<ActiveJob>,
}

impl RunQueue {
    /// Add `item` unless a non-forced request meets a queued item of the
    /// same kind.
    pub fn enqueue(&mut self, item: QueueItem) -> EnqueueOutcome {
        if !item.force
            && let Some(existing) = self.items.iter().find(|queued| queued.kind == item.kind)
        {
            return EnqueueOutcome::AlreadyQueued(existing.clone());
        }
        self.items.push(item.clone());
        self.sort();
        EnqueueOutcome::Queued(item)
    }

    fn sort(&mut self) {
        self.items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.requested_at.cmp(&b.requested_at))
        });
    }

    pub fn peek(&self) -> Option<&QueueItem> {
        self.items.first()
    }

    /// Remove and return the head of the queue.
    pub fn pop_next(&mut self) -> Option<QueueItem> {
        self.sort();
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    pub fn start(&mut self, item: QueueItem, now: DateTime<Utc>) {
        self.active = Some(ActiveJob {
            item,
            started_at: now,
        });
    }

    pub fn finish(&mut self) -> Option<ActiveJob> {
        self.active.take()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.active = None;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ─── Tests ────────────────────────────────────────────────────────
