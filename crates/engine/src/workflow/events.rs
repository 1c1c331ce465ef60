use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{Error, Result};

/// Engagement signal reported for a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Opened,
    Clicked,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Opened => write!(f, "opened"),
            EventKind::Clicked => write!(f, "clicked"),
        }
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "opened" => Ok(EventKind::Opened),
            "clicked" => Ok(EventKind::Clicked),
            other => Err(Error::ConditionEval(format!("unknown event kind '{}'", other))),
        }
    }
}

#[derive(Debug, Default)]
struct EventFlags {
    opened: AtomicBool,
    clicked: AtomicBool,
}

impl EventFlags {
    fn flag(&self, kind: EventKind) -> &AtomicBool {
        match kind {
            EventKind::Opened => &self.opened,
            EventKind::Clicked => &self.clicked,
        }
    }
}

/// Table of observed engagement events, keyed by recipient.
///
/// Flags only ever go from false to true. The outer lock is taken for
/// writing only when a new recipient is inserted; setting a flag on a known
/// recipient is a single atomic swap.
#[derive(Debug)]
pub struct EventState {
    recipients: RwLock<HashMap<String, Arc<EventFlags>>>,
    generation: watch::Sender<u64>,
}

impl Default for EventState {
    fn default() -> Self {
        Self::new()
    }
}

impl EventState {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            recipients: RwLock::new(HashMap::new()),
            generation,
        }
    }

    /// Recipients are matched case-insensitively.
    pub fn normalize(recipient: &str) -> String {
        recipient.trim().to_lowercase()
    }

    /// Set a flag. Returns `true` only when the flag was not already set.
    pub fn record(&self, recipient: &str, kind: EventKind) -> bool {
        let flags = self.entry(recipient);
        let newly_set = !flags.flag(kind).swap(true, Ordering::SeqCst);
        if newly_set {
            self.generation.send_modify(|g| *g += 1);
        }
        newly_set
    }

    /// `None` when nothing was ever reported for the recipient. Callers
    /// treat that the same as an unset flag.
    pub fn get(&self, recipient: &str, kind: EventKind) -> Option<bool> {
        self.lookup(recipient)
            .map(|flags| flags.flag(kind).load(Ordering::SeqCst))
    }

    /// Receiver that changes whenever any flag is newly set.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn lookup(&self, recipient: &str) -> Option<Arc<EventFlags>> {
        let key = Self::normalize(recipient);
        self.recipients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    fn entry(&self, recipient: &str) -> Arc<EventFlags> {
        if let Some(flags) = self.lookup(recipient) {
            return flags;
        }
        let key = Self::normalize(recipient);
        self.recipients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }
}
