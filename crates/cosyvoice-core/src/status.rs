//! Single-value playback status observed by the UI

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::Error;

/// What the pipeline is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Connecting,
    Receiving,
    Playing,
    Error(Error),
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackStatus::Idle => write!(f, "idle"),
            PlaybackStatus::Connecting => write!(f, "connecting"),
            PlaybackStatus::Receiving => write!(f, "receiving"),
            PlaybackStatus::Playing => write!(f, "playing"),
            PlaybackStatus::Error(err) => write!(f, "error: {}", err.user_message()),
        }
    }
}

/// Publisher side of the status channel; clones share one value.
#[derive(Clone)]
pub struct StatusNotifier {
    tx: Arc<watch::Sender<PlaybackStatus>>,
}

impl StatusNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PlaybackStatus::Idle);
        Self { tx: Arc::new(tx) }
    }

    /// Publish a new status. Observers are only woken when the value changes.
    pub fn set(&self, status: PlaybackStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    pub fn current(&self) -> PlaybackStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.tx.subscribe()
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}
