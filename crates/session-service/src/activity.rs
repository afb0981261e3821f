//! Recently observed change events, forgotten once the engine goes quiet.

use session_core::debounce::{EphemeralBuffer, QuiescenceTimer};
use session_core::{ChangeEvent, SessionStorageEngine};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct RecentChanges {
    buffer: EphemeralBuffer<ChangeEvent>,
    task: JoinHandle<()>,
}

impl RecentChanges {
    pub fn spawn(engine: &SessionStorageEngine, quiet: Duration) -> Self {
        let buffer = EphemeralBuffer::new();
        let mut events = engine.subscribe();
        let timer = {
            let buffer = buffer.clone();
            QuiescenceTimer::spawn(quiet, move || {
                let cleared = buffer.take().len();
                debug!(cleared, "change activity settled");
            })
        };

        let task = {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => {
                            buffer.push(event);
                            timer.touch();
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "activity tracker fell behind");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };
        Self { buffer, task }
    }

    pub fn snapshot(&self) -> Vec<ChangeEvent> {
        self.buffer.snapshot()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Drop for RecentChanges {
    fn drop(&mut self) {
        self.task.abort();
    }
}
