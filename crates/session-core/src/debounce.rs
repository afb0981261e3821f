//! Quiescence-based expiry.
//!
//! Every `touch` restarts the timer. The callback runs only once the timer
//! has run its full duration without another touch, then the timer idles
//! until the next touch.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct QuiescenceTimer {
    touches: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl QuiescenceTimer {
    pub fn spawn<F>(quiet: Duration, on_quiet: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (touches, mut rx) = mpsc::unbounded_channel::<()>();
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(quiet) => {
                            on_quiet();
                            break;
                        }
                        touched = rx.recv() => {
                            if touched.is_none() {
                                return;
                            }
                        }
                    }
                }
            }
        });
        Self { touches, task }
    }

    pub fn touch(&self) {
        let _ = self.touches.send(());
    }
}

impl Drop for QuiescenceTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Shared buffer meant to be emptied by a [`QuiescenceTimer`] callback.
#[derive(Debug)]
pub struct EphemeralBuffer<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for EphemeralBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T> Default for EphemeralBuffer<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> EphemeralBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Empty the buffer, returning what it held.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }
}
