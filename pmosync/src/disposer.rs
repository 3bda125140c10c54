//! Unsubscription handles.
//!
//! Every subscription made on a [`MediaPlayer`](crate::MediaPlayer) or a
//! [`RoomTransport`](crate::RoomTransport) hands back a [`Disposer`]. Dropping
//! it, or calling [`Disposer::dispose`], removes the listener.

use std::fmt;

pub struct Disposer {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Disposer {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A disposer with nothing to release, for collaborators that are not
    /// available (no room connection, player gone).
    pub fn noop() -> Self {
        Self { release: None }
    }

    pub fn dispose(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("armed", &self.release.is_some())
            .finish()
    }
}

/// A set of disposers released together.
#[derive(Debug, Default)]
pub struct DisposerBag {
    disposers: Vec<Disposer>,
}

impl DisposerBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, disposer: Disposer) {
        self.disposers.push(disposer);
    }

    pub fn len(&self) -> usize {
        self.disposers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disposers.is_empty()
    }

    /// Releases in reverse registration order.
    pub fn dispose_all(&mut self) {
        while let Some(disposer) = self.disposers.pop() {
            disposer.dispose();
        }
    }
}

impl Drop for DisposerBag {
    fn drop(&mut self) {
        self.dispose_all();
    }
}
