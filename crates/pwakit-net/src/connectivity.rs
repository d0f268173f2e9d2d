//! Online/offline state observed from the environment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared connectivity flag.
///
/// The environment adapter flips it; the offline engine only reads it.
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
}

impl Connectivity {
    /// Create a flag in the given state.
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Create a flag that starts online.
    pub fn online() -> Self {
        Self::new(true)
    }

    /// Create a flag that starts offline.
    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record a connectivity change.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            info!(online, "Connectivity changed");
        }
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::online()
    }
}
