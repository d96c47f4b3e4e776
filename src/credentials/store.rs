//! Persisted token storage. One key, the raw bearer string; absence means
//! unauthenticated. No decoding, no network, no policy.

use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::warn;

/// Shared mutable token slot used by the renewal coordinator, the HTTP layer
/// and the realtime manager. All of them read the latest value at the point
/// of use; the value is replaced wholesale, never patched.
pub trait TokenStore: Send + Sync {
    fn save(&self, token: &str);
    fn load(&self) -> Option<String>;
    fn clear(&self);
}

/// In-memory store, the default for tests and short-lived sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    slot: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self { Self::default() }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, token: &str) {
        *self.slot.write() = Some(token.to_string());
    }

    fn load(&self) -> Option<String> {
        self.slot.read().clone()
    }

    fn clear(&self) {
        *self.slot.write() = None;
    }
}

/// File-backed store so the session survives application restarts.
/// IO failures are logged and degrade to "no token"; they never panic the
/// host application.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, token: &str) {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        if let Err(e) = std::fs::write(&self.path, token) {
            warn!(path = %self.path.display(), "failed to persist token: {e}");
        }
    }

    fn load(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) if s.trim().is_empty() => None,
            Ok(s) => Some(s.trim().to_string()),
            Err(_) => None,
        }
    }

    fn clear(&self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), "failed to clear token: {e}");
            }
        }
    }
}
