//! Process-wide registry of live debug sessions
//!
//! Sessions are registered under a unique group/target name so cancellation
//! can stop exactly one of several concurrent sessions. The registry itself
//! is a guarded singleton: `ensure_registered` is idempotent and safe under
//! concurrent first-call races (`OnceLock` resolves them atomically).

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};

static REGISTRY: OnceLock<SessionRegistry> = OnceLock::new();

/// The process-wide registry, created on first use
pub fn ensure_registered() -> &'static SessionRegistry {
    REGISTRY.get_or_init(SessionRegistry::default)
}

/// Live sessions by name
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, CancellationToken>>,
}

impl SessionRegistry {
    /// Track a session under its unique name
    pub fn register(&self, name: &str, token: CancellationToken) {
        let mut sessions = self.sessions.lock().expect("session registry poisoned");
        if sessions.insert(name.to_string(), token).is_some() {
            tracing::warn!(session = %name, "Replacing an already-registered debug session");
        }
    }

    /// Stop one named session; other sessions are untouched
    pub fn stop(&self, name: &str) -> Result<()> {
        let sessions = self.sessions.lock().expect("session registry poisoned");
        match sessions.get(name) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(Error::SessionNotFound(name.to_string())),
        }
    }

    /// Forget a session once it has ended
    pub fn remove(&self, name: &str) {
        let mut sessions = self.sessions.lock().expect("session registry poisoned");
        sessions.remove(name);
    }

    /// Names of the sessions currently alive
    pub fn active(&self) -> Vec<String> {
        let sessions = self.sessions.lock().expect("session registry poisoned");
        let mut names: Vec<String> = sessions.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_registered_is_idempotent_under_races() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| ensure_registered() as *const SessionRegistry as usize))
            .collect();
        let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn stop_cancels_only_the_named_session() {
        let registry = SessionRegistry::default();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        registry.register("g1/pid-10", first.clone());
        registry.register("g2/pid-20", second.clone());

        registry.stop("g1/pid-10").unwrap();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        registry.remove("g1/pid-10");
        assert!(matches!(
            registry.stop("g1/pid-10"),
            Err(Error::SessionNotFound(_))
        ));
        assert_eq!(registry.active(), vec!["g2/pid-20"]);
    }
}
