use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;

/// Handle held in the routing table, used to queue bytes for a connection.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    /// Logical agent name.
    pub agent_id: String,
    /// Routable hash the agent registered with.
    pub neural_hash: String,
    /// Outbound queue drained by the connection's writer task.
    pub tx: mpsc::Sender<Vec<u8>>,
    /// When the agent registered (guards against evicting a newer route).
    pub admitted_at: Instant,
}

/// Concurrent hash → connection routing table with name lookup.
#[derive(Debug, Default)]
pub struct Router {
    routes: DashMap<String, PeerHandle>,
    cursor: AtomicUsize,
}

impl Router {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle, returning any previous handle for the same hash.
    #[must_use]
    pub fn insert(&self, handle: PeerHandle) -> Option<PeerHandle> {
        self.routes.insert(handle.neural_hash.clone(), handle)
    }

    /// Remove the entry only if it was admitted at the given instant.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_if(&self, neural_hash: &str, admitted_at: Instant) -> bool {
        self.routes
            .remove_if(neural_hash, |_k, v| v.admitted_at == admitted_at)
            .is_some()
    }

    /// Look up a handle by hash.
    #[must_use]
    pub fn get(&self, neural_hash: &str) -> Option<PeerHandle> {
        self.routes.get(neural_hash).map(|entry| entry.value().clone())
    }

    /// Hash of some agent registered under `name`.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<String> {
        self.routes
            .iter()
            .find(|entry| entry.agent_id == name)
            .map(|entry| entry.neural_hash.clone())
    }

    /// Name → hash directory of everyone except `exclude`.
    #[must_use]
    pub fn peers_except(&self, exclude: &str) -> HashMap<String, String> {
        self.routes
            .iter()
            .filter(|entry| entry.key() != exclude)
            .map(|entry| (entry.agent_id.clone(), entry.neural_hash.clone()))
            .collect()
    }

    /// Handles of everyone except `exclude`.
    #[must_use]
    pub fn others(&self, exclude: &str) -> Vec<PeerHandle> {
        self.routes
            .iter()
            .filter(|entry| entry.key() != exclude)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Recipients of a signal from `source` addressed to `target`.
    ///
    /// An empty target reaches every other agent, an exact hash reaches that
    /// agent, and a name reaches one agent registered under it, chosen round
    /// robin. The sender is never a recipient.
    #[must_use]
    pub fn recipients(&self, source: &str, target: &str) -> Vec<PeerHandle> {
        if target.is_empty() {
            return self.others(source);
        }
        if target != source {
            if let Some(handle) = self.get(target) {
                return vec![handle];
            }
        }

        let mut candidates: Vec<PeerHandle> = self
            .routes
            .iter()
            .filter(|entry| entry.agent_id == target && entry.key() != source)
            .map(|entry| entry.value().clone())
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        candidates.sort_by_key(|h| h.admitted_at);
        let pick = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        vec![candidates.swap_remove(pick)]
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no agent is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_handle(name: &str, hash: &str) -> (PeerHandle, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = PeerHandle {
            agent_id: name.to_string(),
            neural_hash: hash.to_string(),
            tx,
            admitted_at: Instant::now(),
        };
        (handle, rx)
    }

    #[test]
    fn insert_and_get_returns_handle() {
        let router = Router::new();
        let (handle, _rx) = make_handle("ventas", "h1");
        assert!(router.insert(handle).is_none());
        assert_eq!(router.get("h1").unwrap().agent_id, "ventas");
        assert!(router.get("h2").is_none());
    }

    #[test]
    fn insert_same_hash_replaces_old_handle() {
        let router = Router::new();
        let (h1, _rx1) = make_handle("ventas", "h1");
        let (h2, _rx2) = make_handle("ventas", "h1");
        assert!(router.insert(h1).is_none());
        assert!(router.insert(h2).is_some());
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn remove_if_checks_admitted_at() {
        let router = Router::new();
        let (handle, _rx) = make_handle("ventas", "h1");
        let admitted_at = handle.admitted_at;
        let _ = router.insert(handle);

        assert!(!router.remove_if("h1", admitted_at + Duration::from_secs(1)));
        assert_eq!(router.len(), 1);
        assert!(router.remove_if("h1", admitted_at));
        assert!(router.is_empty());
    }

    #[test]
    fn peers_except_excludes_self() {
        let router = Router::new();
        let (a, _ra) = make_handle("soporte", "ha");
        let (b, _rb) = make_handle("ventas", "hb");
        let _ = router.insert(a);
        let _ = router.insert(b);

        let peers = router.peers_except("ha");
        assert_eq!(peers.len(), 1);
        assert_eq!(peers.get("ventas").map(String::as_str), Some("hb"));
        assert_eq!(router.resolve("soporte").as_deref(), Some("ha"));
        assert!(router.resolve("billing").is_none());
    }

    #[test]
    fn empty_target_reaches_everyone_but_sender() {
        let router = Router::new();
        for (name, hash) in [("a", "ha"), ("b", "hb"), ("c", "hc")] {
            let (h, _rx) = make_handle(name, hash);
            let _ = router.insert(h);
        }
        let mut hashes: Vec<String> = router
            .recipients("ha", "")
            .into_iter()
            .map(|h| h.neural_hash)
            .collect();
        hashes.sort();
        assert_eq!(hashes, ["hb", "hc"]);
    }

    #[test]
    fn hash_target_is_exact() {
        let router = Router::new();
        let (a, _ra) = make_handle("a", "ha");
        let (b, _rb) = make_handle("b", "hb");
        let _ = router.insert(a);
        let _ = router.insert(b);
        let r = router.recipients("ha", "hb");
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].neural_hash, "hb");
        assert!(router.recipients("ha", "ha").is_empty());
        assert!(router.recipients("ha", "nobody").is_empty());
    }

    #[test]
    fn name_target_round_robins() {
        let router = Router::new();
        let (a, _ra) = make_handle("soporte", "ha");
        let _ = router.insert(a);
        let mut rxs = Vec::new();
        for hash in ["v1", "v2"] {
            let (mut h, rx) = make_handle("ventas", hash);
            h.admitted_at = Instant::now() + Duration::from_millis(if hash == "v1" { 0 } else { 1 });
            let _ = router.insert(h);
            rxs.push(rx);
        }

        let picks: Vec<String> = (0..4)
            .map(|_| router.recipients("ha", "ventas").remove(0).neural_hash)
            .collect();
        assert_ne!(picks[0], picks[1]);
        assert_eq!(picks[0], picks[2]);
        assert_eq!(picks[1], picks[3]);
    }

    #[test]
    fn default_router_is_empty() {
        let router = Router::default();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }
}
