//! Connection registry for mentorlink.
//!
//! The registry is the single source of truth for which identities are
//! currently reachable. It owns connection lifetime: admission, lookup,
//! delivery, liveness flags, and eviction all go through the narrow surface
//! here, and no other component touches the underlying map.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use mentorlink_protocol::{CloseCode, Envelope};

use crate::identity::Role;

/// Commands consumed by a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Deliver an envelope to the peer.
    Envelope(Arc<Envelope>),
    /// Send a close frame and stop writing.
    Close(CloseCode),
}

/// Sending half of a connection's outbound queue.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
/// Receiving half, owned by the connection's writer task.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Counter distinguishing successive sessions for the same identity.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A live, authenticated connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    identity: String,
    role: Role,
    session: u64,
    alive: AtomicBool,
    sender: OutboundSender,
}

impl ConnectionHandle {
    fn new(identity: String, role: Role, sender: OutboundSender) -> Self {
        Self {
            identity,
            role,
            session: SESSION_COUNTER.fetch_add(1, Ordering::Relaxed),
            alive: AtomicBool::new(true),
            sender,
        }
    }

    /// Get the identity this connection authenticated as.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Get the connection's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Get the session number, unique across all admissions.
    #[must_use]
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Check whether the peer answered the most recent probe.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    fn push(&self, outbound: Outbound) -> bool {
        self.sender.send(outbound).is_ok()
    }
}

/// The outcome of a unicast delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The envelope was handed to the connection's writer.
    Delivered,
    /// No connection is registered for the identity.
    Absent,
    /// A connection was registered but its writer is gone; the stale entry
    /// has been evicted.
    SendFailed,
}

/// Registry of live connections, keyed by identity.
///
/// At most one connection per identity: admitting a second session for the
/// same identity closes the first. `admit` and the eviction methods are the
/// only mutators.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: DashMap<String, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Admit a connection, replacing any existing session for the identity.
    ///
    /// The displaced session, if any, is closed before the new one takes
    /// over, so a double login terminates cleanly instead of leaking.
    pub fn admit(&self, identity: impl Into<String>, role: Role, sender: OutboundSender) -> Arc<ConnectionHandle> {
        let identity = identity.into();
        let handle = Arc::new(ConnectionHandle::new(identity.clone(), role, sender));

        if let Some(previous) = self.entries.insert(identity.clone(), handle.clone()) {
            previous.push(Outbound::Close(CloseCode::Normal));
            debug!(identity = %identity, "Displaced previous session");
        }

        debug!(identity = %identity, role = %role, session = handle.session, "Connection admitted");
        handle
    }

    /// Look up the connection for an identity. No side effects.
    #[must_use]
    pub fn resolve(&self, identity: &str) -> Option<Arc<ConnectionHandle>> {
        self.entries.get(identity).map(|entry| entry.value().clone())
    }

    /// Remove the entry for an identity. Evicting an absent identity is a
    /// no-op, not an error.
    pub fn evict(&self, identity: &str) {
        if self.entries.remove(identity).is_some() {
            debug!(identity = %identity, "Connection evicted");
        }
    }

    /// Remove the entry for an identity only if it still belongs to the
    /// given session.
    ///
    /// Connection teardown uses this so a session that was displaced by a
    /// newer admission cannot evict its replacement. Returns `true` if the
    /// entry was removed.
    pub fn evict_session(&self, identity: &str, session: u64) -> bool {
        let removed = self
            .entries
            .remove_if(identity, |_, handle| handle.session == session)
            .is_some();
        if removed {
            debug!(identity = %identity, session, "Session evicted");
        }
        removed
    }

    /// Reset the alive flag after the peer acknowledged a probe.
    pub fn mark_alive(&self, identity: &str) {
        if let Some(entry) = self.entries.get(identity) {
            entry.set_alive(true);
        }
    }

    /// Deliver an envelope to a single identity.
    ///
    /// A push failure means the writer task is gone; the stale entry is
    /// evicted and the failure reported, which callers treat the same as
    /// the identity being absent.
    pub fn send(&self, identity: &str, envelope: Arc<Envelope>) -> SendOutcome {
        let Some(handle) = self.resolve(identity) else {
            return SendOutcome::Absent;
        };

        if handle.push(Outbound::Envelope(envelope)) {
            trace!(identity = %identity, "Envelope delivered");
            SendOutcome::Delivered
        } else {
            self.entries
                .remove_if(identity, |_, entry| entry.session == handle.session);
            warn!(identity = %identity, "Send failed, stale entry evicted");
            SendOutcome::SendFailed
        }
    }

    /// Deliver an envelope to every connection holding a role.
    ///
    /// Returns the number of connections the envelope was handed to.
    /// Failed pushes are skipped and their stale entries evicted.
    pub fn broadcast_to_role(
        &self,
        role: Role,
        envelope: Arc<Envelope>,
        exclude: Option<&str>,
    ) -> usize {
        // Snapshot first so no map guard is held while pushing.
        let targets: Vec<Arc<ConnectionHandle>> = self
            .entries
            .iter()
            .filter(|entry| entry.role() == role && Some(entry.identity()) != exclude)
            .map(|entry| entry.value().clone())
            .collect();

        let mut delivered = 0;
        for handle in targets {
            if handle.push(Outbound::Envelope(envelope.clone())) {
                delivered += 1;
            } else {
                self.entries
                    .remove_if(handle.identity(), |_, entry| entry.session == handle.session);
            }
        }

        trace!(role = %role, delivered, "Role broadcast");
        delivered
    }

    /// Run one liveness pass.
    ///
    /// Entries whose alive flag is still down from the previous pass are
    /// closed and evicted; the rest have their flag lowered and receive the
    /// probe. A probe that cannot be pushed evicts immediately rather than
    /// waiting another interval. Returns the evicted identities so the
    /// caller can purge their room memberships.
    pub fn sweep(&self, probe: &Arc<Envelope>) -> Vec<String> {
        let handles: Vec<Arc<ConnectionHandle>> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut evicted = Vec::new();
        for handle in handles {
            if !handle.is_alive() {
                handle.push(Outbound::Close(CloseCode::Normal));
                evicted.push(handle);
                continue;
            }
            handle.set_alive(false);
            if !handle.push(Outbound::Envelope(probe.clone())) {
                evicted.push(handle);
            }
        }

        evicted
            .into_iter()
            .filter(|handle| {
                self.entries
                    .remove_if(handle.identity(), |_, entry| entry.session == handle.session)
                    .is_some()
            })
            .map(|handle| handle.identity().to_string())
            .collect()
    }

    /// Close every connection and empty the registry.
    ///
    /// Each peer gets a best-effort copy of `notice` followed by a close
    /// frame with `code`. Returns the number of connections that were
    /// registered.
    pub fn clear(&self, notice: Arc<Envelope>, code: CloseCode) -> usize {
        let handles: Vec<Arc<ConnectionHandle>> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.entries.clear();

        for handle in &handles {
            handle.push(Outbound::Envelope(notice.clone()));
            handle.push(Outbound::Close(code));
        }

        handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentorlink_protocol::SystemAction;

    fn channel() -> (OutboundSender, OutboundReceiver) {
        mpsc::unbounded_channel()
    }

    fn recv_now(rx: &mut OutboundReceiver) -> Option<Outbound> {
        rx.try_recv().ok()
    }

    #[test]
    fn test_admit_resolve_evict() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();

        registry.admit("u1", Role::Student, tx);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("u1").unwrap().role(), Role::Student);

        registry.evict("u1");
        assert!(registry.resolve("u1").is_none());

        // Idempotent: evicting an absent identity is a no-op.
        registry.evict("u1");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_second_admission_displaces_first() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, _rx2) = channel();

        let first = registry.admit("u1", Role::Student, tx1);
        let second = registry.admit("u1", Role::Student, tx2);

        // Still at most one entry, and it is the new session.
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("u1").unwrap().session(), second.session());

        // The displaced session received a close.
        match recv_now(&mut rx1) {
            Some(Outbound::Close(CloseCode::Normal)) => {}
            other => panic!("Expected close for displaced session, got {:?}", other),
        }

        // The displaced session's teardown must not evict the replacement.
        assert!(!registry.evict_session("u1", first.session()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_send_outcomes() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = channel();
        registry.admit("u1", Role::Student, tx);

        let envelope = Arc::new(Envelope::system(SystemAction::Pong));
        assert_eq!(registry.send("u1", envelope.clone()), SendOutcome::Delivered);
        assert!(matches!(recv_now(&mut rx), Some(Outbound::Envelope(_))));

        assert_eq!(registry.send("nobody", envelope.clone()), SendOutcome::Absent);

        // Dropping the receiver kills the writer; the next send evicts.
        drop(rx);
        assert_eq!(registry.send("u1", envelope), SendOutcome::SendFailed);
        assert!(registry.resolve("u1").is_none());
    }

    #[test]
    fn test_broadcast_to_role() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let (tx3, mut rx3) = channel();
        registry.admit("m1", Role::Mentor, tx1);
        registry.admit("m2", Role::Mentor, tx2);
        registry.admit("s1", Role::Student, tx3);

        let envelope = Arc::new(Envelope::system(SystemAction::Ping));
        let delivered = registry.broadcast_to_role(Role::Mentor, envelope, None);

        assert_eq!(delivered, 2);
        assert!(recv_now(&mut rx1).is_some());
        assert!(recv_now(&mut rx2).is_some());
        assert!(recv_now(&mut rx3).is_none());
    }

    #[test]
    fn test_broadcast_to_role_excludes() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        registry.admit("m1", Role::Mentor, tx1);
        registry.admit("m2", Role::Mentor, tx2);

        let envelope = Arc::new(Envelope::system(SystemAction::Ping));
        let delivered = registry.broadcast_to_role(Role::Mentor, envelope, Some("m1"));

        assert_eq!(delivered, 1);
        assert!(recv_now(&mut rx1).is_none());
        assert!(recv_now(&mut rx2).is_some());
    }

    #[test]
    fn test_sweep_probes_then_evicts() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = channel();
        registry.admit("u1", Role::Student, tx);

        let probe = Arc::new(Envelope::system(SystemAction::Ping));

        // First pass: flag goes down, probe goes out, nobody evicted.
        assert!(registry.sweep(&probe).is_empty());
        assert!(matches!(recv_now(&mut rx), Some(Outbound::Envelope(_))));
        assert!(!registry.resolve("u1").unwrap().is_alive());

        // No acknowledgment arrives; second pass evicts and closes.
        let evicted = registry.sweep(&probe);
        assert_eq!(evicted, vec!["u1".to_string()]);
        assert!(registry.is_empty());
        assert!(matches!(recv_now(&mut rx), Some(Outbound::Close(_))));
    }

    #[test]
    fn test_sweep_spares_acknowledged_connections() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        registry.admit("u1", Role::Student, tx);

        let probe = Arc::new(Envelope::system(SystemAction::Ping));
        assert!(registry.sweep(&probe).is_empty());

        // The peer answers the probe before the next pass.
        registry.mark_alive("u1");
        assert!(registry.sweep(&probe).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sweep_evicts_on_probe_send_failure() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = channel();
        registry.admit("u1", Role::Student, tx);
        drop(rx);

        let probe = Arc::new(Envelope::system(SystemAction::Ping));
        let evicted = registry.sweep(&probe);
        assert_eq!(evicted, vec!["u1".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_notifies_and_empties() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        registry.admit("u1", Role::Student, tx1);
        registry.admit("u2", Role::Mentor, tx2);

        let notice = Arc::new(Envelope::system(SystemAction::Shutdown));
        let closed = registry.clear(notice, CloseCode::ServerShutdown);

        assert_eq!(closed, 2);
        assert!(registry.is_empty());
        for rx in [&mut rx1, &mut rx2] {
            assert!(matches!(recv_now(rx), Some(Outbound::Envelope(_))));
            match recv_now(rx) {
                Some(Outbound::Close(CloseCode::ServerShutdown)) => {}
                other => panic!("Expected shutdown close, got {:?}", other),
            }
        }
    }
}
