//! In-process mesh. Every endpoint joined to the same [`MemoryMesh`] can be
//! linked to any other; links, drops and send failures are driven by hand.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use beam_shared::BeamId;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::mesh::{MeshTransport, TransportError, TransportEvent};

const ENDPOINT_QUEUE_DEPTH: usize = 1024;

#[derive(Default)]
struct MeshState {
    endpoints: HashMap<BeamId, mpsc::Sender<TransportEvent>>,
    links: HashSet<(BeamId, BeamId)>,
    /// Remaining sends allowed toward a peer before they start failing.
    send_budget: HashMap<BeamId, usize>,
}

impl MeshState {
    fn link_key(a: &BeamId, b: &BeamId) -> (BeamId, BeamId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    fn linked(&self, a: &BeamId, b: &BeamId) -> bool {
        self.links.contains(&Self::link_key(a, b))
    }

    fn notify(&self, to: &BeamId, event: TransportEvent) {
        if let Some(tx) = self.endpoints.get(to) {
            if tx.try_send(event).is_err() {
                debug!(peer = %to, "memory mesh endpoint queue full or closed");
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryMesh {
    state: Arc<Mutex<MeshState>>,
}

impl MemoryMesh {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MeshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach an endpoint for `id`.
    pub fn join(&self, id: BeamId) -> (MemoryTransport, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(ENDPOINT_QUEUE_DEPTH);
        self.state().endpoints.insert(id.clone(), tx);
        let transport = MemoryTransport {
            me: id,
            state: self.state.clone(),
        };
        (transport, rx)
    }

    /// Link two endpoints. Both sides see `PeerFound` then `Connected`.
    pub fn connect(&self, a: &BeamId, b: &BeamId) {
        let mut state = self.state();
        if !state.links.insert(MeshState::link_key(a, b)) {
            return;
        }
        for (me, other) in [(a, b), (b, a)] {
            state.notify(me, TransportEvent::PeerFound(other.clone()));
            state.notify(me, TransportEvent::Connected(other.clone()));
        }
    }

    pub fn disconnect(&self, a: &BeamId, b: &BeamId) {
        let mut state = self.state();
        if !state.links.remove(&MeshState::link_key(a, b)) {
            return;
        }
        state.notify(a, TransportEvent::Disconnected(b.clone()));
        state.notify(b, TransportEvent::Disconnected(a.clone()));
    }

    /// Let only `allowed` more sends toward `peer` succeed.
    pub fn fail_sends_after(&self, peer: &BeamId, allowed: usize) {
        self.state().send_budget.insert(peer.clone(), allowed);
    }

    pub fn clear_send_failures(&self, peer: &BeamId) {
        self.state().send_budget.remove(peer);
    }
}

pub struct MemoryTransport {
    me: BeamId,
    state: Arc<Mutex<MeshState>>,
}

impl MemoryTransport {
    fn state(&self) -> MutexGuard<'_, MeshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MeshTransport for MemoryTransport {
    async fn send(&self, peer: &BeamId, data: Bytes) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.linked(&self.me, peer) {
            return Err(TransportError::NotConnected(peer.clone()));
        }
        if let Some(budget) = state.send_budget.get_mut(peer) {
            if *budget == 0 {
                return Err(TransportError::SendFailed("injected failure".into()));
            }
            *budget -= 1;
        }
        let tx = state
            .endpoints
            .get(peer)
            .ok_or_else(|| TransportError::NotConnected(peer.clone()))?;
        tx.try_send(TransportEvent::Received {
            from: self.me.clone(),
            data,
        })
        .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_connected(&self, peer: &BeamId) -> bool {
        self.state().linked(&self.me, peer)
    }

    fn connected_peers(&self) -> Vec<BeamId> {
        let state = self.state();
        state
            .links
            .iter()
            .filter_map(|(a, b)| {
                if a == &self.me {
                    Some(b.clone())
                } else if b == &self.me {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> BeamId {
        BeamId::derive(&[n; 32])
    }

    #[tokio::test]
    async fn connect_send_disconnect() {
        let mesh = MemoryMesh::new();
        let (a, mut a_rx) = mesh.join(id(1));
        let (_b, mut b_rx) = mesh.join(id(2));

        assert_eq!(
            a.send(&id(2), Bytes::from_static(b"x")).await,
            Err(TransportError::NotConnected(id(2)))
        );

        mesh.connect(&id(1), &id(2));
        assert_eq!(a_rx.recv().await, Some(TransportEvent::PeerFound(id(2))));
        assert_eq!(a_rx.recv().await, Some(TransportEvent::Connected(id(2))));
        assert_eq!(b_rx.recv().await, Some(TransportEvent::PeerFound(id(1))));
        assert_eq!(b_rx.recv().await, Some(TransportEvent::Connected(id(1))));
        assert!(a.is_connected(&id(2)));
        assert_eq!(a.connected_peers(), vec![id(2)]);

        a.send(&id(2), Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(
            b_rx.recv().await,
            Some(TransportEvent::Received {
                from: id(1),
                data: Bytes::from_static(b"hello"),
            })
        );

        mesh.disconnect(&id(1), &id(2));
        assert_eq!(a_rx.recv().await, Some(TransportEvent::Disconnected(id(2))));
        assert!(!a.is_connected(&id(2)));
    }

    #[tokio::test]
    async fn injected_send_failures() {
        let mesh = MemoryMesh::new();
        let (a, _a_rx) = mesh.join(id(1));
        let (_b, _b_rx) = mesh.join(id(2));
        mesh.connect(&id(1), &id(2));
        mesh.fail_sends_after(&id(2), 1);

        assert!(a.send(&id(2), Bytes::from_static(b"1")).await.is_ok());
        assert!(matches!(
            a.send(&id(2), Bytes::from_static(b"2")).await,
            Err(TransportError::SendFailed(_))
        ));

        mesh.clear_send_failures(&id(2));
        assert!(a.send(&id(2), Bytes::from_static(b"3")).await.is_ok());
    }
}
