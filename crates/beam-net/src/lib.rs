//! Mesh transport for Beam: an addressed, reliable packet pipe between
//! devices, with a libp2p (QUIC + mDNS + GossipSub) implementation and an
//! in-process one for tests.

pub mod behaviour;
pub mod memory;
pub mod mesh;
pub mod peers;
pub mod swarm;
pub mod transport;

pub use behaviour::{BeamBehaviour, BeamEvent};
pub use memory::{MemoryMesh, MemoryTransport};
pub use mesh::{MeshTransport, TransportError, TransportEvent};
pub use peers::{beam_id_for_key, beam_id_for_peer, PeerTracker};
pub use swarm::{inbox_topic, spawn_mesh, Libp2pMesh, MeshConfig};
pub use transport::build_swarm;
