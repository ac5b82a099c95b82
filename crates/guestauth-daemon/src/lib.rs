//! guestauth-daemon - Guest Authentication Broker Daemon Library
//!
//! The daemon side of the broker: listener topology, wire protocol,
//! privilege policy, startup integrity sweep, and shared state. All trust
//! decisions live in `guestauth-core`; this crate only moves requests in
//! and replies out under the connection's proven identity.
//!
//! The `guestauthd` binary wires these pieces together; integration tests
//! drive the same modules over real Unix sockets.

pub mod integrity;
pub mod protocol;
pub mod state;
