//! Wire protocol for the guest authentication broker.
//!
//! Requests and replies are small XML documents over Unix stream sockets.
//! The module is layered bottom-up:
//!
//! - [`error`]: protocol-level failures and limits.
//! - [`request`]: the parsed request model.
//! - [`parser`]: incremental, fail-closed request parsing.
//! - [`reply`]: reply serialization and wire error codes.
//! - [`socket_manager`]: public + per-user listener topology.
//! - [`dispatch`]: privilege policy and routing into the service layer.
//! - [`connection`]: the per-connection read/dispatch loop.

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod parser;
pub mod reply;
pub mod request;
pub mod socket_manager;

pub use connection::serve_connection;
pub use dispatch::{ConnectionContext, Dispatcher};
pub use error::{ProtocolError, ProtocolResult, MAX_REQUEST_SIZE};
pub use parser::WireProtocolParser;
pub use reply::{encode_reply, ReplyPayload};
pub use request::{Request, RequestBody};
pub use socket_manager::{AcceptedConnection, SessionRegistry, SocketManager, SocketOwner};
