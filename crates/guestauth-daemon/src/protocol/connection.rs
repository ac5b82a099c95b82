//! Per-connection read/dispatch loop.
//!
//! Identity is fixed at accept time from peer credentials. Requests are
//! parsed incrementally and may be pipelined; each produces exactly one
//! reply, written in request order. A protocol violation or idle timeout
//! terminates the connection without a reply.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use nix::unistd::{Uid, User};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::dispatch::{ConnectionContext, Dispatcher};
use super::error::ProtocolError;
use super::parser::WireProtocolParser;
use super::socket_manager::AcceptedConnection;

/// Initial read buffer capacity per connection.
const READ_BUF_CAPACITY: usize = 4096;

/// Drive one connection to completion.
pub async fn serve_connection(
    dispatcher: Arc<Dispatcher>,
    accepted: AcceptedConnection,
    idle_timeout: Duration,
) {
    let AcceptedConnection {
        mut stream,
        owner,
        permit: _permit,
    } = accepted;

    let creds = match stream.peer_cred() {
        Ok(creds) => creds,
        Err(e) => {
            warn!(error = %e, "cannot read peer credentials, dropping connection");
            return;
        },
    };
    let peer_uid = creds.uid();
    let peer_user = User::from_uid(Uid::from_raw(peer_uid))
        .ok()
        .flatten()
        .map(|u| u.name);

    debug!(peer_uid, listener = %owner, "connection established");
    let mut conn = ConnectionContext::new(peer_uid, peer_user, owner);
    let mut parser = WireProtocolParser::new();
    let mut buf = BytesMut::with_capacity(READ_BUF_CAPACITY);

    loop {
        match tokio::time::timeout(idle_timeout, stream.read_buf(&mut buf)).await {
            Err(_) => {
                let err = ProtocolError::IdleTimeout {
                    seconds: idle_timeout.as_secs(),
                };
                debug!(peer_uid, error = %err, "closing connection");
                break;
            },
            Ok(Err(e)) => {
                debug!(peer_uid, error = %e, "read failed");
                break;
            },
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {},
        }

        let chunk = buf.split();
        let requests = match parser.feed(&chunk) {
            Ok(requests) => requests,
            Err(e) => {
                // Parse errors poison the stream; no reply is possible
                // because the sequence number may not have been read.
                warn!(
                    target: "audit",
                    peer_uid,
                    error = %e,
                    "protocol violation, terminating connection"
                );
                break;
            },
        };

        for request in requests {
            let reply = dispatcher.dispatch(&mut conn, request).await;
            if let Err(e) = stream.write_all(&reply).await {
                debug!(peer_uid, error = %e, "write failed");
                return;
            }
        }
    }
}
