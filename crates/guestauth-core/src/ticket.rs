//! In-memory ticket broker.
//!
//! A ticket is an opaque credential minted after a successful
//! authentication; it lets the holder re-assert the authenticated identity
//! until the ticket expires or is revoked. Tickets never touch disk and do
//! not survive a daemon restart.
//!
//! # Security Considerations
//!
//! Ticket lookup compares the presented value against every live ticket in
//! constant time per candidate, so a requester cannot binary-search the
//! ticket space through timing. Expired tickets are pruned opportunistically
//! on every mutation and lookup.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};

/// Random bytes per ticket id; hex-encoded on the wire.
const TICKET_ID_BYTES: usize = 24;

#[derive(Debug, Clone)]
struct TicketEntry {
    user_name: String,
    expires_at: Instant,
}

/// Mints, validates, and revokes opaque tickets.
#[derive(Debug)]
pub struct TicketBroker {
    ttl: Duration,
    tickets: RwLock<HashMap<String, TicketEntry>>,
}

impl TicketBroker {
    /// Create a broker whose tickets live for `ttl_secs` seconds.
    #[must_use]
    pub fn new(ttl_secs: u64) -> Self {
        Self::with_ttl(Duration::from_secs(ttl_secs))
    }

    fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            tickets: RwLock::new(HashMap::new()),
        }
    }

    fn new_ticket_id() -> String {
        let mut bytes = [0u8; TICKET_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mut id = String::with_capacity(TICKET_ID_BYTES * 2);
        for b in bytes {
            id.push_str(&format!("{b:02x}"));
        }
        id
    }

    /// Mint a ticket for `user_name`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InternalFailure`] if the ticket table lock
    /// is poisoned.
    pub fn create(&self, user_name: &str) -> ServiceResult<String> {
        let mut tickets = self
            .tickets
            .write()
            .map_err(|_| ServiceError::internal("ticket table lock poisoned"))?;
        let now = Instant::now();
        tickets.retain(|_, entry| entry.expires_at > now);

        let id = Self::new_ticket_id();
        tickets.insert(
            id.clone(),
            TicketEntry {
                user_name: user_name.to_string(),
                expires_at: now + self.ttl,
            },
        );
        debug!(user = user_name, live = tickets.len(), "ticket created");
        Ok(id)
    }

    /// Resolve a presented ticket to its user name.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::AuthenticationDenied`] for unknown or
    /// expired tickets.
    pub fn validate(&self, ticket: &str) -> ServiceResult<String> {
        let tickets = self
            .tickets
            .read()
            .map_err(|_| ServiceError::internal("ticket table lock poisoned"))?;
        let now = Instant::now();

        // Scan every entry; each comparison is constant-time and the scan
        // does not short-circuit on a match.
        let mut found: Option<&TicketEntry> = None;
        for (id, entry) in tickets.iter() {
            let matches = id.len() == ticket.len()
                && bool::from(id.as_bytes().ct_eq(ticket.as_bytes()));
            if matches {
                found = Some(entry);
            }
        }

        match found {
            Some(entry) if entry.expires_at > now => Ok(entry.user_name.clone()),
            Some(_) => {
                debug!("presented ticket has expired");
                Err(ServiceError::AuthenticationDenied)
            },
            None => {
                debug!("presented ticket is unknown");
                Err(ServiceError::AuthenticationDenied)
            },
        }
    }

    /// Revoke a ticket.
    ///
    /// `owner` restricts revocation to tickets minted for that user; pass
    /// `None` to revoke regardless of ownership. Revoking a ticket that
    /// does not exist, or one the caller does not own, succeeds without
    /// effect so that revocation cannot be used to probe live tickets.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InternalFailure`] if the ticket table lock
    /// is poisoned.
    pub fn revoke(&self, ticket: &str, owner: Option<&str>) -> ServiceResult<()> {
        let mut tickets = self
            .tickets
            .write()
            .map_err(|_| ServiceError::internal("ticket table lock poisoned"))?;
        let now = Instant::now();
        tickets.retain(|_, entry| entry.expires_at > now);

        let removable = tickets
            .get(ticket)
            .map(|entry| owner.is_none() || owner == Some(entry.user_name.as_str()))
            .unwrap_or(false);
        if removable {
            tickets.remove(ticket);
            debug!("ticket revoked");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_validate_resolves_user() {
        let broker = TicketBroker::new(60);
        let ticket = broker.create("alice").unwrap();
        assert_eq!(broker.validate(&ticket).unwrap(), "alice");
    }

    #[test]
    fn unknown_ticket_is_denied() {
        let broker = TicketBroker::new(60);
        broker.create("alice").unwrap();
        let err = broker.validate("deadbeef").unwrap_err();
        assert!(matches!(err, ServiceError::AuthenticationDenied));
    }

    #[test]
    fn expired_ticket_is_denied() {
        let broker = TicketBroker::with_ttl(Duration::ZERO);
        let ticket = broker.create("alice").unwrap();
        let err = broker.validate(&ticket).unwrap_err();
        assert!(matches!(err, ServiceError::AuthenticationDenied));
    }

    #[test]
    fn owner_can_revoke() {
        let broker = TicketBroker::new(60);
        let ticket = broker.create("alice").unwrap();
        broker.revoke(&ticket, Some("alice")).unwrap();
        assert!(broker.validate(&ticket).is_err());
    }

    #[test]
    fn non_owner_revocation_is_a_silent_no_op() {
        let broker = TicketBroker::new(60);
        let ticket = broker.create("alice").unwrap();
        broker.revoke(&ticket, Some("mallory")).unwrap();
        assert_eq!(broker.validate(&ticket).unwrap(), "alice");
    }

    #[test]
    fn unrestricted_revocation_removes_any_ticket() {
        let broker = TicketBroker::new(60);
        let ticket = broker.create("alice").unwrap();
        broker.revoke(&ticket, None).unwrap();
        assert!(broker.validate(&ticket).is_err());
    }

    #[test]
    fn revoking_a_missing_ticket_succeeds() {
        let broker = TicketBroker::new(60);
        assert!(broker.revoke("deadbeef", Some("alice")).is_ok());
    }

    #[test]
    fn ticket_ids_are_unique_and_fixed_length() {
        let broker = TicketBroker::new(60);
        let a = broker.create("alice").unwrap();
        let b = broker.create("alice").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), TICKET_ID_BYTES * 2);
    }
}
