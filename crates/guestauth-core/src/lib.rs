//! guestauth-core - Guest Authentication Broker Core Library
//!
//! Core logic for a host-side trust broker that authenticates guest
//! automation as local OS users. Guests present either an X.509
//! certificate chain matched against per-user registered aliases, or a
//! signed SAML 2.0 bearer token whose signing chain is matched the same
//! way. Successful authentications can be exchanged for short-lived opaque
//! tickets.
//!
//! This crate contains no socket or wire-protocol code; the daemon crate
//! layers the Unix-socket protocol on top of [`context::ServiceContext`].
//!
//! # Module Overview
//!
//! - [`config`]: TOML configuration with fail-closed validation.
//! - [`error`]: the [`error::ServiceError`] taxonomy and wire codes.
//! - [`securefile`]: symlink- and tamper-resistant store file I/O.
//! - [`certificate`]: PEM/DER handling and certificate comparison.
//! - [`alias`]: per-user alias files and the global mapping store.
//! - [`trustchain`]: certificate-chain trust decisions over the store.
//! - [`saml`]: SAML 2.0 bearer token verification (XML-DSig subset).
//! - [`ticket`]: in-memory opaque ticket brokerage.
//! - [`context`]: the configured component bundle the daemon consumes.
//!
//! # Security Considerations
//!
//! Trust decisions fail closed: malformed input, unverifiable state, and
//! ambiguous mappings are errors, never best-effort successes. Store files
//! are re-verified between metadata check and read so a swapped file is
//! detected. Authentication failures deliberately carry a fixed message;
//! the underlying cause is logged host-side only.

pub mod alias;
pub mod certificate;
pub mod config;
pub mod context;
pub mod error;
pub mod saml;
pub mod securefile;
pub mod ticket;
pub mod trustchain;

pub use config::BrokerConfig;
pub use context::{SamlAuthResult, ServiceContext};
pub use error::{ServiceError, ServiceResult};
