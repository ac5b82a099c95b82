//! Parsed request model.
//!
//! One [`Request`] per `<request>` document on the wire. Element names are
//! fixed by the protocol; the parser enforces which children each request
//! kind accepts.

use guestauth_core::alias::{AliasInfo, Subject};

/// Wire element names for each request kind.
pub const ELEM_SESSION: &str = "requestSession";
pub const ELEM_CONNECT: &str = "requestConnect";
pub const ELEM_ADD_ALIAS: &str = "requestAddAlias";
pub const ELEM_REMOVE_ALIAS: &str = "requestRemoveAlias";
pub const ELEM_QUERY_ALIASES: &str = "requestQueryAliases";
pub const ELEM_QUERY_MAPPED: &str = "requestQueryMappedAliases";
pub const ELEM_CREATE_TICKET: &str = "requestCreateTicket";
pub const ELEM_VALIDATE_TICKET: &str = "requestValidateTicket";
pub const ELEM_REVOKE_TICKET: &str = "requestRevokeTicket";
pub const ELEM_VALIDATE_SAML: &str = "requestValidateSamlBearerToken";

/// The operation a request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// Ask the public listener for a per-user session socket.
    SessionRequest {
        /// The account to open a session for.
        user_name: String,
    },
    /// First request on a per-user socket; authenticates the connection.
    Connect,
    /// Register a certificate alias for a user.
    AddAlias {
        /// Owner of the alias file.
        user_name: String,
        /// Also record the alias in the global mapping file.
        add_to_mapping: bool,
        /// PEM certificate being registered.
        pem_cert: String,
        /// Subject and comment attached to the registration.
        info: AliasInfo,
    },
    /// Remove a registered alias (one subject, or all when absent).
    RemoveAlias {
        /// Owner of the alias file.
        user_name: String,
        /// PEM certificate being removed.
        pem_cert: String,
        /// Specific subject to drop; `None` removes every subject.
        subject: Option<Subject>,
    },
    /// List a user's registered aliases.
    QueryAliases {
        /// Owner whose aliases are listed.
        user_name: String,
    },
    /// List the global mapping entries.
    QueryMappedAliases,
    /// Mint a ticket for an authenticated identity.
    CreateTicket {
        /// The account the ticket represents.
        user_name: String,
    },
    /// Resolve a ticket back to its identity.
    ValidateTicket {
        /// The opaque ticket value.
        ticket: String,
    },
    /// Revoke a ticket.
    RevokeTicket {
        /// The opaque ticket value.
        ticket: String,
    },
    /// Authenticate a SAML bearer token.
    ValidateSamlBearerToken {
        /// The serialized signed assertion.
        token: String,
        /// Expected account; resolved via the mapping file when absent.
        user_name: Option<String>,
    },
}

impl RequestBody {
    /// The wire element name for this request kind.
    #[must_use]
    pub const fn element_name(&self) -> &'static str {
        match self {
            Self::SessionRequest { .. } => ELEM_SESSION,
            Self::Connect => ELEM_CONNECT,
            Self::AddAlias { .. } => ELEM_ADD_ALIAS,
            Self::RemoveAlias { .. } => ELEM_REMOVE_ALIAS,
            Self::QueryAliases { .. } => ELEM_QUERY_ALIASES,
            Self::QueryMappedAliases => ELEM_QUERY_MAPPED,
            Self::CreateTicket { .. } => ELEM_CREATE_TICKET,
            Self::ValidateTicket { .. } => ELEM_VALIDATE_TICKET,
            Self::RevokeTicket { .. } => ELEM_REVOKE_TICKET,
            Self::ValidateSamlBearerToken { .. } => ELEM_VALIDATE_SAML,
        }
    }
}

/// One complete wire request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Client-chosen sequence number, echoed in the reply.
    pub sequence_number: u64,
    /// The requested operation.
    pub body: RequestBody,
}
