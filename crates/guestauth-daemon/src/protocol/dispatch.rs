//! Request dispatch and privilege policy.
//!
//! Requester identity is the peer uid from `SO_PEERCRED`, never anything
//! the request claims. A "superuser connection" is one whose peer is uid 0
//! or the daemon's own uid; the latter keeps the full stack runnable in
//! tests without root.
//!
//! Policy:
//! - The public socket answers `SessionRequest` only, and `SessionRequest`
//!   is answered only there.
//! - Once shutdown has been requested, every request is refused with a
//!   communication failure so clients re-bootstrap instead of retrying.
//! - A per-user socket answers nothing before a successful `Connect`,
//!   which requires the peer to be the socket's user (or superuser).
//! - Owner-scoped operations (aliases) are allowed for the owner and the
//!   superuser; mapping writes and all ticket/SAML authentication paths
//!   are superuser-only because they act on the host's behalf.
//! - Revoking someone else's ticket is a silent no-op, so revocation
//!   cannot probe which tickets exist.

use std::sync::Arc;

use guestauth_core::context::ServiceContext;
use guestauth_core::error::{ServiceError, ServiceResult};
use guestauth_core::securefile::resolve_user;
use nix::unistd::Uid;
use tracing::{debug, warn};

use super::reply::{encode_reply, ReplyPayload};
use super::request::{Request, RequestBody};
use super::socket_manager::{SessionRegistry, SocketOwner};
use crate::state::DaemonState;

/// Per-connection identity and protocol position.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Peer uid from socket credentials.
    pub peer_uid: u32,
    /// Account name the peer uid resolves to, when it resolves.
    pub peer_user: Option<String>,
    /// Which listener the connection arrived on.
    pub socket_owner: SocketOwner,
    /// Whether a `Connect` has succeeded on this connection.
    pub connected: bool,
}

impl ConnectionContext {
    /// Build the context for a freshly accepted connection.
    #[must_use]
    pub fn new(peer_uid: u32, peer_user: Option<String>, socket_owner: SocketOwner) -> Self {
        Self {
            peer_uid,
            peer_user,
            socket_owner,
            connected: false,
        }
    }
}

/// Routes parsed requests to the service layer under the privilege policy.
pub struct Dispatcher {
    service: Arc<ServiceContext>,
    state: Arc<DaemonState>,
    sessions: Arc<SessionRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over the shared service and daemon state.
    #[must_use]
    pub fn new(
        service: Arc<ServiceContext>,
        state: Arc<DaemonState>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            service,
            state,
            sessions,
        }
    }

    fn is_superuser(&self, conn: &ConnectionContext) -> bool {
        conn.peer_uid == 0 || Uid::from_raw(conn.peer_uid) == Uid::effective()
    }

    fn require_superuser(&self, conn: &ConnectionContext) -> ServiceResult<()> {
        if self.is_superuser(conn) {
            Ok(())
        } else {
            Err(ServiceError::PermissionDenied)
        }
    }

    /// Owner-scoped operations: the owner themselves or the superuser.
    fn authorize_owner(&self, conn: &ConnectionContext, owner: &str) -> ServiceResult<()> {
        if self.is_superuser(conn) || conn.peer_user.as_deref() == Some(owner) {
            Ok(())
        } else {
            Err(ServiceError::PermissionDenied)
        }
    }

    /// Process one request and produce the serialized reply.
    pub async fn dispatch(&self, conn: &mut ConnectionContext, request: Request) -> Vec<u8> {
        let sequence = request.sequence_number;
        let operation = request.body.element_name();
        let result = self.handle(conn, request.body).await;

        match &result {
            Ok(_) => debug!(operation, peer_uid = conn.peer_uid, "request ok"),
            Err(e) if e.is_security_violation() => {
                warn!(
                    target: "audit",
                    operation,
                    peer_uid = conn.peer_uid,
                    error = %e,
                    "request denied with security violation"
                );
            },
            Err(e) => {
                debug!(operation, peer_uid = conn.peer_uid, error = %e, "request failed");
            },
        }

        encode_reply(sequence, &result)
    }

    async fn handle(
        &self,
        conn: &mut ConnectionContext,
        body: RequestBody,
    ) -> ServiceResult<ReplyPayload> {
        if self.state.is_shutting_down() {
            return Err(ServiceError::CommunicationFailure {
                reason: "service is shutting down".to_string(),
            });
        }

        // Gate by listener before looking at the operation itself.
        match (&conn.socket_owner, &body) {
            (SocketOwner::Public, RequestBody::SessionRequest { .. }) => {},
            (SocketOwner::Public, _) => {
                return Err(ServiceError::PermissionDenied);
            },
            (SocketOwner::User(_), RequestBody::SessionRequest { .. }) => {
                return Err(ServiceError::PermissionDenied);
            },
            (SocketOwner::User(_), RequestBody::Connect) => {},
            (SocketOwner::User(_), _) if !conn.connected => {
                return Err(ServiceError::PermissionDenied);
            },
            (SocketOwner::User(_), _) => {},
        }

        match body {
            RequestBody::SessionRequest { user_name } => {
                self.authorize_owner(conn, &user_name)?;
                let path = self.sessions.ensure_user_socket(&user_name)?;
                Ok(ReplyPayload::SessionSocket {
                    path: path.display().to_string(),
                })
            },

            RequestBody::Connect => {
                let SocketOwner::User(owner) = &conn.socket_owner else {
                    return Err(ServiceError::PermissionDenied);
                };
                let (owner_uid, _) = resolve_user(owner)?;
                if !self.is_superuser(conn) && Uid::from_raw(conn.peer_uid) != owner_uid {
                    return Err(ServiceError::PermissionDenied);
                }
                conn.connected = true;
                Ok(ReplyPayload::Ok)
            },

            RequestBody::AddAlias {
                user_name,
                add_to_mapping,
                pem_cert,
                info,
            } => {
                self.authorize_owner(conn, &user_name)?;
                if add_to_mapping {
                    // Mapping entries grant host-side identity resolution.
                    self.require_superuser(conn)?;
                }
                let lock = self.state.user_lock(&user_name).await;
                let _user_guard = lock.lock().await;
                let _mapping_guard = if add_to_mapping {
                    Some(self.state.mapping_lock().lock().await)
                } else {
                    None
                };
                self.service
                    .store()
                    .add_alias(&user_name, add_to_mapping, &pem_cert, &info)?;
                Ok(ReplyPayload::Ok)
            },

            RequestBody::RemoveAlias {
                user_name,
                pem_cert,
                subject,
            } => {
                self.authorize_owner(conn, &user_name)?;
                let lock = self.state.user_lock(&user_name).await;
                let _user_guard = lock.lock().await;
                // Removal may clear orphaned mapping entries.
                let _mapping_guard = self.state.mapping_lock().lock().await;
                self.service
                    .store()
                    .remove_alias(&user_name, &pem_cert, subject.as_ref())?;
                Ok(ReplyPayload::Ok)
            },

            RequestBody::QueryAliases { user_name } => {
                self.authorize_owner(conn, &user_name)?;
                let aliases = self.service.store().query_aliases(&user_name)?;
                Ok(ReplyPayload::Aliases { aliases })
            },

            RequestBody::QueryMappedAliases => {
                let mut mappings = self.service.store().query_mapped_aliases()?;
                if !self.is_superuser(conn) {
                    // Unprivileged callers only see their own entries.
                    let peer = conn.peer_user.clone().unwrap_or_default();
                    mappings.retain(|m| m.user_name == peer);
                }
                Ok(ReplyPayload::MappedAliases { mappings })
            },

            RequestBody::CreateTicket { user_name } => {
                self.require_superuser(conn)?;
                resolve_user(&user_name)?;
                let ticket = self.service.tickets().create(&user_name)?;
                Ok(ReplyPayload::Ticket { ticket })
            },

            RequestBody::ValidateTicket { ticket } => {
                self.require_superuser(conn)?;
                let user_name = self.service.tickets().validate(&ticket)?;
                Ok(ReplyPayload::UserName { user_name })
            },

            RequestBody::RevokeTicket { ticket } => {
                if self.is_superuser(conn) {
                    self.service.tickets().revoke(&ticket, None)?;
                } else {
                    // Scoped to the peer's own tickets; misses are silent.
                    let owner = conn.peer_user.clone().unwrap_or_default();
                    self.service.tickets().revoke(&ticket, Some(&owner))?;
                }
                Ok(ReplyPayload::Ok)
            },

            RequestBody::ValidateSamlBearerToken { token, user_name } => {
                self.require_superuser(conn)?;
                let auth = self
                    .service
                    .validate_saml_bearer(&token, user_name.as_deref())?;
                Ok(ReplyPayload::SamlResult {
                    user_name: auth.user_name,
                    subject_name: auth.subject_name,
                })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use guestauth_core::alias::{AliasInfo, Subject};
    use guestauth_core::config::BrokerConfig;
    use nix::unistd::User;
    use tempfile::TempDir;

    use super::*;
    use crate::protocol::socket_manager::SocketManager;

    fn current_user() -> String {
        User::from_uid(Uid::effective()).unwrap().unwrap().name
    }

    fn test_cert_pem() -> String {
        let key = rcgen::KeyPair::generate().unwrap();
        rcgen::CertificateParams::new(vec!["dispatch.test".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap()
            .pem()
    }

    struct Fixture {
        dispatcher: Dispatcher,
        state: Arc<DaemonState>,
        _tmp: TempDir,
        _manager: SocketManager,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store_dir = tmp.path().join("store");
        std::fs::create_dir(&store_dir).unwrap();
        let config = BrokerConfig {
            store_dir,
            socket_dir: tmp.path().join("sock"),
            superuser: current_user(),
            ..BrokerConfig::default()
        };
        let manager = SocketManager::bind(&config.socket_dir, 10).unwrap();
        let state = Arc::new(DaemonState::new());
        let dispatcher = Dispatcher::new(
            Arc::new(ServiceContext::new(config)),
            Arc::clone(&state),
            manager.registry(),
        );
        Fixture {
            dispatcher,
            state,
            _tmp: tmp,
            _manager: manager,
        }
    }

    fn superuser_conn(user: &str) -> ConnectionContext {
        let mut conn = ConnectionContext::new(
            Uid::effective().as_raw(),
            Some(user.to_string()),
            SocketOwner::User(user.to_string()),
        );
        conn.connected = true;
        conn
    }

    fn foreign_conn(user_socket: &str) -> ConnectionContext {
        // A peer uid that is neither 0 nor the daemon's own uid.
        let mut conn = ConnectionContext::new(
            Uid::effective().as_raw() + 12345,
            Some("mallory".to_string()),
            SocketOwner::User(user_socket.to_string()),
        );
        conn.connected = true;
        conn
    }

    #[tokio::test]
    async fn public_socket_only_brokers_sessions() {
        let fx = fixture();
        let mut conn = ConnectionContext::new(
            Uid::effective().as_raw(),
            Some(current_user()),
            SocketOwner::Public,
        );
        let result = fx
            .dispatcher
            .handle(&mut conn, RequestBody::QueryMappedAliases)
            .await;
        assert!(matches!(result, Err(ServiceError::PermissionDenied)));

        let result = fx
            .dispatcher
            .handle(
                &mut conn,
                RequestBody::SessionRequest {
                    user_name: current_user(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(result, ReplyPayload::SessionSocket { .. }));
    }

    #[tokio::test]
    async fn session_request_is_public_socket_only() {
        let fx = fixture();
        let user = current_user();
        // Fully connected, privileged, and still the wrong socket.
        let mut conn = superuser_conn(&user);
        let result = fx
            .dispatcher
            .handle(&mut conn, RequestBody::SessionRequest { user_name: user })
            .await;
        assert!(matches!(result, Err(ServiceError::PermissionDenied)));
    }

    #[tokio::test]
    async fn shutdown_refuses_new_requests() {
        let fx = fixture();
        let user = current_user();
        let mut conn = superuser_conn(&user);
        fx.state.request_shutdown();
        let result = fx
            .dispatcher
            .handle(&mut conn, RequestBody::QueryAliases { user_name: user })
            .await;
        assert!(matches!(
            result,
            Err(ServiceError::CommunicationFailure { .. })
        ));
    }

    #[tokio::test]
    async fn per_user_socket_requires_connect_first() {
        let fx = fixture();
        let user = current_user();
        let mut conn = ConnectionContext::new(
            Uid::effective().as_raw(),
            Some(user.clone()),
            SocketOwner::User(user.clone()),
        );
        let result = fx
            .dispatcher
            .handle(&mut conn, RequestBody::QueryAliases { user_name: user })
            .await;
        assert!(matches!(result, Err(ServiceError::PermissionDenied)));

        let result = fx.dispatcher.handle(&mut conn, RequestBody::Connect).await;
        assert!(result.is_ok());
        assert!(conn.connected);
    }

    #[tokio::test]
    async fn foreign_peer_cannot_connect_to_another_users_socket() {
        let fx = fixture();
        let mut conn = foreign_conn(&current_user());
        conn.connected = false;
        let result = fx.dispatcher.handle(&mut conn, RequestBody::Connect).await;
        assert!(matches!(result, Err(ServiceError::PermissionDenied)));
        assert!(!conn.connected);
    }

    #[tokio::test]
    async fn add_and_query_alias_round_trip() {
        let fx = fixture();
        let user = current_user();
        let mut conn = superuser_conn(&user);
        let pem = test_cert_pem();

        let result = fx
            .dispatcher
            .handle(
                &mut conn,
                RequestBody::AddAlias {
                    user_name: user.clone(),
                    add_to_mapping: true,
                    pem_cert: pem.clone(),
                    info: AliasInfo {
                        subject: Subject::Named("svc@corp".to_string()),
                        comment: "ci".to_string(),
                    },
                },
            )
            .await;
        assert!(result.is_ok());

        let ReplyPayload::Aliases { aliases } = fx
            .dispatcher
            .handle(
                &mut conn,
                RequestBody::QueryAliases {
                    user_name: user.clone(),
                },
            )
            .await
            .unwrap()
        else {
            panic!("wrong payload");
        };
        assert_eq!(aliases.len(), 1);

        let ReplyPayload::MappedAliases { mappings } = fx
            .dispatcher
            .handle(&mut conn, RequestBody::QueryMappedAliases)
            .await
            .unwrap()
        else {
            panic!("wrong payload");
        };
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].user_name, user);
    }

    #[tokio::test]
    async fn mapping_write_requires_superuser() {
        let fx = fixture();
        let mut conn = foreign_conn("mallory");
        conn.peer_user = Some("mallory".to_string());
        conn.socket_owner = SocketOwner::User("mallory".to_string());
        let result = fx
            .dispatcher
            .handle(
                &mut conn,
                RequestBody::AddAlias {
                    user_name: "mallory".to_string(),
                    add_to_mapping: true,
                    pem_cert: test_cert_pem(),
                    info: AliasInfo {
                        subject: Subject::Any,
                        comment: String::new(),
                    },
                },
            )
            .await;
        assert!(matches!(result, Err(ServiceError::PermissionDenied)));
    }

    #[tokio::test]
    async fn ticket_flow_is_superuser_only() {
        let fx = fixture();
        let user = current_user();
        let mut superuser = superuser_conn(&user);
        let mut foreign = foreign_conn(&user);

        let result = fx
            .dispatcher
            .handle(
                &mut foreign,
                RequestBody::CreateTicket {
                    user_name: user.clone(),
                },
            )
            .await;
        assert!(matches!(result, Err(ServiceError::PermissionDenied)));

        let ReplyPayload::Ticket { ticket } = fx
            .dispatcher
            .handle(
                &mut superuser,
                RequestBody::CreateTicket {
                    user_name: user.clone(),
                },
            )
            .await
            .unwrap()
        else {
            panic!("wrong payload");
        };

        let ReplyPayload::UserName { user_name } = fx
            .dispatcher
            .handle(
                &mut superuser,
                RequestBody::ValidateTicket {
                    ticket: ticket.clone(),
                },
            )
            .await
            .unwrap()
        else {
            panic!("wrong payload");
        };
        assert_eq!(user_name, user);

        // Foreign revocation is silent and ineffective.
        let result = fx
            .dispatcher
            .handle(
                &mut foreign,
                RequestBody::RevokeTicket {
                    ticket: ticket.clone(),
                },
            )
            .await;
        assert!(result.is_ok());
        assert!(fx
            .dispatcher
            .handle(&mut superuser, RequestBody::ValidateTicket { ticket })
            .await
            .is_ok());
    }
}
