//! Shared service context.
//!
//! Bundles the configured components (alias store, SAML verifier, chain
//! validator, ticket broker) behind one handle so the daemon's dispatch
//! layer receives everything through a single `Arc`.

use crate::alias::store::AliasStore;
use crate::alias::Subject;
use crate::config::BrokerConfig;
use crate::error::ServiceResult;
use crate::saml::SamlVerifier;
use crate::ticket::TicketBroker;
use crate::trustchain::{ChainValidator, TrustChainVerifier, TrustVerificationResult, WebpkiChainValidator};

/// Outcome of a full SAML bearer authentication.
#[derive(Debug, Clone)]
pub struct SamlAuthResult {
    /// The OS user the token authenticated as.
    pub user_name: String,
    /// The SAML subject (`NameID`) the token asserted.
    pub subject_name: String,
}

/// Configured component bundle shared by every connection.
pub struct ServiceContext {
    config: BrokerConfig,
    store: AliasStore,
    saml: SamlVerifier,
    validator: Box<dyn ChainValidator>,
    tickets: TicketBroker,
}

impl ServiceContext {
    /// Build a context from configuration with the production chain
    /// validator.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_validator(config, Box::new(WebpkiChainValidator))
    }

    /// Build a context with a caller-supplied chain validator.
    #[must_use]
    pub fn with_validator(config: BrokerConfig, validator: Box<dyn ChainValidator>) -> Self {
        let store = AliasStore::new(config.store_dir.clone(), config.superuser.clone());
        let saml = SamlVerifier::new(config.clock_skew_secs, config.host_identity.clone());
        let tickets = TicketBroker::new(config.ticket_ttl_secs);
        Self {
            config,
            store,
            saml,
            validator,
            tickets,
        }
    }

    /// The configuration this context was built from.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// The alias store.
    #[must_use]
    pub fn store(&self) -> &AliasStore {
        &self.store
    }

    /// The ticket broker.
    #[must_use]
    pub fn tickets(&self) -> &TicketBroker {
        &self.tickets
    }

    /// Verify a DER certificate chain against the alias store.
    ///
    /// # Errors
    ///
    /// See [`TrustChainVerifier::verify_chain`].
    pub fn verify_chain(
        &self,
        chain_der: &[Vec<u8>],
        user_name: Option<&str>,
        subject: &Subject,
    ) -> ServiceResult<TrustVerificationResult> {
        TrustChainVerifier::new(&self.store, self.validator.as_ref())
            .verify_chain(chain_der, user_name, subject)
    }

    /// Authenticate a SAML bearer token: verify the token itself, then
    /// establish trust in its signing chain through the alias store.
    ///
    /// `user_name` pins the expected account; when absent the global
    /// mapping resolves it.
    ///
    /// # Errors
    ///
    /// Returns the trust-chain or token verification error; token
    /// failures are always `AuthenticationDenied`.
    pub fn validate_saml_bearer(
        &self,
        token: &str,
        user_name: Option<&str>,
    ) -> ServiceResult<SamlAuthResult> {
        let validated = self.saml.verify(token)?;
        let subject = Subject::Named(validated.subject_name.clone());
        let result = self.verify_chain(&validated.chain_der, user_name, &subject)?;
        Ok(SamlAuthResult {
            user_name: result.user_name,
            subject_name: validated.subject_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use nix::unistd::{User, Uid};

    use super::*;
    use crate::error::ServiceError;

    fn current_user() -> String {
        User::from_uid(Uid::effective())
            .unwrap()
            .unwrap()
            .name
    }

    fn test_context(dir: &std::path::Path) -> ServiceContext {
        let config = BrokerConfig {
            store_dir: dir.to_path_buf(),
            superuser: current_user(),
            ..BrokerConfig::default()
        };
        ServiceContext::new(config)
    }

    #[test]
    fn tickets_flow_through_the_context() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let ticket = ctx.tickets().create("alice").unwrap();
        assert_eq!(ctx.tickets().validate(&ticket).unwrap(), "alice");
    }

    #[test]
    fn unregistered_chain_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["nobody.test".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let user = current_user();
        let err = ctx
            .verify_chain(
                &[cert.der().to_vec()],
                Some(&user),
                &Subject::Named("nobody".to_string()),
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::AuthenticationDenied));
    }
}
