//! Certificate-chain trust verification against the alias store.
//!
//! A presented chain (leaf first) authenticates as a user only when at
//! least one chain certificate is registered in that user's alias store
//! with a subject matching the target, *and* the chain itself builds to a
//! valid X.509 path whose anchors are exactly the registered certificates.
//! Path building is delegated to a [`ChainValidator`] so the trust logic
//! stays testable without real crypto.

use tracing::debug;

use crate::alias::store::AliasStore;
use crate::alias::{AliasInfo, Subject};
use crate::certificate::cert_matches_der;
use crate::error::{ServiceError, ServiceResult};
use crate::securefile::resolve_user;

/// Outcome of a successful trust verification, used to stamp tickets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustVerificationResult {
    /// The user the chain authenticated as.
    pub user_name: String,
    /// The alias entry that produced the match (subject and comment).
    pub matched: AliasInfo,
}

/// X.509 path validation primitive.
///
/// `trusted` holds the registered certificates acting as trust anchors and
/// `untrusted` the remaining presented intermediates, both leaf-excluded.
/// When `trusted` is empty the leaf itself was the registered certificate
/// and must serve as its own anchor (the self-signed registration case).
pub trait ChainValidator: Send + Sync {
    /// Validate the path from `leaf` to one of the anchors.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::AuthenticationDenied`] when no valid path
    /// exists. Implementations log the specific cause locally.
    fn validate(
        &self,
        leaf: &[u8],
        untrusted: &[Vec<u8>],
        trusted: &[Vec<u8>],
    ) -> ServiceResult<()>;
}

/// Production validator backed by webpki path building.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebpkiChainValidator;

impl ChainValidator for WebpkiChainValidator {
    fn validate(
        &self,
        leaf: &[u8],
        untrusted: &[Vec<u8>],
        trusted: &[Vec<u8>],
    ) -> ServiceResult<()> {
        let leaf_der = pki_types::CertificateDer::from(leaf.to_vec());

        let anchor_ders: Vec<pki_types::CertificateDer<'static>> = if trusted.is_empty() {
            // Leaf was the registered certificate; it anchors itself.
            vec![leaf_der.clone().into_owned()]
        } else {
            trusted
                .iter()
                .map(|d| pki_types::CertificateDer::from(d.clone()))
                .collect()
        };

        let anchors = anchor_ders
            .iter()
            .map(webpki::anchor_from_trusted_cert)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                debug!(error = %e, "trust anchor extraction failed");
                ServiceError::AuthenticationDenied
            })?;

        let intermediates: Vec<pki_types::CertificateDer<'_>> = untrusted
            .iter()
            .map(|d| pki_types::CertificateDer::from(d.clone()))
            .collect();

        let end_entity = webpki::EndEntityCert::try_from(&leaf_der).map_err(|e| {
            debug!(error = %e, "leaf certificate rejected");
            ServiceError::AuthenticationDenied
        })?;

        end_entity
            .verify_for_usage(
                webpki::ALL_VERIFICATION_ALGS,
                &anchors,
                &intermediates,
                pki_types::UnixTime::now(),
                webpki::KeyUsage::client_auth(),
                None,
                None,
            )
            .map_err(|e| {
                // Detail stays local; the caller reports a generic denial.
                debug!(error = %e, "certificate path validation failed");
                ServiceError::AuthenticationDenied
            })?;

        Ok(())
    }
}

/// Verifies presented chains against the alias store.
pub struct TrustChainVerifier<'a> {
    store: &'a AliasStore,
    validator: &'a dyn ChainValidator,
}

impl<'a> TrustChainVerifier<'a> {
    /// Create a verifier over `store` delegating path checks to
    /// `validator`.
    #[must_use]
    pub fn new(store: &'a AliasStore, validator: &'a dyn ChainValidator) -> Self {
        Self { store, validator }
    }

    /// Resolve the acting user for a chain with no caller-supplied name by
    /// scanning the global mapping.
    fn resolve_user_from_mapping(
        &self,
        chain_der: &[Vec<u8>],
        subject: &Subject,
    ) -> ServiceResult<String> {
        let mappings = self.store.load_mapping()?;
        let mut resolved: Option<String> = None;
        for mapping in &mappings {
            let cert_in_chain = chain_der
                .iter()
                .any(|der| cert_matches_der(&mapping.pem_cert, der));
            if !cert_in_chain {
                continue;
            }
            if !mapping.subjects.iter().any(|s| s.accepts(subject)) {
                continue;
            }
            match &resolved {
                Some(user) if *user != mapping.user_name => {
                    return Err(ServiceError::MultipleMappings);
                },
                Some(_) => {},
                None => resolved = Some(mapping.user_name.clone()),
            }
        }
        resolved.ok_or_else(|| {
            debug!("no mapping entry matched the presented chain");
            ServiceError::AuthenticationDenied
        })
    }

    /// Verify a chain (leaf first, DER encoded) as `subject`, acting as
    /// `user_name` or as whatever user the mapping store resolves.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::MultipleMappings`] when mapping resolution is
    ///   ambiguous.
    /// - [`ServiceError::AuthenticationDenied`] on every other trust
    ///   failure; the specific cause is logged locally only.
    pub fn verify_chain(
        &self,
        chain_der: &[Vec<u8>],
        user_name: Option<&str>,
        subject: &Subject,
    ) -> ServiceResult<TrustVerificationResult> {
        if chain_der.is_empty() {
            return Err(ServiceError::invalid_argument("empty certificate chain"));
        }

        let user = match user_name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.resolve_user_from_mapping(chain_der, subject)?,
        };

        // Deleted accounts stay queryable but are not authenticatable.
        if let Err(e) = resolve_user(&user) {
            debug!(user, error = %e, "resolved user does not exist");
            return Err(ServiceError::AuthenticationDenied);
        }

        let aliases = self.store.load_user_aliases(&user)?;

        // Partition the chain into trusted certificates (registered with a
        // matching subject) and everything else, remembering which alias
        // entry matched each trusted certificate.
        let mut matches: Vec<(usize, AliasInfo)> = Vec::new();
        for (idx, der) in chain_der.iter().enumerate() {
            let matched = aliases
                .iter()
                .filter(|a| cert_matches_der(&a.pem_cert, der))
                .flat_map(|a| a.infos.iter())
                .find(|info| info.subject.accepts(subject));
            if let Some(info) = matched {
                matches.push((idx, info.clone()));
            }
        }

        if matches.is_empty() {
            debug!(user, "no presented certificate is registered for the user");
            return Err(ServiceError::AuthenticationDenied);
        }

        // When several trusted certificates match, the root-most match wins.
        // The chain is leaf-first, so that is the highest index.
        let (_, matched_info) = matches
            .iter()
            .max_by_key(|(idx, _)| *idx)
            .cloned()
            .unwrap_or_else(|| matches[0].clone());

        let trusted_idx: Vec<usize> = matches.iter().map(|(idx, _)| *idx).collect();
        let leaf = &chain_der[0];
        let trusted_rest: Vec<Vec<u8>> = chain_der
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(idx, _)| trusted_idx.contains(idx))
            .map(|(_, der)| der.clone())
            .collect();
        let untrusted_rest: Vec<Vec<u8>> = chain_der
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(idx, _)| !trusted_idx.contains(idx))
            .map(|(_, der)| der.clone())
            .collect();

        self.validator.validate(leaf, &untrusted_rest, &trusted_rest)?;

        Ok(TrustVerificationResult {
            user_name: user,
            matched: matched_info,
        })
    }
}
