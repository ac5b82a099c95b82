//! SAML 2.0 bearer token verification.
//!
//! A token is accepted only when every stage passes: the document parses
//! under the hardened XML rules, the assertion is structurally valid, a
//! bearer subject confirmation and the top-level conditions hold at the
//! current time (within the configured clock skew), and the enveloped
//! XML-DSig signature verifies against the leaf of the embedded certificate
//! chain. The chain itself is NOT trusted here; callers establish trust by
//! matching it against registered aliases.
//!
//! # Security Considerations
//!
//! Every failure surfaces as [`ServiceError::AuthenticationDenied`] with a
//! fixed message; the concrete cause is logged at debug level only, so a
//! requester cannot probe which stage rejected a forged token.

mod assertion;
mod signature;
pub mod xmltree;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};

/// SAML 2.0 assertion namespace.
pub const NS_SAML: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
/// XML digital signature namespace.
pub const NS_DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
/// The bearer subject confirmation method.
pub const SAML_BEARER_METHOD: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";

/// Outcome of a successful token verification.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    /// The asserted subject (`NameID` value).
    pub subject_name: String,
    /// Signing certificate chain from `KeyInfo`, leaf first, in DER.
    pub chain_der: Vec<Vec<u8>>,
}

/// Verifies SAML bearer tokens against time windows and signatures.
#[derive(Debug, Clone)]
pub struct SamlVerifier {
    skew: Duration,
    host_identity: Option<String>,
}

impl SamlVerifier {
    /// Create a verifier with the given clock skew allowance in seconds
    /// and optional host identity for `Recipient` matching.
    #[must_use]
    pub fn new(clock_skew_secs: u64, host_identity: Option<String>) -> Self {
        let secs = i64::try_from(clock_skew_secs).unwrap_or(3600);
        Self {
            skew: Duration::seconds(secs),
            host_identity,
        }
    }

    /// Verify a bearer token and return its subject and signing chain.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::AuthenticationDenied`] on any verification
    /// failure.
    pub fn verify(&self, token: &str) -> ServiceResult<ValidatedToken> {
        self.verify_at(token, Utc::now())
    }

    fn verify_at(&self, token: &str, now: DateTime<Utc>) -> ServiceResult<ValidatedToken> {
        let root = xmltree::parse_document(token.as_bytes()).map_err(|e| {
            debug!(error = %e, "SAML token is not well-formed XML");
            ServiceError::AuthenticationDenied
        })?;

        let id = assertion::validate_structure(&root)?;
        let subject_name =
            assertion::check_subject(&root, now, self.skew, self.host_identity.as_deref())?;
        assertion::check_conditions(&root, now, self.skew)?;
        let chain_der = signature::verify_enveloped_signature(&root, &id)?;

        Ok(ValidatedToken {
            subject_name,
            chain_der,
        })
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use chrono::SecondsFormat;
    use ring::rand::SystemRandom;
    use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};

    use super::*;

    struct Signer {
        cert_der: Vec<u8>,
        ring_key: EcdsaKeyPair,
        rng: SystemRandom,
    }

    impl Signer {
        fn generate() -> Self {
            let key = rcgen::KeyPair::generate().unwrap();
            let params =
                rcgen::CertificateParams::new(vec!["token-signer.test".to_string()]).unwrap();
            let cert = params.self_signed(&key).unwrap();
            let rng = SystemRandom::new();
            let ring_key =
                EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &key.serialize_der(), &rng)
                    .unwrap();
            Signer {
                cert_der: cert.der().to_vec(),
                ring_key,
                rng,
            }
        }

        fn cert_b64(&self) -> String {
            BASE64.encode(&self.cert_der)
        }
    }

    fn rfc3339(t: DateTime<Utc>) -> String {
        t.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Build a properly signed bearer assertion by computing the digest
    /// and signature over the same canonical bytes the verifier uses.
    fn build_token(
        signer: &Signer,
        subject: &str,
        window_end: DateTime<Utc>,
        recipient: Option<&str>,
        extra_condition: &str,
    ) -> String {
        let id = "_7f9c24e8";
        let not_before = rfc3339(Utc::now() - Duration::minutes(5));
        let not_on_or_after = rfc3339(window_end);
        let recipient_attr = recipient
            .map(|r| format!(" Recipient=\"{r}\""))
            .unwrap_or_default();

        let open = format!(
            "<saml:Assertion xmlns:saml=\"{NS_SAML}\" ID=\"{id}\" \
             Version=\"2.0\" IssueInstant=\"{not_before}\">"
        );
        let body = format!(
            "<saml:Issuer>token-issuer.test</saml:Issuer>\
             <saml:Subject><saml:NameID>{subject}</saml:NameID>\
             <saml:SubjectConfirmation Method=\"{SAML_BEARER_METHOD}\">\
             <saml:SubjectConfirmationData NotOnOrAfter=\"{not_on_or_after}\"{recipient_attr}/>\
             </saml:SubjectConfirmation></saml:Subject>\
             <saml:Conditions NotBefore=\"{not_before}\" NotOnOrAfter=\"{not_on_or_after}\">\
             {extra_condition}</saml:Conditions>"
        );

        let unsigned = format!("{open}{body}</saml:Assertion>");
        let tree = xmltree::parse_document(unsigned.as_bytes()).unwrap();
        let digest =
            ring::digest::digest(&ring::digest::SHA256, &xmltree::canonicalize(&tree));
        let digest_b64 = BASE64.encode(digest.as_ref());

        let signed_info = format!(
            "<ds:SignedInfo xmlns:ds=\"{NS_DSIG}\">\
             <ds:CanonicalizationMethod Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>\
             <ds:SignatureMethod Algorithm=\"http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256\"/>\
             <ds:Reference URI=\"#{id}\"><ds:Transforms>\
             <ds:Transform Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\"/>\
             <ds:Transform Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>\
             </ds:Transforms>\
             <ds:DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"/>\
             <ds:DigestValue>{digest_b64}</ds:DigestValue></ds:Reference></ds:SignedInfo>"
        );
        let signed_info_tree = xmltree::parse_document(signed_info.as_bytes()).unwrap();
        let signed_info_c14n = xmltree::canonicalize(&signed_info_tree);
        let sig = signer
            .ring_key
            .sign(&signer.rng, &signed_info_c14n)
            .unwrap();
        let sig_b64 = BASE64.encode(sig.as_ref());
        let cert_b64 = signer.cert_b64();

        format!(
            "{open}{body}<ds:Signature xmlns:ds=\"{NS_DSIG}\">{signed_info}\
             <ds:SignatureValue>{sig_b64}</ds:SignatureValue>\
             <ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert_b64}</ds:X509Certificate>\
             </ds:X509Data></ds:KeyInfo></ds:Signature></saml:Assertion>"
        )
    }

    #[test]
    fn valid_token_verifies() {
        let signer = Signer::generate();
        let token = build_token(
            &signer,
            "alice@corp.test",
            Utc::now() + Duration::minutes(10),
            None,
            "",
        );
        let verifier = SamlVerifier::new(300, None);
        let validated = verifier.verify(&token).unwrap();
        assert_eq!(validated.subject_name, "alice@corp.test");
        assert_eq!(validated.chain_der, vec![signer.cert_der.clone()]);
    }

    /// Standard wire form: `xmlns:ds` is declared once on `<ds:Signature>`
    /// and inherited by `SignedInfo`, whose canonical form must therefore
    /// emit the binding itself.
    #[test]
    fn namespace_declared_on_signature_only_verifies() {
        let signer = Signer::generate();
        let id = "_std4711";
        let not_before = rfc3339(Utc::now() - Duration::minutes(5));
        let not_on_or_after = rfc3339(Utc::now() + Duration::minutes(10));

        let open = format!(
            "<saml:Assertion xmlns:saml=\"{NS_SAML}\" ID=\"{id}\" \
             Version=\"2.0\" IssueInstant=\"{not_before}\">"
        );
        let body = format!(
            "<saml:Issuer>token-issuer.test</saml:Issuer>\
             <saml:Subject><saml:NameID>alice@corp.test</saml:NameID>\
             <saml:SubjectConfirmation Method=\"{SAML_BEARER_METHOD}\">\
             <saml:SubjectConfirmationData NotOnOrAfter=\"{not_on_or_after}\"/>\
             </saml:SubjectConfirmation></saml:Subject>\
             <saml:Conditions NotBefore=\"{not_before}\" NotOnOrAfter=\"{not_on_or_after}\">\
             </saml:Conditions>"
        );

        let unsigned = format!("{open}{body}</saml:Assertion>");
        let tree = xmltree::parse_document(unsigned.as_bytes()).unwrap();
        let digest =
            ring::digest::digest(&ring::digest::SHA256, &xmltree::canonicalize(&tree));
        let digest_b64 = BASE64.encode(digest.as_ref());

        // No declaration on SignedInfo itself.
        let signed_info = format!(
            "<ds:SignedInfo>\
             <ds:CanonicalizationMethod Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>\
             <ds:SignatureMethod Algorithm=\"http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256\"/>\
             <ds:Reference URI=\"#{id}\"><ds:Transforms>\
             <ds:Transform Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\"/>\
             <ds:Transform Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>\
             </ds:Transforms>\
             <ds:DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"/>\
             <ds:DigestValue>{digest_b64}</ds:DigestValue></ds:Reference></ds:SignedInfo>"
        );
        // What a conforming signer actually signs: the exclusive canonical
        // form, where the inherited ds binding surfaces on SignedInfo.
        let canonical_doc = signed_info.replacen(
            "<ds:SignedInfo",
            &format!("<ds:SignedInfo xmlns:ds=\"{NS_DSIG}\""),
            1,
        );
        let signed_bytes =
            xmltree::canonicalize(&xmltree::parse_document(canonical_doc.as_bytes()).unwrap());
        let sig = signer.ring_key.sign(&signer.rng, &signed_bytes).unwrap();
        let sig_b64 = BASE64.encode(sig.as_ref());
        let cert_b64 = signer.cert_b64();

        let token = format!(
            "{open}{body}<ds:Signature xmlns:ds=\"{NS_DSIG}\">{signed_info}\
             <ds:SignatureValue>{sig_b64}</ds:SignatureValue>\
             <ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert_b64}</ds:X509Certificate>\
             </ds:X509Data></ds:KeyInfo></ds:Signature></saml:Assertion>"
        );

        let validated = SamlVerifier::new(300, None).verify(&token).unwrap();
        assert_eq!(validated.subject_name, "alice@corp.test");
    }

    #[test]
    fn expired_window_is_denied() {
        let signer = Signer::generate();
        let token = build_token(
            &signer,
            "alice@corp.test",
            Utc::now() - Duration::minutes(30),
            None,
            "",
        );
        let err = SamlVerifier::new(300, None).verify(&token).unwrap_err();
        assert!(matches!(err, ServiceError::AuthenticationDenied));
    }

    #[test]
    fn skew_tolerates_recent_expiry() {
        let signer = Signer::generate();
        let token = build_token(
            &signer,
            "alice@corp.test",
            Utc::now() - Duration::minutes(1),
            None,
            "",
        );
        assert!(SamlVerifier::new(300, None).verify(&token).is_ok());
        let err = SamlVerifier::new(10, None).verify(&token).unwrap_err();
        assert!(matches!(err, ServiceError::AuthenticationDenied));
    }

    #[test]
    fn tampered_assertion_is_denied() {
        let signer = Signer::generate();
        let token = build_token(
            &signer,
            "alice@corp.test",
            Utc::now() + Duration::minutes(10),
            None,
            "",
        );
        let tampered = token.replace("token-issuer.test", "evil-issuer.test");
        let err = SamlVerifier::new(300, None).verify(&tampered).unwrap_err();
        assert!(matches!(err, ServiceError::AuthenticationDenied));
    }

    #[test]
    fn substituted_certificate_is_denied() {
        let signer = Signer::generate();
        let imposter = Signer::generate();
        let token = build_token(
            &signer,
            "alice@corp.test",
            Utc::now() + Duration::minutes(10),
            None,
            "",
        );
        let swapped = token.replace(&signer.cert_b64(), &imposter.cert_b64());
        let err = SamlVerifier::new(300, None).verify(&swapped).unwrap_err();
        assert!(matches!(err, ServiceError::AuthenticationDenied));
    }

    #[test]
    fn unknown_condition_extension_is_denied() {
        let signer = Signer::generate();
        let token = build_token(
            &signer,
            "alice@corp.test",
            Utc::now() + Duration::minutes(10),
            None,
            "<saml:OneTimeUse/>",
        );
        let err = SamlVerifier::new(300, None).verify(&token).unwrap_err();
        assert!(matches!(err, ServiceError::AuthenticationDenied));
    }

    #[test]
    fn unsigned_assertion_is_denied() {
        let token = format!(
            "<saml:Assertion xmlns:saml=\"{NS_SAML}\" ID=\"_x\" Version=\"2.0\">\
             <saml:Issuer>i</saml:Issuer>\
             <saml:Subject><saml:NameID>alice</saml:NameID>\
             <saml:SubjectConfirmation Method=\"{SAML_BEARER_METHOD}\"/>\
             </saml:Subject></saml:Assertion>"
        );
        let err = SamlVerifier::new(300, None).verify(&token).unwrap_err();
        assert!(matches!(err, ServiceError::AuthenticationDenied));
    }

    #[test]
    fn recipient_must_match_configured_host() {
        let signer = Signer::generate();
        let token = build_token(
            &signer,
            "alice@corp.test",
            Utc::now() + Duration::minutes(10),
            Some("host-a"),
            "",
        );
        assert!(SamlVerifier::new(300, Some("host-a".to_string()))
            .verify(&token)
            .is_ok());
        let err = SamlVerifier::new(300, Some("host-b".to_string()))
            .verify(&token)
            .unwrap_err();
        assert!(matches!(err, ServiceError::AuthenticationDenied));
        // With no configured identity the attribute is not enforced.
        assert!(SamlVerifier::new(300, None).verify(&token).is_ok());
    }

    #[test]
    fn doctype_in_token_is_denied() {
        let token = "<!DOCTYPE a [<!ENTITY x \"y\">]><a/>";
        let err = SamlVerifier::new(300, None).verify(token).unwrap_err();
        assert!(matches!(err, ServiceError::AuthenticationDenied));
    }
}
