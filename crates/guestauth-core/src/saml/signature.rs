//! XML-DSig verification for enveloped SAML assertion signatures.
//!
//! The supported profile is deliberately narrow: exclusive C14N without
//! comments, exactly one `Reference` pointing at the assertion's `ID`, an
//! enveloped-signature transform, SHA-256 digests, and RSA or ECDSA P-256
//! signatures. Anything outside that profile is rejected.
//!
//! The certificate chain carried in `KeyInfo` is returned to the caller so
//! that alias trust can be established against the registered store; this
//! module only proves the token was signed by the leaf of that chain.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::digest;
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_FIXED, RSA_PKCS1_2048_8192_SHA256};
use tracing::debug;
use x509_parser::oid_registry::{OID_KEY_TYPE_EC_PUBLIC_KEY, OID_PKCS1_RSAENCRYPTION};
use x509_parser::prelude::X509Certificate;
use x509_parser::prelude::FromDer;

use super::xmltree::{canonicalize, XmlElement};
use super::NS_DSIG;
use crate::error::{ServiceError, ServiceResult};

/// Canonicalization algorithm: exclusive C14N without comments.
const ALG_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
/// The enveloped-signature reference transform.
const ALG_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
/// RSA PKCS#1 v1.5 over SHA-256.
const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
/// ECDSA P-256 over SHA-256; the signature value is raw `r || s`.
const ALG_ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
/// SHA-256 digest method.
const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

fn denied(reason: impl std::fmt::Display) -> ServiceError {
    debug!(%reason, "SAML signature rejected");
    ServiceError::AuthenticationDenied
}

/// Base64 in XML content may be wrapped; strip all whitespace first.
fn decode_base64_content(text: &str, what: &str) -> ServiceResult<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(compact)
        .map_err(|e| denied(format!("undecodable base64 in {what}: {e}")))
}

fn required_child<'a>(
    parent: &'a XmlElement,
    local: &str,
) -> ServiceResult<&'a XmlElement> {
    parent
        .find_child(NS_DSIG, local)
        .ok_or_else(|| denied(format!("Signature lacks required {local} element")))
}

fn algorithm_attr<'a>(element: &'a XmlElement, local: &str) -> ServiceResult<&'a str> {
    element
        .attr("Algorithm")
        .ok_or_else(|| denied(format!("{local} has no Algorithm attribute")))
}

/// Validate the single `Reference` and return its digest value.
fn check_reference(signed_info: &XmlElement, assertion_id: &str) -> ServiceResult<Vec<u8>> {
    let mut references = signed_info.find_children(NS_DSIG, "Reference");
    let reference = references
        .next()
        .ok_or_else(|| denied("SignedInfo has no Reference"))?;
    if references.next().is_some() {
        return Err(denied("multiple References are not supported"));
    }

    let expected_uri = format!("#{assertion_id}");
    match reference.attr("URI") {
        Some(uri) if uri == expected_uri => {},
        other => {
            return Err(denied(format!(
                "Reference URI {other:?} does not target the assertion ID"
            )))
        },
    }

    let mut saw_enveloped = false;
    if let Some(transforms) = reference.find_child(NS_DSIG, "Transforms") {
        for transform in transforms.find_children(NS_DSIG, "Transform") {
            match algorithm_attr(transform, "Transform")? {
                ALG_ENVELOPED => saw_enveloped = true,
                ALG_EXC_C14N => {},
                other => {
                    return Err(denied(format!("unsupported transform {other:?}")));
                },
            }
        }
    }
    if !saw_enveloped {
        return Err(denied("Reference lacks the enveloped-signature transform"));
    }

    let digest_method = required_child(reference, "DigestMethod")?;
    if algorithm_attr(digest_method, "DigestMethod")? != ALG_SHA256 {
        return Err(denied("unsupported digest algorithm"));
    }

    let digest_value = required_child(reference, "DigestValue")?;
    decode_base64_content(&digest_value.text(), "DigestValue")
}

/// Extract the leaf-first certificate chain from `KeyInfo/X509Data`.
fn extract_chain(signature: &XmlElement) -> ServiceResult<Vec<Vec<u8>>> {
    let key_info = required_child(signature, "KeyInfo")?;
    let x509_data = required_child(key_info, "X509Data")?;
    let mut chain = Vec::new();
    for cert in x509_data.find_children(NS_DSIG, "X509Certificate") {
        chain.push(decode_base64_content(&cert.text(), "X509Certificate")?);
    }
    if chain.is_empty() {
        return Err(denied("KeyInfo carries no certificates"));
    }
    Ok(chain)
}

/// Verify `signature` over the canonical bytes of `signed_info` using the
/// public key of the leaf certificate.
fn verify_signature_value(
    leaf_der: &[u8],
    signature_algorithm: &str,
    signed_info_c14n: &[u8],
    signature: &[u8],
) -> ServiceResult<()> {
    let (_, leaf) = X509Certificate::from_der(leaf_der)
        .map_err(|e| denied(format!("unparseable leaf certificate: {e}")))?;
    let spki = leaf.public_key();
    let key_algorithm = &spki.algorithm.algorithm;
    let key_bytes = spki.subject_public_key.data.as_ref();

    let verification_alg: &dyn ring::signature::VerificationAlgorithm =
        match signature_algorithm {
            ALG_RSA_SHA256 if *key_algorithm == OID_PKCS1_RSAENCRYPTION => {
                &RSA_PKCS1_2048_8192_SHA256
            },
            ALG_ECDSA_SHA256 if *key_algorithm == OID_KEY_TYPE_EC_PUBLIC_KEY => {
                &ECDSA_P256_SHA256_FIXED
            },
            _ => {
                return Err(denied(
                    "signature algorithm does not match the leaf key type",
                ))
            },
        };

    UnparsedPublicKey::new(verification_alg, key_bytes)
        .verify(signed_info_c14n, signature)
        .map_err(|_| denied("signature value does not verify"))
}

/// Verify the enveloped signature on `root` and return the `KeyInfo`
/// certificate chain, leaf first, in DER.
///
/// `assertion_id` must be the value of the assertion's `ID` attribute; the
/// signature's single `Reference` has to target it.
///
/// # Errors
///
/// Returns [`ServiceError::AuthenticationDenied`] for every failure mode;
/// the specific cause is logged at debug level only.
pub fn verify_enveloped_signature(
    root: &XmlElement,
    assertion_id: &str,
) -> ServiceResult<Vec<Vec<u8>>> {
    let signature = root
        .find_child(NS_DSIG, "Signature")
        .ok_or_else(|| denied("assertion is not signed"))?;
    let signed_info = required_child(signature, "SignedInfo")?;

    let c14n_method = required_child(signed_info, "CanonicalizationMethod")?;
    if algorithm_attr(c14n_method, "CanonicalizationMethod")? != ALG_EXC_C14N {
        return Err(denied("unsupported canonicalization method"));
    }
    let signature_method = required_child(signed_info, "SignatureMethod")?;
    let signature_algorithm = algorithm_attr(signature_method, "SignatureMethod")?;

    let expected_digest = check_reference(signed_info, assertion_id)?;

    // Digest input is the assertion with the Signature element removed,
    // in canonical form.
    let mut stripped = root.clone();
    stripped.remove_children(NS_DSIG, "Signature");
    let digest_input = canonicalize(&stripped);
    let actual_digest = digest::digest(&digest::SHA256, &digest_input);
    if actual_digest.as_ref() != expected_digest.as_slice() {
        return Err(denied("Reference digest mismatch"));
    }

    let signature_value = required_child(signature, "SignatureValue")?;
    let signature_bytes = decode_base64_content(&signature_value.text(), "SignatureValue")?;

    let chain = extract_chain(signature)?;
    let signed_info_c14n = canonicalize(signed_info);
    verify_signature_value(
        &chain[0],
        signature_algorithm,
        &signed_info_c14n,
        &signature_bytes,
    )?;

    Ok(chain)
}
