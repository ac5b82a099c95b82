//! Certificate decoding and comparison helpers.
//!
//! Alias certificates are stored as PEM text but compared by their decoded
//! DER bytes: two PEM blobs that differ only in armor, line wrapping, or
//! whitespace still denote the same certificate. A raw string compare is
//! never a correct equality test here.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{ServiceError, ServiceResult};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Decode a single PEM certificate to its DER bytes.
///
/// PEM armor is optional: bare base64 is accepted as well, so certificates
/// survive transport layers that strip the header lines. All whitespace is
/// ignored.
///
/// # Errors
///
/// Returns [`ServiceError::InvalidCertificate`] if the base64 payload does
/// not decode or the armor is unbalanced.
pub fn pem_to_der(pem: &str) -> ServiceResult<Vec<u8>> {
    let body = match (pem.find(PEM_BEGIN), pem.find(PEM_END)) {
        (Some(start), Some(end)) if start < end => &pem[start + PEM_BEGIN.len()..end],
        (None, None) => pem,
        _ => {
            return Err(ServiceError::invalid_certificate(
                "unbalanced PEM armor".to_string(),
            ))
        },
    };

    let stripped: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    if stripped.is_empty() {
        return Err(ServiceError::invalid_certificate("empty certificate"));
    }

    BASE64
        .decode(stripped.as_bytes())
        .map_err(|e| ServiceError::invalid_certificate(format!("bad base64 payload: {e}")))
}

/// Encode DER bytes as an armored PEM certificate.
#[must_use]
pub fn der_to_pem(der: &[u8]) -> String {
    let encoded = BASE64.encode(der);
    let mut pem = String::with_capacity(encoded.len() + 64);
    pem.push_str(PEM_BEGIN);
    pem.push('\n');
    for chunk in encoded.as_bytes().chunks(64) {
        // Chunks come from an ASCII base64 string.
        pem.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        pem.push('\n');
    }
    pem.push_str(PEM_END);
    pem.push('\n');
    pem
}

/// Decode a PEM blob to DER that actually parses as an X.509 certificate.
///
/// Base64 alone is not enough for an equality test: arbitrary text can be
/// valid base64, and two copies of the same garbage must not compare equal.
fn decode_valid_der(pem: &str) -> Option<Vec<u8>> {
    let der = pem_to_der(pem).ok()?;
    match X509Certificate::from_der(&der) {
        Ok((rest, _)) if rest.is_empty() => Some(der),
        _ => None,
    }
}

/// Compare two PEM certificates by decoded DER bytes.
///
/// Returns `false` if either side fails to decode as an X.509 certificate;
/// an undecodable certificate is equal to nothing, including itself.
#[must_use]
pub fn compare_certs(a: &str, b: &str) -> bool {
    match (decode_valid_der(a), decode_valid_der(b)) {
        (Some(da), Some(db)) => da == db,
        _ => false,
    }
}

/// Compare a PEM certificate against raw DER bytes.
///
/// A PEM side that does not decode to an X.509 certificate matches
/// nothing.
#[must_use]
pub fn cert_matches_der(pem: &str, der: &[u8]) -> bool {
    decode_valid_der(pem).is_some_and(|d| d == der)
}

/// Validate that a PEM blob decodes to a well-formed X.509 certificate.
///
/// # Errors
///
/// Returns [`ServiceError::InvalidCertificate`] if decoding or X.509
/// parsing fails, or if trailing garbage follows the certificate.
pub fn validate_pem_cert(pem: &str) -> ServiceResult<Vec<u8>> {
    let der = pem_to_der(pem)?;
    let (rest, _cert) = X509Certificate::from_der(&der)
        .map_err(|e| ServiceError::invalid_certificate(format!("X.509 parse failed: {e}")))?;
    if !rest.is_empty() {
        return Err(ServiceError::invalid_certificate(
            "trailing data after certificate",
        ));
    }
    Ok(der)
}

/// Decode an ordered list of PEM certificates (leaf first) to DER.
///
/// # Errors
///
/// Returns [`ServiceError::InvalidCertificate`] if any entry fails to
/// decode.
pub fn pem_chain_to_der(pems: &[String]) -> ServiceResult<Vec<Vec<u8>>> {
    pems.iter().map(|p| pem_to_der(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cert_pem() -> String {
        let key = rcgen::generate_simple_self_signed(vec!["broker.test".to_string()]).unwrap();
        key.cert.pem()
    }

    #[test]
    fn compare_is_reflexive_and_symmetric() {
        let pem = test_cert_pem();
        assert!(compare_certs(&pem, &pem));

        let other = test_cert_pem();
        assert_eq!(compare_certs(&pem, &other), compare_certs(&other, &pem));
        assert!(!compare_certs(&pem, &other));
    }

    #[test]
    fn compare_ignores_armor_and_whitespace() {
        let pem = test_cert_pem();
        let body: String = pem
            .lines()
            .filter(|l| !l.starts_with("-----"))
            .collect::<Vec<_>>()
            .join("");
        // Same payload: no armor, single line.
        assert!(compare_certs(&pem, &body));
        // Same payload re-wrapped at a different width.
        let rewrapped = body
            .as_bytes()
            .chunks(40)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        let rearmored = format!("{PEM_BEGIN}\n{rewrapped}\n{PEM_END}\n");
        assert!(compare_certs(&pem, &rearmored));
    }

    #[test]
    fn undecodable_cert_equals_nothing() {
        let pem = test_cert_pem();
        assert!(!compare_certs("not a cert", &pem));
        // "notacert" after whitespace stripping is valid base64, but the
        // decoded bytes are not a certificate.
        assert!(!compare_certs("not a cert", "not a cert"));
        let garbage_der = pem_to_der("not a cert").unwrap();
        assert!(!cert_matches_der("not a cert", &garbage_der));
    }

    #[test]
    fn validate_accepts_real_cert_and_rejects_garbage() {
        let pem = test_cert_pem();
        validate_pem_cert(&pem).unwrap();

        let err = validate_pem_cert("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----")
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCertificate { .. }));

        let err = validate_pem_cert("-----BEGIN CERTIFICATE-----").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCertificate { .. }));
    }

    #[test]
    fn der_pem_round_trip() {
        let pem = test_cert_pem();
        let der = pem_to_der(&pem).unwrap();
        let pem2 = der_to_pem(&der);
        assert!(compare_certs(&pem, &pem2));
        assert!(cert_matches_der(&pem2, &der));
    }
}
