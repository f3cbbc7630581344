//! XML-DSig for certificate-backed STS requests
//!
//! Signs the `wsu:Timestamp` and the SOAP Body by reference (RSA-SHA256,
//! exclusive C14N). The envelope builders in [`crate::wsse`] already emit
//! the referenced elements in their canonical serialization, so the digest
//! input is exactly the fragment as placed on the wire.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::hash::MessageDigest;
use openssl::sign::Signer;
use sha2::{Digest, Sha256};

use crate::error::TransferError;
use crate::wsse;

use super::ClientIdentity;

const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Build the `ds:Signature` element covering the timestamp (`#TS-1`) and
/// body (`#Body-1`) fragments.
pub(super) fn sign_parts(
    identity: &ClientIdentity,
    timestamp_xml: &str,
    body_xml: &str,
) -> Result<String, TransferError> {
    let ts_digest = BASE64.encode(Sha256::digest(timestamp_xml.as_bytes()));
    let body_digest = BASE64.encode(Sha256::digest(body_xml.as_bytes()));

    let signed_info = format!(
        r#"<ds:SignedInfo xmlns:ds="{DSIG_NS}"><ds:CanonicalizationMethod Algorithm="{EXC_C14N}"></ds:CanonicalizationMethod><ds:SignatureMethod Algorithm="{RSA_SHA256}"></ds:SignatureMethod>{}{}</ds:SignedInfo>"#,
        reference("#TS-1", &ts_digest),
        reference("#Body-1", &body_digest),
    );

    let signature_value = rsa_sha256(identity, signed_info.as_bytes())?;

    Ok(format!(
        r##"<ds:Signature xmlns:ds="{DSIG_NS}">{signed_info}<ds:SignatureValue>{signature_value}</ds:SignatureValue><ds:KeyInfo><wsse:SecurityTokenReference xmlns:wsse="{wsse_ns}"><wsse:Reference URI="#X509-1" ValueType="{x509}"></wsse:Reference></wsse:SecurityTokenReference></ds:KeyInfo></ds:Signature>"##,
        wsse_ns = wsse::WSSE_NS,
        x509 = wsse::X509_V3_TYPE,
    ))
}

fn reference(uri: &str, digest_b64: &str) -> String {
    format!(
        r#"<ds:Reference URI="{uri}"><ds:Transforms><ds:Transform Algorithm="{EXC_C14N}"></ds:Transform></ds:Transforms><ds:DigestMethod Algorithm="{SHA256}"></ds:DigestMethod><ds:DigestValue>{digest_b64}</ds:DigestValue></ds:Reference>"#
    )
}

fn rsa_sha256(identity: &ClientIdentity, data: &[u8]) -> Result<String, TransferError> {
    let mut signer = Signer::new(MessageDigest::sha256(), identity.signing_key())
        .map_err(|e| TransferError::Auth(format!("signature setup failed: {e}")))?;
    signer
        .update(data)
        .map_err(|e| TransferError::Auth(format!("signature update failed: {e}")))?;
    let signature = signer
        .sign_to_vec()
        .map_err(|e| TransferError::Auth(format!("signing failed: {e}")))?;
    Ok(BASE64.encode(signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{KeystoreBundle, Secret};
    use openssl::asn1::Asn1Time;
    use openssl::hash::MessageDigest;
    use openssl::pkcs12::Pkcs12;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Name, X509};

    fn test_identity() -> super::super::ClientIdentity {
        let rsa = Rsa::generate(2048).unwrap();
        let key = PKey::from_rsa(rsa).unwrap();

        let mut name = X509Name::builder().unwrap();
        name.append_entry_by_text("CN", "atlas-test").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(1).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        let pkcs12 = Pkcs12::builder()
            .name("atlas-test")
            .pkey(&key)
            .cert(&cert)
            .build2("secret")
            .unwrap();
        let der = pkcs12.to_der().unwrap();

        KeystoreBundle::Pfx {
            der,
            passphrase: Secret::new("secret"),
        }
        .parse()
        .unwrap()
    }

    #[test]
    fn test_signature_structure() {
        let identity = test_identity();
        let ts = wsse::timestamp("TS-1", chrono::Utc::now());
        let body = wsse::body_as_signed("<x/>");
        let sig = sign_parts(&identity, &ts, &body).unwrap();

        assert!(sig.contains(r##"URI="#TS-1""##));
        assert!(sig.contains(r##"URI="#Body-1""##));
        assert!(sig.contains("<ds:SignatureValue>"));
        assert!(sig.contains(r##"URI="#X509-1""##));
    }

    #[test]
    fn test_digest_tracks_content() {
        let identity = test_identity();
        let ts = wsse::timestamp("TS-1", chrono::Utc::now());
        let sig_a = sign_parts(&identity, &ts, &wsse::body_as_signed("<a/>")).unwrap();
        let sig_b = sign_parts(&identity, &ts, &wsse::body_as_signed("<b/>")).unwrap();
        assert_ne!(sig_a, sig_b);
    }
}
