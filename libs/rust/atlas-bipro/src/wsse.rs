//! SOAP / WS-Security envelope building
//!
//! The builders here emit envelopes in a canonical serialization (namespaces
//! declared on the element that uses them, attributes in fixed order, no
//! insignificant whitespace inside signed elements), which is what lets the
//! XML-DSig references in [`crate::auth::dsig`] digest the exact bytes that
//! go on the wire.

use chrono::{DateTime, Utc};
use quick_xml::escape::escape;

pub const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const WST_NS: &str = "http://docs.oasis-open.org/ws-sx/ws-trust/200512";
pub const WSA_NS: &str = "http://www.w3.org/2005/08/addressing";
pub const BIPRO_NS: &str = "http://www.bipro.net/namespace";
pub const BIPRO_TRANSFER_NS: &str = "http://www.bipro.net/namespace/transfer";

pub const WST_ISSUE_ACTION: &str =
    "http://docs.oasis-open.org/ws-sx/ws-trust/200512/RST/Issue";
pub const PASSWORD_TEXT_TYPE: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";
pub const BASE64_ENCODING: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";
pub const X509_V3_TYPE: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-x509-token-profile-1.0#X509v3";
pub const EASYLOGIN_TICKET_TYPE: &str = "http://www.bipro.net/namespace/security#EasyLoginTicket";
pub const TGIC_TOKEN_TYPE: &str = "http://www.bipro.net/namespace/security#TGICToken";

/// `wsu:Timestamp` valid for five minutes, ready for signing by reference.
pub fn timestamp(id: &str, now: DateTime<Utc>) -> String {
    let created = format_instant(now);
    let expires = format_instant(now + chrono::Duration::minutes(5));
    format!(
        r#"<wsu:Timestamp xmlns:wsu="{WSU_NS}" wsu:Id="{id}"><wsu:Created>{created}</wsu:Created><wsu:Expires>{expires}</wsu:Expires></wsu:Timestamp>"#
    )
}

/// `wsse:UsernameToken` with a plaintext password (TLS protects the channel).
pub fn username_token(username: &str, password: &str) -> String {
    let username = escape(username);
    let password = escape(password);
    format!(
        r#"<wsse:UsernameToken><wsse:Username>{username}</wsse:Username><wsse:Password Type="{PASSWORD_TEXT_TYPE}">{password}</wsse:Password></wsse:UsernameToken>"#
    )
}

/// `wsse:BinarySecurityToken` carrying base64 content of the given profile.
pub fn binary_security_token(id: &str, value_type: &str, b64_content: &str) -> String {
    format!(
        r#"<wsse:BinarySecurityToken xmlns:wsu="{WSU_NS}" wsu:Id="{id}" ValueType="{value_type}" EncodingType="{BASE64_ENCODING}">{b64_content}</wsse:BinarySecurityToken>"#
    )
}

/// Second-factor element carried next to the primary token.
pub fn second_factor(element: &str, value: &str) -> String {
    let value = escape(value);
    format!(r#"<bipro:{element} xmlns:bipro="{BIPRO_NS}">{value}</bipro:{element}>"#)
}

/// Full SOAP 1.1 envelope with a `wsse:Security` header.
///
/// `security_content` is placed inside `wsse:Security`; `body` inside
/// `soapenv:Body`, which carries `wsu:Id` so signatures can reference it.
pub fn envelope(security_content: &str, action: &str, to_url: &str, body: &str) -> String {
    let to_url = escape(to_url);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope xmlns:soapenv="{SOAP_NS}"><soapenv:Header><wsa:Action xmlns:wsa="{WSA_NS}">{action}</wsa:Action><wsa:To xmlns:wsa="{WSA_NS}">{to_url}</wsa:To><wsse:Security xmlns:wsse="{WSSE_NS}" soapenv:mustUnderstand="1">{security_content}</wsse:Security></soapenv:Header><soapenv:Body xmlns:wsu="{WSU_NS}" wsu:Id="Body-1">{body}</soapenv:Body></soapenv:Envelope>"#
    )
}

/// The SOAP body element as signed: same bytes as inside [`envelope`].
pub fn body_as_signed(body: &str) -> String {
    format!(
        r#"<soapenv:Body xmlns:soapenv="{SOAP_NS}" xmlns:wsu="{WSU_NS}" wsu:Id="Body-1">{body}</soapenv:Body>"#
    )
}

pub fn format_instant(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_token_escapes() {
        let xml = username_token("it&sec", "p<w>d");
        assert!(xml.contains("it&amp;sec"));
        assert!(xml.contains("p&lt;w&gt;d"));
    }

    #[test]
    fn test_timestamp_window() {
        let now = DateTime::parse_from_rfc3339("2025-02-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let xml = timestamp("TS-1", now);
        assert!(xml.contains("<wsu:Created>2025-02-01T10:00:00.000Z</wsu:Created>"));
        assert!(xml.contains("<wsu:Expires>2025-02-01T10:05:00.000Z</wsu:Expires>"));
    }

    #[test]
    fn test_envelope_contains_security_and_body() {
        let xml = envelope("<x/>", WST_ISSUE_ACTION, "https://sts.example", "<y/>");
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<wsse:Security"));
        assert!(xml.contains("soapenv:mustUnderstand=\"1\""));
        assert!(xml.contains(r#"<soapenv:Body xmlns:wsu="#));
        assert!(xml.contains("<y/>"));
    }
}
