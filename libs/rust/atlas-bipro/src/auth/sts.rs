//! WS-Trust request construction and response parsing
//!
//! One `RequestSecurityToken` builder per authentication variant; the
//! response side extracts the issued assertion and its lifetime, and maps
//! WS-Security fault codes onto the error taxonomy.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::carrier::{AuthVariant, Carrier};
use crate::error::TransferError;
use crate::token::StsToken;
use crate::transport::HttpResponse;
use crate::wsse;

use super::{dsig, Credentials};

/// Assumed token lifetime when the STS response carries no `wst:Lifetime`.
const DEFAULT_TOKEN_TTL_SECS: i64 = 1800;

/// Build the full RST envelope for the credentials' variant.
pub(super) fn build_rst_envelope(
    carrier: &Carrier,
    credentials: &Credentials,
    now: DateTime<Utc>,
) -> Result<String, TransferError> {
    let timestamp = wsse::timestamp("TS-1", now);
    let body = rst_body(carrier);

    let security = match credentials {
        Credentials::UsernamePassword { username, password } => format!(
            "{timestamp}{}",
            wsse::username_token(username, password.expose())
        ),
        Credentials::UsernamePasswordOtp {
            username,
            password,
            otp,
        } => {
            // OTP variants append the one-time password to the password.
            let combined = format!("{}{}", password.expose(), otp);
            format!("{timestamp}{}", wsse::username_token(username, &combined))
        }
        Credentials::Certificate { .. } => {
            // The certificate variant authenticates the transport; it never
            // issues an RST. Reaching this is a dispatch bug.
            return Err(TransferError::Fatal(
                "certificate variant does not use the STS".into(),
            ));
        }
        Credentials::Ticket { ticket } => {
            format!("{timestamp}{}", ticket_token(carrier, ticket.expose()))
        }
        Credentials::TicketOtp { ticket, otp } => format!(
            "{timestamp}{}{}",
            ticket_token(carrier, ticket.expose()),
            wsse::second_factor("Einmalpasswort", otp)
        ),
        Credentials::TicketCertificate { ticket, identity } => {
            let bst = cert_token(identity)?;
            let signature =
                dsig::sign_parts(identity, &timestamp, &wsse::body_as_signed(&body))?;
            format!(
                "{timestamp}{}{}{}",
                ticket_token(carrier, ticket.expose()),
                bst,
                signature
            )
        }
        Credentials::TgicCertificate { token, identity } => {
            let bst = cert_token(identity)?;
            let signature =
                dsig::sign_parts(identity, &timestamp, &wsse::body_as_signed(&body))?;
            format!("{timestamp}{}{}{}", tgic_token(token.expose()), bst, signature)
        }
        Credentials::TgicMtan { token, mtan } => format!(
            "{timestamp}{}{}",
            tgic_token(token.expose()),
            wsse::second_factor("MTan", mtan)
        ),
    };

    Ok(wsse::envelope(
        &security,
        wsse::WST_ISSUE_ACTION,
        &carrier.sts_url,
        &body,
    ))
}

fn rst_body(carrier: &Carrier) -> String {
    let applies_to = quick_xml::escape::escape(carrier.transfer_url.as_str());
    let consumer = carrier
        .consumer_id
        .as_deref()
        .map(|id| {
            format!(
                r#"<bipro:ConsumerID xmlns:bipro="{}">{}</bipro:ConsumerID>"#,
                wsse::BIPRO_NS,
                quick_xml::escape::escape(id)
            )
        })
        .unwrap_or_default();
    format!(
        r#"<wst:RequestSecurityToken xmlns:wst="{wst}"><wst:RequestType>{wst}/Issue</wst:RequestType><wst:TokenType>http://docs.oasis-open.org/wss/oasis-wss-saml-token-profile-1.1#SAMLV2.0</wst:TokenType><wsp:AppliesTo xmlns:wsp="http://schemas.xmlsoap.org/ws/2004/09/policy"><wsa:EndpointReference xmlns:wsa="{wsa}"><wsa:Address>{applies_to}</wsa:Address></wsa:EndpointReference></wsp:AppliesTo>{consumer}</wst:RequestSecurityToken>"#,
        wst = wsse::WST_NS,
        wsa = wsse::WSA_NS,
    )
}

fn ticket_token(carrier: &Carrier, ticket: &str) -> String {
    let mut token = wsse::binary_security_token(
        "Ticket-1",
        wsse::EASYLOGIN_TICKET_TYPE,
        &BASE64.encode(ticket.as_bytes()),
    );
    if let Some(source) = &carrier.easylogin_source {
        token.push_str(&wsse::second_factor("TicketQuelle", source));
    }
    token
}

fn tgic_token(token: &str) -> String {
    wsse::binary_security_token(
        "TGIC-1",
        wsse::TGIC_TOKEN_TYPE,
        &BASE64.encode(token.as_bytes()),
    )
}

fn cert_token(identity: &super::ClientIdentity) -> Result<String, TransferError> {
    let der = identity
        .certificate()
        .to_der()
        .map_err(|e| TransferError::Auth(format!("certificate encoding failed: {e}")))?;
    Ok(wsse::binary_security_token(
        "X509-1",
        wsse::X509_V3_TYPE,
        &BASE64.encode(der),
    ))
}

/// Parse the `RequestSecurityTokenResponse`, or map the fault.
pub(super) fn parse_rstr_response(
    response: &HttpResponse,
    carrier: &Carrier,
    variant: AuthVariant,
    now: DateTime<Utc>,
) -> Result<StsToken, TransferError> {
    let body = String::from_utf8_lossy(&response.body);

    if !response.is_success() {
        return Err(classify_sts_failure(response.status, &body, response));
    }

    let assertion = extract_inner_xml(&body, "RequestedSecurityToken").ok_or_else(|| {
        TransferError::Fatal("STS response carries no RequestedSecurityToken".into())
    })?;
    if assertion.trim().is_empty() {
        return Err(TransferError::Fatal(
            "STS response carries an empty security token".into(),
        ));
    }

    let (issued_at, expires_at) = parse_lifetime(&body).unwrap_or((
        now,
        now + ChronoDuration::seconds(DEFAULT_TOKEN_TTL_SECS),
    ));

    Ok(StsToken {
        assertion: assertion.trim().as_bytes().to_vec(),
        issued_at,
        expires_at,
        carrier: carrier.name.clone(),
        variant,
    })
}

fn classify_sts_failure(status: u16, body: &str, response: &HttpResponse) -> TransferError {
    if let Some(auth) = classify_auth_fault(status, body) {
        return auth;
    }
    match status {
        429 => TransferError::Throttled {
            retry_after: response.retry_after(),
        },
        s if s >= 500 => TransferError::Transient(format!("STS returned HTTP {s}")),
        s => TransferError::Fatal(format!("STS returned HTTP {s}")),
    }
}

/// Map WS-Security fault codes (and bare 401/403) onto `Auth`.
///
/// Shared with the transfer client: any of these on a service call means
/// the cached token must be invalidated.
pub(crate) fn classify_auth_fault(status: u16, body: &str) -> Option<TransferError> {
    const AUTH_FAULTS: [&str; 3] = [
        "FailedAuthentication",
        "InvalidSecurityToken",
        "MessageExpired",
    ];
    if AUTH_FAULTS.iter().any(|code| body.contains(code)) {
        let detail = extract_text(body, "faultstring")
            .unwrap_or_else(|| "WS-Security fault".to_string());
        return Some(TransferError::Auth(detail));
    }
    if status == 401 || status == 403 {
        return Some(TransferError::Auth(format!("HTTP {status} from carrier")));
    }
    None
}

fn parse_lifetime(body: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let lifetime = extract_inner_xml(body, "Lifetime")?;
    let created = extract_text(&lifetime, "Created")?;
    let expires = extract_text(&lifetime, "Expires")?;
    let created = DateTime::parse_from_rfc3339(created.trim()).ok()?;
    let expires = DateTime::parse_from_rfc3339(expires.trim()).ok()?;
    Some((created.with_timezone(&Utc), expires.with_timezone(&Utc)))
}

/// Raw inner XML of the first element with the given local name,
/// prefix-agnostic.
pub(crate) fn extract_inner_xml(xml: &str, local_name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) if start.local_name().as_ref() == local_name.as_bytes() => {
                let end = start.to_end().into_owned();
                return reader.read_text(end.name()).ok().map(|t| t.into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Text content of the first element with the given local name.
pub(crate) fn extract_text(xml: &str, local_name: &str) -> Option<String> {
    extract_inner_xml(xml, local_name).map(|inner| {
        quick_xml::escape::unescape(&inner)
            .map(|c| c.into_owned())
            .unwrap_or(inner)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Secret;
    use crate::carrier::CarrierTimeouts;

    fn carrier() -> Carrier {
        Carrier {
            name: "alpha".into(),
            sts_url: "https://sts.example/sts".into(),
            transfer_url: "https://transfer.example/svc".into(),
            extranet_url: None,
            consumer_id: Some("atlas-7".into()),
            auth_variants: vec![AuthVariant::UsernamePassword, AuthVariant::TgicMtan],
            easylogin_source: Some("portal-1".into()),
            timeouts: CarrierTimeouts::default(),
        }
    }

    fn rstr(token_xml: &str, lifetime: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: vec![("Content-Type".into(), "text/xml".into())],
            body: format!(
                r#"<?xml version="1.0"?><s:Envelope xmlns:s="{soap}"><s:Body><wst:RequestSecurityTokenResponse xmlns:wst="{wst}">{lifetime}<wst:RequestedSecurityToken>{token_xml}</wst:RequestedSecurityToken></wst:RequestSecurityTokenResponse></s:Body></s:Envelope>"#,
                soap = wsse::SOAP_NS,
                wst = wsse::WST_NS,
            )
            .into_bytes(),
        }
    }

    #[test]
    fn test_build_rst_username_password() {
        let env = build_rst_envelope(
            &carrier(),
            &Credentials::UsernamePassword {
                username: "broker".into(),
                password: Secret::new("pw"),
            },
            Utc::now(),
        )
        .unwrap();
        assert!(env.contains("<wsse:Username>broker</wsse:Username>"));
        assert!(env.contains("RequestSecurityToken"));
        assert!(env.contains("atlas-7"));
    }

    #[test]
    fn test_build_rst_otp_appends_to_password() {
        let env = build_rst_envelope(
            &carrier(),
            &Credentials::UsernamePasswordOtp {
                username: "broker".into(),
                password: Secret::new("pw"),
                otp: "987654".into(),
            },
            Utc::now(),
        )
        .unwrap();
        assert!(env.contains(">pw987654</wsse:Password>"));
    }

    #[test]
    fn test_build_rst_ticket_carries_source() {
        let env = build_rst_envelope(
            &carrier(),
            &Credentials::Ticket {
                ticket: Secret::new("TCK-42"),
            },
            Utc::now(),
        )
        .unwrap();
        assert!(env.contains(wsse::EASYLOGIN_TICKET_TYPE));
        assert!(env.contains("portal-1"));
    }

    #[test]
    fn test_build_rst_tgic_mtan() {
        let env = build_rst_envelope(
            &carrier(),
            &Credentials::TgicMtan {
                token: Secret::new("tgic-token"),
                mtan: "112233".into(),
            },
            Utc::now(),
        )
        .unwrap();
        assert!(env.contains(wsse::TGIC_TOKEN_TYPE));
        assert!(env.contains("<bipro:MTan"));
        assert!(env.contains("112233"));
    }

    #[test]
    fn test_parse_rstr_with_lifetime() {
        let lifetime = format!(
            r#"<wst:Lifetime><wsu:Created xmlns:wsu="{wsu}">2025-02-01T10:00:00Z</wsu:Created><wsu:Expires xmlns:wsu="{wsu}">2025-02-01T11:00:00Z</wsu:Expires></wst:Lifetime>"#,
            wsu = wsse::WSU_NS
        );
        let response = rstr("<saml2:Assertion ID=\"a1\">x</saml2:Assertion>", &lifetime);
        let token = parse_rstr_response(
            &response,
            &carrier(),
            AuthVariant::UsernamePassword,
            Utc::now(),
        )
        .unwrap();
        assert!(String::from_utf8_lossy(&token.assertion).contains("saml2:Assertion"));
        assert_eq!(
            token.expires_at,
            DateTime::parse_from_rfc3339("2025-02-01T11:00:00Z").unwrap()
        );
    }

    #[test]
    fn test_parse_rstr_default_lifetime() {
        let now = Utc::now();
        let response = rstr("<saml2:Assertion/>", "");
        let token =
            parse_rstr_response(&response, &carrier(), AuthVariant::UsernamePassword, now)
                .unwrap();
        assert_eq!(token.issued_at, now);
        assert_eq!(
            token.expires_at,
            now + ChronoDuration::seconds(DEFAULT_TOKEN_TTL_SECS)
        );
    }

    #[test]
    fn test_auth_fault_mapping() {
        let fault = r#"<s:Fault><faultcode>wsse:FailedAuthentication</faultcode><faultstring>bad credentials</faultstring></s:Fault>"#;
        let err = classify_auth_fault(500, fault).unwrap();
        match err {
            TransferError::Auth(msg) => assert_eq!(msg, "bad credentials"),
            other => panic!("expected Auth, got {other:?}"),
        }
        assert!(classify_auth_fault(401, "").is_some());
        assert!(classify_auth_fault(500, "internal error").is_none());
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let response = HttpResponse {
            status: 200,
            headers: vec![],
            body: b"<Envelope><Body/></Envelope>".to_vec(),
        };
        let err = parse_rstr_response(
            &response,
            &carrier(),
            AuthVariant::UsernamePassword,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "fatal");
    }
}
