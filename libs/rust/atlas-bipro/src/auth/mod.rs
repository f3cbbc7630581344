//! Authentication adapters
//!
//! The eight carrier authentication variants share one surface: present
//! credentials, get back either a bearer STS token or a mutually
//! authenticated transport. The variant set is a closed sum; dispatch is a
//! total match, so adding a ninth variant is a compile error until every
//! site handles it.

mod dsig;
mod sts;

use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::carrier::{AuthVariant, Carrier};
use crate::clock::Clock;
use crate::error::TransferError;
use crate::token::{StsToken, TokenCache};
use crate::transport::{HttpRequest, SharedTransport};
use crate::wsse;

pub(crate) use sts::classify_auth_fault;

/// A secret string held in memory for the session only. Debug output is
/// redacted so credentials never end up in logs or error chains.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Certificate keystore as configured for a carrier.
#[derive(Clone)]
pub enum KeystoreBundle {
    /// PKCS#12 container bytes plus passphrase.
    Pfx { der: Vec<u8>, passphrase: Secret },
    /// Java keystore. Accepted in configuration, rejected at parse time:
    /// JKS algorithm policy is carrier-specific and left to the operator.
    Jks {
        der: Vec<u8>,
        passphrase: Secret,
        alias: String,
    },
}

impl KeystoreBundle {
    /// Parse into in-memory key material.
    pub fn parse(&self) -> Result<ClientIdentity, TransferError> {
        match self {
            KeystoreBundle::Pfx { der, passphrase } => {
                let parsed = Pkcs12::from_der(der)
                    .map_err(|e| TransferError::Auth(format!("invalid PKCS#12 bundle: {e}")))?
                    .parse2(passphrase.expose())
                    .map_err(|e| {
                        TransferError::Auth(format!("PKCS#12 passphrase rejected: {e}"))
                    })?;
                let key = parsed
                    .pkey
                    .ok_or_else(|| TransferError::Auth("PKCS#12 bundle has no private key".into()))?;
                let cert = parsed
                    .cert
                    .ok_or_else(|| TransferError::Auth("PKCS#12 bundle has no certificate".into()))?;
                let chain = parsed
                    .ca
                    .map(|stack| stack.into_iter().collect())
                    .unwrap_or_default();
                Ok(ClientIdentity {
                    pkcs12_der: der.clone(),
                    passphrase: passphrase.clone(),
                    key,
                    cert,
                    chain,
                })
            }
            KeystoreBundle::Jks { alias, .. } => Err(TransferError::Auth(format!(
                "JKS keystores are not supported (alias '{alias}'); convert to PKCS#12"
            ))),
        }
    }
}

/// Parsed client certificate identity: key, leaf and chain, plus the raw
/// PKCS#12 bytes reqwest needs to authenticate the TLS connection itself.
#[derive(Clone)]
pub struct ClientIdentity {
    pkcs12_der: Vec<u8>,
    passphrase: Secret,
    key: PKey<Private>,
    cert: X509,
    chain: Vec<X509>,
}

impl ClientIdentity {
    pub fn reqwest_identity(&self) -> Result<reqwest::Identity, TransferError> {
        reqwest::Identity::from_pkcs12_der(&self.pkcs12_der, self.passphrase.expose())
            .map_err(|e| TransferError::Auth(format!("client identity rejected: {e}")))
    }

    pub fn certificate(&self) -> &X509 {
        &self.cert
    }

    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    pub(crate) fn signing_key(&self) -> &PKey<Private> {
        &self.key
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Session credentials, one constructor per authentication variant.
#[derive(Debug, Clone)]
pub enum Credentials {
    UsernamePassword {
        username: String,
        password: Secret,
    },
    UsernamePasswordOtp {
        username: String,
        password: Secret,
        otp: String,
    },
    Certificate {
        identity: ClientIdentity,
    },
    Ticket {
        ticket: Secret,
    },
    TicketOtp {
        ticket: Secret,
        otp: String,
    },
    TicketCertificate {
        ticket: Secret,
        identity: ClientIdentity,
    },
    TgicCertificate {
        token: Secret,
        identity: ClientIdentity,
    },
    TgicMtan {
        token: Secret,
        mtan: String,
    },
}

impl Credentials {
    /// The variant these credentials authenticate as. Total mapping.
    pub fn variant(&self) -> AuthVariant {
        match self {
            Credentials::UsernamePassword { .. } => AuthVariant::UsernamePassword,
            Credentials::UsernamePasswordOtp { .. } => AuthVariant::UsernamePasswordOtp,
            Credentials::Certificate { .. } => AuthVariant::Certificate,
            Credentials::Ticket { .. } => AuthVariant::Ticket,
            Credentials::TicketOtp { .. } => AuthVariant::TicketOtp,
            Credentials::TicketCertificate { .. } => AuthVariant::TicketCertificate,
            Credentials::TgicCertificate { .. } => AuthVariant::TgicCertificate,
            Credentials::TgicMtan { .. } => AuthVariant::TgicMtan,
        }
    }

    /// Client certificate identity, for variants that carry one.
    pub fn identity(&self) -> Option<&ClientIdentity> {
        match self {
            Credentials::Certificate { identity }
            | Credentials::TicketCertificate { identity, .. }
            | Credentials::TgicCertificate { identity, .. } => Some(identity),
            _ => None,
        }
    }
}

/// What a successful authentication yields.
#[derive(Debug, Clone)]
pub enum AuthMaterial {
    /// Bearer token to place into `wsse:Security` on service calls.
    Bearer(StsToken),
    /// The transport itself is authenticated (client certificate); service
    /// calls carry no token.
    MutualTls,
}

/// Authenticates against carrier STS endpoints through the shared token
/// cache.
pub struct Authenticator {
    transport: SharedTransport,
    token_cache: Arc<TokenCache>,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    pub fn new(
        transport: SharedTransport,
        token_cache: Arc<TokenCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            token_cache,
            clock,
        }
    }

    /// Authenticate for the given carrier.
    ///
    /// Panics if the carrier does not list the credentials' variant; that
    /// mismatch is a configuration programming error, not a runtime
    /// condition.
    pub async fn authenticate(
        &self,
        carrier: &Carrier,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<AuthMaterial, TransferError> {
        let variant = credentials.variant();
        assert!(
            carrier.supports(variant),
            "auth variant {variant} is not supported by carrier {}",
            carrier.name
        );

        if !variant.uses_sts() {
            debug!(carrier = %carrier.name, "certificate variant, transport is self-authenticating");
            return Ok(AuthMaterial::MutualTls);
        }

        let token = self
            .token_cache
            .get(&carrier.name, variant, || {
                self.issue(carrier, credentials, cancel)
            })
            .await?;
        Ok(AuthMaterial::Bearer(token))
    }

    /// Drop the cached token after the carrier rejected it.
    pub fn invalidate(&self, carrier: &Carrier, variant: AuthVariant) {
        warn!(carrier = %carrier.name, %variant, "invalidating STS token after auth failure");
        self.token_cache.invalidate(&carrier.name, variant);
    }

    async fn issue(
        &self,
        carrier: &Carrier,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<StsToken, TransferError> {
        let now = self.clock.now();
        let envelope = sts::build_rst_envelope(carrier, credentials, now)?;
        debug!(carrier = %carrier.name, variant = %credentials.variant(), "requesting STS token");

        let request = HttpRequest::post(
            carrier.sts_url.clone(),
            envelope.into_bytes(),
            carrier.timeouts.read(),
        )
        .header("Content-Type", "text/xml; charset=utf-8")
        .header("SOAPAction", wsse::WST_ISSUE_ACTION);

        let response = self.transport.execute(request, cancel).await?;
        sts::parse_rstr_response(&response, carrier, credentials.variant(), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let s = Secret::new("hunter2");
        assert_eq!(format!("{s:?}"), "Secret(***)");
        assert_eq!(s.expose(), "hunter2");
    }

    #[test]
    fn test_variant_mapping_is_total() {
        let creds = Credentials::TgicMtan {
            token: Secret::new("tgic"),
            mtan: "123456".into(),
        };
        assert_eq!(creds.variant(), AuthVariant::TgicMtan);
        assert!(creds.identity().is_none());
    }

    #[test]
    fn test_jks_rejected() {
        let bundle = KeystoreBundle::Jks {
            der: vec![0u8; 16],
            passphrase: Secret::new("pw"),
            alias: "transfer".into(),
        };
        let err = bundle.parse().unwrap_err();
        assert!(err.to_string().contains("JKS"));
    }
}
