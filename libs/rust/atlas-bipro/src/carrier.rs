//! Carrier identity and endpoint configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The authentication variants a carrier STS may support.
///
/// Which variants a given carrier accepts is part of its configuration;
/// picking an unsupported variant for a carrier is a programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthVariant {
    /// Username + password in a `wsse:UsernameToken`.
    UsernamePassword,
    /// Username + password with a one-time password appended.
    UsernamePasswordOtp,
    /// X.509 client certificate; no STS round-trip, mutual TLS directly.
    Certificate,
    /// Broker-portal (EasyLogin) ticket.
    Ticket,
    /// Ticket plus one-time password.
    TicketOtp,
    /// Ticket plus X.509 signature.
    TicketCertificate,
    /// TGIC group federation token plus X.509 signature.
    TgicCertificate,
    /// TGIC group federation token plus mTAN code.
    TgicMtan,
}

impl AuthVariant {
    /// All variants, in STS preference order.
    pub fn all() -> &'static [AuthVariant] {
        &[
            AuthVariant::Certificate,
            AuthVariant::TicketCertificate,
            AuthVariant::TgicCertificate,
            AuthVariant::TgicMtan,
            AuthVariant::TicketOtp,
            AuthVariant::Ticket,
            AuthVariant::UsernamePasswordOtp,
            AuthVariant::UsernamePassword,
        ]
    }

    /// Whether this variant issues a bearer token through the STS.
    ///
    /// The pure certificate variant skips the STS and authenticates the
    /// transport itself.
    pub fn uses_sts(&self) -> bool {
        !matches!(self, AuthVariant::Certificate)
    }

    /// Whether the variant needs parsed X.509 key material.
    pub fn uses_certificate(&self) -> bool {
        matches!(
            self,
            AuthVariant::Certificate
                | AuthVariant::TicketCertificate
                | AuthVariant::TgicCertificate
        )
    }
}

impl fmt::Display for AuthVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthVariant::UsernamePassword => "username_password",
            AuthVariant::UsernamePasswordOtp => "username_password_otp",
            AuthVariant::Certificate => "certificate",
            AuthVariant::Ticket => "ticket",
            AuthVariant::TicketOtp => "ticket_otp",
            AuthVariant::TicketCertificate => "ticket_certificate",
            AuthVariant::TgicCertificate => "tgic_certificate",
            AuthVariant::TgicMtan => "tgic_mtan",
        };
        write!(f, "{}", s)
    }
}

/// Per-call timeouts, configurable per carrier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CarrierTimeouts {
    /// TCP connect timeout in seconds.
    #[serde(default = "CarrierTimeouts::default_connect")]
    pub connect_secs: u64,
    /// Read timeout for `getShipment` in seconds.
    #[serde(default = "CarrierTimeouts::default_read")]
    pub read_secs: u64,
    /// Timeout for `acknowledgeShipment` in seconds.
    #[serde(default = "CarrierTimeouts::default_acknowledge")]
    pub acknowledge_secs: u64,
}

impl CarrierTimeouts {
    fn default_connect() -> u64 {
        10
    }
    fn default_read() -> u64 {
        120
    }
    fn default_acknowledge() -> u64 {
        30
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }
    pub fn acknowledge(&self) -> Duration {
        Duration::from_secs(self.acknowledge_secs)
    }
}

impl Default for CarrierTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: Self::default_connect(),
            read_secs: Self::default_read(),
            acknowledge_secs: Self::default_acknowledge(),
        }
    }
}

/// A configured carrier connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Carrier {
    /// Stable carrier name (also the rate-limiter and token-cache key).
    pub name: String,
    /// Security Token Service endpoint.
    pub sts_url: String,
    /// TransferService endpoint.
    pub transfer_url: String,
    /// Optional extranet endpoint (documents outside the BiPRO flow).
    #[serde(default)]
    pub extranet_url: Option<String>,
    /// Consumer identifier some carriers require in request headers.
    #[serde(default)]
    pub consumer_id: Option<String>,
    /// Authentication variants this carrier supports.
    pub auth_variants: Vec<AuthVariant>,
    /// EasyLogin ticket source identifier, for ticket-based variants.
    #[serde(default)]
    pub easylogin_source: Option<String>,
    #[serde(default)]
    pub timeouts: CarrierTimeouts,
}

impl Carrier {
    /// Whether the carrier supports the given authentication variant.
    pub fn supports(&self, variant: AuthVariant) -> bool {
        self.auth_variants.contains(&variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_carrier(name: &str, variants: &[AuthVariant]) -> Carrier {
        Carrier {
            name: name.to_string(),
            sts_url: format!("https://sts.{}.example/sts", name),
            transfer_url: format!("https://transfer.{}.example/transfer", name),
            extranet_url: None,
            consumer_id: Some("atlas".to_string()),
            auth_variants: variants.to_vec(),
            easylogin_source: None,
            timeouts: CarrierTimeouts::default(),
        }
    }

    #[test]
    fn test_supports() {
        let c = test_carrier("alpha", &[AuthVariant::UsernamePassword, AuthVariant::Ticket]);
        assert!(c.supports(AuthVariant::UsernamePassword));
        assert!(!c.supports(AuthVariant::Certificate));
    }

    #[test]
    fn test_variant_properties() {
        assert!(!AuthVariant::Certificate.uses_sts());
        for v in AuthVariant::all() {
            if *v != AuthVariant::Certificate {
                assert!(v.uses_sts(), "{} should use the STS", v);
            }
        }
        assert!(AuthVariant::TgicCertificate.uses_certificate());
        assert!(!AuthVariant::TgicMtan.uses_certificate());
    }

    #[test]
    fn test_carrier_config_roundtrip() {
        let json = r#"{
            "name": "alpha",
            "sts_url": "https://sts.example/sts",
            "transfer_url": "https://transfer.example/svc",
            "auth_variants": ["username_password", "ticket_otp"]
        }"#;
        let c: Carrier = serde_json::from_str(json).unwrap();
        assert_eq!(c.name, "alpha");
        assert_eq!(c.auth_variants, vec![AuthVariant::UsernamePassword, AuthVariant::TicketOtp]);
        assert_eq!(c.timeouts.read_secs, 120);
    }
}
