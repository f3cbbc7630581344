//! Configuration for the sync daemon
//!
//! Environment variables name the archive endpoint and the carrier roster
//! file; the roster carries endpoints and auth variants per carrier.
//! Secrets are never written into the roster - each entry names the
//! environment variable (or keystore file) the secret is read from, and
//! the resolved values live in memory for the session only.

use anyhow::{bail, Context, Result};
use atlas_bipro::auth::{Credentials, KeystoreBundle, Secret};
use atlas_bipro::Carrier;
use serde::Deserialize;
use std::env;
use std::path::Path;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Document archive base URL
    pub archive_url: String,
    /// Path to the carrier roster JSON
    pub carriers_file: String,
    /// Polling interval between sync rounds in seconds
    pub poll_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            archive_url: env::var("ARCHIVE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8085".to_string()),
            carriers_file: env::var("CARRIERS_FILE").context("CARRIERS_FILE must be set")?,
            poll_interval_secs: env::var("POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .unwrap_or(900),
        })
    }
}

/// One roster entry: carrier endpoints plus how to authenticate.
#[derive(Debug, Clone, Deserialize)]
pub struct CarrierEntry {
    #[serde(flatten)]
    pub carrier: Carrier,
    pub auth: AuthConfig,
}

/// Where the session credentials come from. Tag values match the carrier's
/// `auth_variants` vocabulary.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum AuthConfig {
    UsernamePassword {
        username: String,
        password_env: String,
    },
    UsernamePasswordOtp {
        username: String,
        password_env: String,
        otp_env: String,
    },
    Certificate {
        pfx_path: String,
        passphrase_env: String,
    },
    Ticket {
        ticket_env: String,
    },
    TicketOtp {
        ticket_env: String,
        otp_env: String,
    },
    TicketCertificate {
        ticket_env: String,
        pfx_path: String,
        passphrase_env: String,
    },
    TgicCertificate {
        token_env: String,
        pfx_path: String,
        passphrase_env: String,
    },
    TgicMtan {
        token_env: String,
        mtan_env: String,
    },
}

impl AuthConfig {
    /// Resolve secrets into session credentials.
    pub fn resolve(&self) -> Result<Credentials> {
        let secret = |var: &str| -> Result<Secret> {
            Ok(Secret::new(
                env::var(var).with_context(|| format!("{var} must be set"))?,
            ))
        };
        let plain = |var: &str| -> Result<String> {
            env::var(var).with_context(|| format!("{var} must be set"))
        };
        let identity = |pfx_path: &str,
                        passphrase_env: &str|
         -> Result<atlas_bipro::auth::ClientIdentity> {
            let der = std::fs::read(pfx_path)
                .with_context(|| format!("cannot read keystore {pfx_path}"))?;
            let bundle = KeystoreBundle::Pfx {
                der,
                passphrase: secret(passphrase_env)?,
            };
            bundle
                .parse()
                .with_context(|| format!("cannot parse keystore {pfx_path}"))
        };

        Ok(match self {
            AuthConfig::UsernamePassword {
                username,
                password_env,
            } => Credentials::UsernamePassword {
                username: username.clone(),
                password: secret(password_env)?,
            },
            AuthConfig::UsernamePasswordOtp {
                username,
                password_env,
                otp_env,
            } => Credentials::UsernamePasswordOtp {
                username: username.clone(),
                password: secret(password_env)?,
                otp: plain(otp_env)?,
            },
            AuthConfig::Certificate {
                pfx_path,
                passphrase_env,
            } => Credentials::Certificate {
                identity: identity(pfx_path, passphrase_env)?,
            },
            AuthConfig::Ticket { ticket_env } => Credentials::Ticket {
                ticket: secret(ticket_env)?,
            },
            AuthConfig::TicketOtp {
                ticket_env,
                otp_env,
            } => Credentials::TicketOtp {
                ticket: secret(ticket_env)?,
                otp: plain(otp_env)?,
            },
            AuthConfig::TicketCertificate {
                ticket_env,
                pfx_path,
                passphrase_env,
            } => Credentials::TicketCertificate {
                ticket: secret(ticket_env)?,
                identity: identity(pfx_path, passphrase_env)?,
            },
            AuthConfig::TgicCertificate {
                token_env,
                pfx_path,
                passphrase_env,
            } => Credentials::TgicCertificate {
                token: secret(token_env)?,
                identity: identity(pfx_path, passphrase_env)?,
            },
            AuthConfig::TgicMtan {
                token_env,
                mtan_env,
            } => Credentials::TgicMtan {
                token: secret(token_env)?,
                mtan: plain(mtan_env)?,
            },
        })
    }
}

/// Load and validate the carrier roster.
pub fn load_roster(path: &Path) -> Result<Vec<CarrierEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read carrier roster {}", path.display()))?;
    let entries: Vec<CarrierEntry> =
        serde_json::from_str(&content).context("carrier roster is not valid JSON")?;
    for entry in &entries {
        let variant = variant_of(&entry.auth);
        if !entry.carrier.supports(variant) {
            bail!(
                "carrier {} does not list auth variant {variant}",
                entry.carrier.name
            );
        }
    }
    Ok(entries)
}

fn variant_of(auth: &AuthConfig) -> atlas_bipro::AuthVariant {
    use atlas_bipro::AuthVariant::*;
    match auth {
        AuthConfig::UsernamePassword { .. } => UsernamePassword,
        AuthConfig::UsernamePasswordOtp { .. } => UsernamePasswordOtp,
        AuthConfig::Certificate { .. } => Certificate,
        AuthConfig::Ticket { .. } => Ticket,
        AuthConfig::TicketOtp { .. } => TicketOtp,
        AuthConfig::TicketCertificate { .. } => TicketCertificate,
        AuthConfig::TgicCertificate { .. } => TgicCertificate,
        AuthConfig::TgicMtan { .. } => TgicMtan,
    }
}
