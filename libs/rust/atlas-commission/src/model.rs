//! Domain entities of the commission pipeline
//!
//! Entities are immutable values; state transitions produce new values plus
//! audit entries, never in-place mutation of shared records. Enum database
//! representations keep the vocabulary the broker backend already uses.

use atlas_core::{Cents, Month};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! db_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $repr:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Database string representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $repr),+
                }
            }

            /// Parse the database representation.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($repr => Some(Self::$variant)),+,
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

db_enum! {
    /// Kind of a commission booking. Negative amounts are always
    /// chargebacks, whatever the booking code said.
    CommissionKind {
        Initial => "ap",
        Portfolio => "bp",
        Chargeback => "rueckbelastung",
        Other => "sonstige",
    }
}

db_enum! {
    /// Lifecycle of the contract ↔ commission assignment.
    MatchStatus {
        Unmatched => "unmatched",
        AutoMatched => "auto_matched",
        ManualMatched => "manual_matched",
        /// Terminal: a human decided this row is never settled.
        Ignored => "ignored",
    }
}

db_enum! {
    ContractStatus {
        Open => "offen",
        Offer => "angebot",
        Applied => "beantragt",
        Concluded => "abgeschlossen",
        Cancelled => "storniert",
    }
}

db_enum! {
    ContractOrigin {
        Manual => "manuell",
        Xempus => "xempus",
    }
}

db_enum! {
    EmployeeRole {
        Consultant => "consultant",
        TeamLeader => "team_leader",
        BackOffice => "back_office",
        Manager => "manager",
    }
}

db_enum! {
    /// Basis the team-leader share is computed from.
    TlBasis {
        ConsultantShare => "berater_anteil",
        Gross => "brutto",
    }
}

db_enum! {
    SettlementStatus {
        Draft => "draft",
        Reviewed => "reviewed",
        Released => "released",
        Paid => "paid",
    }
}

db_enum! {
    ImportSourceType {
        CarrierSheet => "vu_liste",
        Xempus => "xempus",
        FreeCommission => "free_commission",
    }
}

/// A versioned commission rate model. Versions share a `name`; the version
/// in force for a payout date is the latest active one whose
/// `effective_from` is not after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionModel {
    pub id: i64,
    pub name: String,
    /// Consultant share in percent of the gross amount.
    pub commission_rate: f64,
    /// Team-leader share in percent, if the model grants one.
    pub tl_rate: Option<f64>,
    pub tl_basis: Option<TlBasis>,
    pub effective_from: NaiveDate,
    pub active: bool,
}

/// Consultant, team leader or back-office staff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    pub user_id: Option<i64>,
    pub name: String,
    pub role: EmployeeRole,
    pub commission_model_id: Option<i64>,
    /// Overrides the model's consultant rate for this employee.
    pub commission_rate_override: Option<f64>,
    pub tl_override_rate: Option<f64>,
    pub tl_override_basis: Option<TlBasis>,
    /// The team leader this consultant reports to.
    pub team_leader_id: Option<i64>,
    pub is_active: bool,
}

/// A contract, either entered manually or imported from the Xempus export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: i64,
    pub vsnr: String,
    pub vsnr_normalized: String,
    pub carrier: Option<String>,
    pub policyholder: Option<String>,
    pub branch: Option<String>,
    pub premium: Option<Cents>,
    pub inception: Option<NaiveDate>,
    pub consultant_id: Option<i64>,
    pub status: ContractStatus,
    pub origin: ContractOrigin,
    /// Portal-internal id, kept when the export row had no VSNR yet.
    pub xempus_id: Option<String>,
    pub provision_count: i64,
    pub provision_sum: Cents,
}

/// The three shares a matched, relevant commission splits into.
/// `consultant + team_leader + house` equals the gross amount exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shares {
    /// Consultant net share (after the team-leader deduction).
    pub consultant: Cents,
    pub team_leader: Cents,
    pub house: Cents,
}

impl Shares {
    pub fn total(&self) -> Cents {
        self.consultant + self.team_leader + self.house
    }
}

/// One commission booking from a carrier register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commission {
    pub id: i64,
    pub contract_id: Option<i64>,
    pub vsnr: String,
    pub vsnr_normalized: String,
    /// Signed amount; negative is a chargeback.
    pub amount: Cents,
    pub kind: CommissionKind,
    pub payout_date: Option<NaiveDate>,
    pub carrier: String,
    pub policyholder: Option<String>,
    /// Intermediary name as the carrier wrote it.
    pub intermediary_name: Option<String>,
    pub consultant_id: Option<i64>,
    pub match_status: MatchStatus,
    pub match_confidence: Option<f64>,
    pub shares: Option<Shares>,
    pub batch_id: Option<i64>,
    pub booking_code_raw: Option<String>,
    pub conditions_code: Option<String>,
    pub commission_rate: Option<f64>,
    pub is_relevant: bool,
    pub row_hash: String,
    /// 1-based sheet row the booking came from.
    pub source_row: Option<i64>,
    pub override_amount: Option<Cents>,
    pub override_reason: Option<String>,
    pub note: Option<String>,
}

impl Commission {
    /// The amount settlements are computed from: the override when a
    /// back-office correction exists, the imported amount otherwise.
    pub fn effective_amount(&self) -> Cents {
        self.override_amount.unwrap_or(self.amount)
    }

    /// Part of the clearance set: needs human attention before settling.
    pub fn needs_clearance(&self) -> bool {
        if !self.is_relevant || self.match_status == MatchStatus::Ignored {
            return false;
        }
        self.contract_id.is_none() || self.consultant_id.is_none()
    }
}

/// Normalized carrier-side intermediary name mapped to an employee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntermediaryMapping {
    pub id: i64,
    pub name: String,
    pub name_normalized: String,
    pub employee_id: i64,
}

/// Record of one import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: i64,
    pub source_type: ImportSourceType,
    pub carrier: Option<String>,
    pub filename: String,
    pub sheet: Option<String>,
    pub total_rows: i64,
    pub imported_rows: i64,
    pub matched_rows: i64,
    pub skipped_rows: i64,
    pub error_rows: i64,
    pub importer: Option<String>,
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the source file; importing the same file twice is a no-op.
    pub file_sha256: Option<String>,
}

/// Monthly per-consultant settlement snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: i64,
    pub month: Month,
    pub employee_id: i64,
    /// Starts at 1; regeneration writes the next revision and keeps the old
    /// one read-only.
    pub revision: i32,
    /// Gross commission volume of the month (full amounts).
    pub gross: Cents,
    pub tl_deduction: Cents,
    /// Consultant net over positive positions.
    pub net: Cents,
    /// Consultant net over negative positions (≤ 0).
    pub chargebacks: Cents,
    /// `net + chargebacks`.
    pub payout: Cents,
    pub positions: i64,
    pub status: SettlementStatus,
    pub is_locked: bool,
    /// Set when a regeneration ran after this (month, employee) was already
    /// released or paid; the released snapshot itself stays untouched.
    pub is_regenerated_after_release: bool,
}

impl Settlement {
    /// Frozen settlements accept no recomputation and no inflowing
    /// overrides.
    pub fn is_frozen(&self) -> bool {
        self.is_locked
            || matches!(
                self.status,
                SettlementStatus::Released | SettlementStatus::Paid
            )
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity_type: String,
    pub entity_id: i64,
    pub action: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    /// Structured before/after diff.
    pub diff: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_enum_roundtrip() {
        for kind in [
            CommissionKind::Initial,
            CommissionKind::Portfolio,
            CommissionKind::Chargeback,
            CommissionKind::Other,
        ] {
            assert_eq!(CommissionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CommissionKind::parse("unknown"), None);
        assert_eq!(CommissionKind::Chargeback.as_str(), "rueckbelastung");
    }

    #[test]
    fn test_settlement_frozen() {
        let mut settlement = Settlement {
            id: 1,
            month: "2025-01".parse().unwrap(),
            employee_id: 7,
            revision: 1,
            gross: Cents(100_000),
            tl_deduction: Cents(7_000),
            net: Cents(63_000),
            chargebacks: Cents::ZERO,
            payout: Cents(63_000),
            positions: 1,
            status: SettlementStatus::Draft,
            is_locked: false,
            is_regenerated_after_release: false,
        };
        assert!(!settlement.is_frozen());
        settlement.status = SettlementStatus::Released;
        assert!(settlement.is_frozen());
        settlement.status = SettlementStatus::Draft;
        settlement.is_locked = true;
        assert!(settlement.is_frozen());
    }

    #[test]
    fn test_commission_effective_amount_and_clearance() {
        let commission = Commission {
            id: 1,
            contract_id: Some(5),
            vsnr: "123/450".into(),
            vsnr_normalized: "12345".into(),
            amount: Cents(4_750),
            kind: CommissionKind::Initial,
            payout_date: NaiveDate::from_ymd_opt(2025, 2, 1),
            carrier: "Allianz".into(),
            policyholder: None,
            intermediary_name: Some("Mueller".into()),
            consultant_id: None,
            match_status: MatchStatus::AutoMatched,
            match_confidence: Some(1.0),
            shares: None,
            batch_id: None,
            booking_code_raw: Some("AP".into()),
            conditions_code: None,
            commission_rate: None,
            is_relevant: true,
            row_hash: "h".into(),
            source_row: Some(2),
            override_amount: None,
            override_reason: None,
            note: None,
        };
        assert_eq!(commission.effective_amount(), Cents(4_750));
        // Contract matched but consultant missing: clearance case.
        assert!(commission.needs_clearance());

        let mut overridden = commission.clone();
        overridden.override_amount = Some(Cents(4_000));
        overridden.consultant_id = Some(3);
        assert_eq!(overridden.effective_amount(), Cents(4_000));
        assert!(!overridden.needs_clearance());
    }

    #[test]
    fn test_shares_total() {
        let shares = Shares {
            consultant: Cents(6_300),
            team_leader: Cents(700),
            house: Cents(3_000),
        };
        assert_eq!(shares.total(), Cents(10_000));
    }
}
