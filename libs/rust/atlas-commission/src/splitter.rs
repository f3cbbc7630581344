//! Share computation from the versioned rate model
//!
//! For a matched, relevant commission with a known consultant, the gross
//! amount splits into consultant, team-leader and house shares. All
//! arithmetic is integer cents with round-half-to-even on the final cent;
//! the three shares always sum back to the gross amount exactly.
//!
//! Model versions share a name. The version in force for a payout date is
//! the latest active one whose `effective_from` is not after that date, so
//! historical settlements keep the rates that were valid in their month.

use atlas_core::{Cents, Month};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{Commission, CommissionModel, Employee, Shares, TlBasis};

/// Pick the model version in force on `payout_date` from one lineage.
///
/// `versions` are all versions sharing the employee's model name.
pub fn resolve_model_version<'a>(
    versions: &'a [CommissionModel],
    payout_date: NaiveDate,
) -> Option<&'a CommissionModel> {
    versions
        .iter()
        .filter(|v| v.active && v.effective_from <= payout_date)
        .max_by_key(|v| v.effective_from)
}

/// Compute the three shares for one commission amount.
///
/// Returns `None` when no rate applies: no model version in force and no
/// employee-level override.
pub fn compute_shares(
    amount: Cents,
    payout_date: NaiveDate,
    employee: &Employee,
    model_versions: &[CommissionModel],
) -> Option<Shares> {
    let version = resolve_model_version(model_versions, payout_date);

    let consultant_rate = employee
        .commission_rate_override
        .or_else(|| version.map(|v| v.commission_rate))?;
    let consultant_gross = amount.share(consultant_rate);

    let tl_rate = employee
        .tl_override_rate
        .or_else(|| version.and_then(|v| v.tl_rate))
        .unwrap_or(0.0);
    let tl_basis = employee
        .tl_override_basis
        .or_else(|| version.and_then(|v| v.tl_basis))
        .unwrap_or(TlBasis::ConsultantShare);

    let tl_base = match tl_basis {
        TlBasis::ConsultantShare => consultant_gross,
        TlBasis::Gross => amount,
    };
    // The TL share never exceeds the consultant share and never flips sign
    // against it; for chargebacks both bounds are negative.
    let team_leader = tl_base.share(tl_rate).clamp_to_zero_and(consultant_gross);

    Some(Shares {
        consultant: consultant_gross - team_leader,
        team_leader,
        house: amount - consultant_gross,
    })
}

/// Result of a rate-model or employee-rate change, reported to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecalcSummary {
    pub splits_recalculated: i64,
    pub settlements_regenerated: i64,
    pub affected_employees: i64,
    pub from_date: Option<NaiveDate>,
}

/// Plan which commissions a rate change invalidates.
///
/// Commissions with `payout_date >= cutoff` belonging to one of the
/// affected employees get fresh splits; months strictly before the cutoff
/// month stay untouched. Commissions feeding a frozen settlement are
/// excluded by the caller (it knows the settlement states).
pub fn affected_commissions<'a>(
    commissions: &'a [Commission],
    affected_employee_ids: &[i64],
    cutoff: NaiveDate,
) -> Vec<&'a Commission> {
    commissions
        .iter()
        .filter(|c| {
            c.is_relevant
                && c.payout_date.map_or(false, |d| d >= cutoff)
                && c.consultant_id
                    .map_or(false, |id| affected_employee_ids.contains(&id))
        })
        .collect()
}

/// Months that must be regenerated after a cutoff-date change.
pub fn months_from(cutoff: NaiveDate, through: Month) -> Vec<Month> {
    let mut months = Vec::new();
    let mut month = Month::of(cutoff);
    while month <= through {
        months.push(month);
        month = month.next();
    }
    months
}
