//! Monthly settlement snapshots
//!
//! `generate(month)` aggregates every relevant, split commission of the
//! month into one snapshot per consultant. Snapshots move through a strict
//! status machine and are never edited in place: regeneration writes the
//! next revision and demotes reviewed snapshots back to draft, while
//! released and paid ones stay as they are.

use atlas_core::{Cents, Month};
use std::collections::BTreeMap;

use crate::error::CommissionError;
use crate::model::{Commission, MatchStatus, Settlement, SettlementStatus};

/// Allowed status transitions:
///
/// ```text
///   draft -> reviewed -> released -> paid
///     ^         |
///     +---------+   (un-review)
/// ```
pub fn is_allowed_transition(from: SettlementStatus, to: SettlementStatus) -> bool {
    use SettlementStatus::*;
    matches!(
        (from, to),
        (Draft, Reviewed) | (Reviewed, Released) | (Released, Paid) | (Reviewed, Draft)
    )
}

/// Validate a transition, rejecting anything the machine does not allow.
pub fn check_transition(
    from: SettlementStatus,
    to: SettlementStatus,
) -> Result<(), CommissionError> {
    if is_allowed_transition(from, to) {
        Ok(())
    } else {
        Err(CommissionError::InvalidTransition { from, to })
    }
}

/// Freshly computed per-consultant figures for one month, not yet a
/// persisted revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementDraft {
    pub month: Month,
    pub employee_id: i64,
    /// Total gross volume (full commission amounts, sign included).
    pub gross: Cents,
    pub tl_deduction: Cents,
    /// Consultant net over positive positions.
    pub net: Cents,
    /// Consultant net over negative positions (≤ 0).
    pub chargebacks: Cents,
    /// `net + chargebacks` - what actually gets paid out.
    pub payout: Cents,
    pub positions: i64,
}

/// Whether a commission feeds the settlement for `month`.
pub fn feeds_settlement(commission: &Commission, month: Month) -> bool {
    commission.is_relevant
        && commission.match_status != MatchStatus::Ignored
        && commission.consultant_id.is_some()
        && commission.shares.is_some()
        && commission
            .payout_date
            .map_or(false, |date| month.contains(date))
}

/// Aggregate the month's commissions into one draft per consultant.
///
/// Sorted by employee id so regeneration output is deterministic.
pub fn build_settlements(month: Month, commissions: &[Commission]) -> Vec<SettlementDraft> {
    let mut per_employee: BTreeMap<i64, SettlementDraft> = BTreeMap::new();

    for commission in commissions {
        if !feeds_settlement(commission, month) {
            continue;
        }
        let employee_id = commission.consultant_id.expect("filtered above");
        let shares = commission.shares.expect("filtered above");
        let amount = commission.effective_amount();

        let entry = per_employee
            .entry(employee_id)
            .or_insert_with(|| SettlementDraft {
                month,
                employee_id,
                gross: Cents::ZERO,
                tl_deduction: Cents::ZERO,
                net: Cents::ZERO,
                chargebacks: Cents::ZERO,
                payout: Cents::ZERO,
                positions: 0,
            });

        entry.gross += amount;
        entry.tl_deduction += shares.team_leader;
        if amount.is_negative() {
            entry.chargebacks += shares.consultant;
        } else {
            entry.net += shares.consultant;
        }
        entry.positions += 1;
    }

    per_employee
        .into_values()
        .map(|mut draft| {
            draft.payout = draft.net + draft.chargebacks;
            draft
        })
        .collect()
}

/// What regeneration does with one existing settlement of the month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegenerateAction {
    /// Draft (or reviewed, demoted to draft): replaced by the new figures
    /// under a bumped revision.
    Replace { bump_revision_to: i32 },
    /// Released/paid/locked: left untouched; the new figures are written as
    /// a parallel revision flagged `is_regenerated_after_release`.
    PreserveAndBranch { new_revision: i32 },
}

/// Decide how regeneration treats the latest existing revision.
pub fn plan_regeneration(existing: Option<&Settlement>) -> RegenerateAction {
    match existing {
        None => RegenerateAction::Replace {
            bump_revision_to: 1,
        },
        Some(settlement) if settlement.is_frozen() => RegenerateAction::PreserveAndBranch {
            new_revision: settlement.revision + 1,
        },
        Some(settlement) => RegenerateAction::Replace {
            bump_revision_to: settlement.revision + 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommissionKind, Shares};
    use chrono::NaiveDate;

    fn month() -> Month {
        "2025-01".parse().unwrap()
    }

    fn commission(
        id: i64,
        consultant: Option<i64>,
        amount: i64,
        shares: Option<Shares>,
        payout: &str,
    ) -> Commission {
        Commission {
            id,
            contract_id: Some(1),
            vsnr: "1".into(),
            vsnr_normalized: "1".into(),
            amount: Cents(amount),
            kind: if amount < 0 {
                CommissionKind::Chargeback
            } else {
                CommissionKind::Initial
            },
            payout_date: NaiveDate::parse_from_str(payout, "%Y-%m-%d").ok(),
            carrier: "Allianz".into(),
            policyholder: None,
            intermediary_name: None,
            consultant_id: consultant,
            match_status: MatchStatus::AutoMatched,
            match_confidence: Some(1.0),
            shares,
            batch_id: None,
            booking_code_raw: None,
            conditions_code: None,
            commission_rate: None,
            is_relevant: true,
            row_hash: format!("h{id}"),
            source_row: None,
            override_amount: None,
            override_reason: None,
            note: None,
        }
    }

    fn shares(consultant: i64, tl: i64, house: i64) -> Option<Shares> {
        Some(Shares {
            consultant: Cents(consultant),
            team_leader: Cents(tl),
            house: Cents(house),
        })
    }

    #[test]
    fn test_status_machine() {
        use SettlementStatus::*;
        assert!(is_allowed_transition(Draft, Reviewed));
        assert!(is_allowed_transition(Reviewed, Released));
        assert!(is_allowed_transition(Released, Paid));
        assert!(is_allowed_transition(Reviewed, Draft));

        assert!(!is_allowed_transition(Draft, Released));
        assert!(!is_allowed_transition(Draft, Paid));
        assert!(!is_allowed_transition(Released, Draft));
        assert!(!is_allowed_transition(Paid, Released));
        assert!(!is_allowed_transition(Released, Reviewed));

        assert!(check_transition(Draft, Paid).is_err());
        assert!(check_transition(Draft, Reviewed).is_ok());
    }

    #[test]
    fn test_build_settlement_per_employee() {
        let commissions = vec![
            commission(1, Some(7), 100_000, shares(63_000, 7_000, 30_000), "2025-01-10"),
            commission(2, Some(7), 50_000, shares(31_500, 3_500, 15_000), "2025-01-20"),
            commission(3, Some(8), 20_000, shares(14_000, 0, 6_000), "2025-01-05"),
        ];
        let drafts = build_settlements(month(), &commissions);
        assert_eq!(drafts.len(), 2);

        let seven = &drafts[0];
        assert_eq!(seven.employee_id, 7);
        assert_eq!(seven.gross, Cents(150_000));
        assert_eq!(seven.tl_deduction, Cents(10_500));
        assert_eq!(seven.net, Cents(94_500));
        assert_eq!(seven.chargebacks, Cents::ZERO);
        assert_eq!(seven.payout, Cents(94_500));
        assert_eq!(seven.positions, 2);

        let eight = &drafts[1];
        assert_eq!(eight.employee_id, 8);
        assert_eq!(eight.payout, Cents(14_000));
    }

    #[test]
    fn test_chargebacks_reduce_payout() {
        let commissions = vec![
            commission(1, Some(7), 100_000, shares(63_000, 7_000, 30_000), "2025-01-10"),
            commission(2, Some(7), -40_000, shares(-25_200, -2_800, -12_000), "2025-01-15"),
        ];
        let drafts = build_settlements(month(), &commissions);
        let draft = &drafts[0];
        assert_eq!(draft.gross, Cents(60_000));
        assert_eq!(draft.net, Cents(63_000));
        assert_eq!(draft.chargebacks, Cents(-25_200));
        assert_eq!(draft.payout, Cents(37_800));
        assert_eq!(draft.positions, 2);
    }

    #[test]
    fn test_filters_irrelevant_unsplit_and_out_of_month() {
        let mut ignored = commission(1, Some(7), 10_000, shares(7_000, 0, 3_000), "2025-01-10");
        ignored.match_status = MatchStatus::Ignored;
        let mut irrelevant = commission(2, Some(7), 10_000, shares(7_000, 0, 3_000), "2025-01-10");
        irrelevant.is_relevant = false;
        let commissions = vec![
            ignored,
            irrelevant,
            commission(3, None, 10_000, shares(7_000, 0, 3_000), "2025-01-10"),
            commission(4, Some(7), 10_000, None, "2025-01-10"),
            commission(5, Some(7), 10_000, shares(7_000, 0, 3_000), "2025-02-10"),
        ];
        assert!(build_settlements(month(), &commissions).is_empty());
    }

    #[test]
    fn test_override_amount_feeds_gross() {
        let mut c = commission(1, Some(7), 100_000, shares(63_000, 7_000, 30_000), "2025-01-10");
        c.override_amount = Some(Cents(90_000));
        let drafts = build_settlements(month(), &[c]);
        assert_eq!(drafts[0].gross, Cents(90_000));
    }

    #[test]
    fn test_plan_regeneration() {
        let settlement = |status, locked, revision| Settlement {
            id: 1,
            month: month(),
            employee_id: 7,
            revision,
            gross: Cents(100_000),
            tl_deduction: Cents(7_000),
            net: Cents(63_000),
            chargebacks: Cents::ZERO,
            payout: Cents(63_000),
            positions: 1,
            status,
            is_locked: locked,
            is_regenerated_after_release: false,
        };

        assert_eq!(
            plan_regeneration(None),
            RegenerateAction::Replace {
                bump_revision_to: 1
            }
        );
        assert_eq!(
            plan_regeneration(Some(&settlement(SettlementStatus::Draft, false, 1))),
            RegenerateAction::Replace {
                bump_revision_to: 2
            }
        );
        // Reviewed is replaced too: the user must re-review afterwards.
        assert_eq!(
            plan_regeneration(Some(&settlement(SettlementStatus::Reviewed, false, 2))),
            RegenerateAction::Replace {
                bump_revision_to: 3
            }
        );
        assert_eq!(
            plan_regeneration(Some(&settlement(SettlementStatus::Released, false, 2))),
            RegenerateAction::PreserveAndBranch { new_revision: 3 }
        );
        assert_eq!(
            plan_regeneration(Some(&settlement(SettlementStatus::Draft, true, 4))),
            RegenerateAction::PreserveAndBranch { new_revision: 5 }
        );
    }
}
