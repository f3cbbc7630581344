//! ATLAS Commission Reconciliation Engine
//!
//! Deterministic pipeline from carrier commission registers and the broker
//! portal's contract export down to monthly per-consultant settlements:
//!
//! - [`sheet`] / [`xempus`]: spreadsheet parsing with per-carrier column
//!   maps and row-level relevance rules
//! - [`matcher`]: VSNR-exact contract matching plus intermediary-name
//!   consultant resolution
//! - [`splitter`]: house / consultant / team-leader shares from the
//!   versioned rate model, in integer cents
//! - [`settlement`]: monthly snapshots with a guarded status machine and
//!   revision history
//! - [`import`]: batch import with row-hash and file-hash deduplication
//! - [`db`]: Postgres persistence and the mutating operations, every one of
//!   which writes an audit entry
//!
//! Everything above [`db`] is pure and runs in tests without a database.

pub mod audit;
pub mod clearance;
pub mod db;
mod error;
pub mod import;
pub mod matcher;
pub mod model;
pub mod relevance;
pub mod settlement;
pub mod sheet;
pub mod splitter;
pub mod xempus;

pub use error::CommissionError;

#[cfg(test)]
mod tests {
    //! Cross-module scenarios over the pure pipeline.

    use crate::model::*;
    use crate::settlement::{build_settlements, plan_regeneration, RegenerateAction};
    use crate::splitter::{affected_commissions, compute_shares};
    use atlas_core::{Cents, Month};
    use chrono::NaiveDate;

    fn employee() -> Employee {
        Employee {
            id: 7,
            user_id: None,
            name: "Erika Beispiel".into(),
            role: EmployeeRole::Consultant,
            commission_model_id: Some(1),
            commission_rate_override: None,
            tl_override_rate: None,
            tl_override_basis: None,
            team_leader_id: Some(2),
            is_active: true,
        }
    }

    fn model_version(id: i64, rate: f64, effective_from: &str) -> CommissionModel {
        CommissionModel {
            id,
            name: "Standard".into(),
            commission_rate: rate,
            tl_rate: Some(10.0),
            tl_basis: Some(TlBasis::ConsultantShare),
            effective_from: effective_from.parse().unwrap(),
            active: true,
        }
    }

    fn commission(id: i64, amount: i64, payout: &str, versions: &[CommissionModel]) -> Commission {
        let payout_date: NaiveDate = payout.parse().unwrap();
        let shares = compute_shares(Cents(amount), payout_date, &employee(), versions);
        Commission {
            id,
            contract_id: Some(1),
            vsnr: "123450".into(),
            vsnr_normalized: "12345".into(),
            amount: Cents(amount),
            kind: CommissionKind::Initial,
            payout_date: Some(payout_date),
            carrier: "Allianz".into(),
            policyholder: None,
            intermediary_name: Some("Beispiel".into()),
            consultant_id: Some(7),
            match_status: MatchStatus::AutoMatched,
            match_confidence: Some(1.0),
            shares,
            batch_id: Some(1),
            booking_code_raw: Some("AP".into()),
            conditions_code: None,
            commission_rate: Some(25.0),
            is_relevant: true,
            row_hash: format!("hash-{id}"),
            source_row: Some(id + 1),
            override_amount: None,
            override_reason: None,
            note: None,
        }
    }

    /// Rate change with history: the released January settlement stays at
    /// the 70 % rates, February resplits to 75 % and regenerates as a new
    /// revision.
    #[test]
    fn test_rate_change_preserves_history() {
        let v1 = model_version(1, 70.0, "2024-01-01");
        let cutoff: NaiveDate = "2025-02-01".parse().unwrap();

        let january = commission(1, 100_000, "2025-01-15", std::slice::from_ref(&v1));
        let february = commission(2, 100_000, "2025-02-10", std::slice::from_ref(&v1));

        // January settles and is released at the old rates.
        let jan_month: Month = "2025-01".parse().unwrap();
        let jan_drafts = build_settlements(jan_month, &[january.clone(), february.clone()]);
        assert_eq!(jan_drafts.len(), 1);
        assert_eq!(jan_drafts[0].gross, Cents(100_000));
        assert_eq!(jan_drafts[0].net, Cents(63_000));
        assert_eq!(jan_drafts[0].tl_deduction, Cents(7_000));

        let released = Settlement {
            id: 1,
            month: jan_month,
            employee_id: 7,
            revision: 1,
            gross: jan_drafts[0].gross,
            tl_deduction: jan_drafts[0].tl_deduction,
            net: jan_drafts[0].net,
            chargebacks: Cents::ZERO,
            payout: jan_drafts[0].payout,
            positions: 1,
            status: SettlementStatus::Released,
            is_locked: false,
            is_regenerated_after_release: false,
        };

        // The model is edited: 75 % effective 2025-02-01.
        let versions = vec![v1, model_version(2, 75.0, "2025-02-01")];

        // Only February is invalidated by the cutoff.
        let all = vec![january.clone(), february.clone()];
        let affected = affected_commissions(&all, &[7], cutoff);
        assert_eq!(affected.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2]);

        // January's shares are unchanged under the new version set.
        let jan_shares =
            compute_shares(Cents(100_000), "2025-01-15".parse().unwrap(), &employee(), &versions)
                .unwrap();
        assert_eq!(jan_shares.consultant + jan_shares.team_leader, Cents(70_000));

        // February resplits to 75/25.
        let feb_shares =
            compute_shares(Cents(100_000), "2025-02-10".parse().unwrap(), &employee(), &versions)
                .unwrap();
        assert_eq!(feb_shares.consultant + feb_shares.team_leader, Cents(75_000));
        assert_eq!(feb_shares.house, Cents(25_000));

        // Regeneration: the released January snapshot is preserved and
        // branches; a February draft would simply bump its revision.
        assert_eq!(
            plan_regeneration(Some(&released)),
            RegenerateAction::PreserveAndBranch { new_revision: 2 }
        );
        let feb_draft = Settlement {
            month: "2025-02".parse().unwrap(),
            status: SettlementStatus::Draft,
            ..released.clone()
        };
        assert_eq!(
            plan_regeneration(Some(&feb_draft)),
            RegenerateAction::Replace {
                bump_revision_to: 2
            }
        );
    }

    /// The settlement sum invariant holds across a mixed month.
    #[test]
    fn test_month_totals_consistent() {
        let v1 = model_version(1, 70.0, "2024-01-01");
        let versions = std::slice::from_ref(&v1);
        let commissions = vec![
            commission(1, 100_000, "2025-01-10", versions),
            commission(2, 55_500, "2025-01-12", versions),
            commission(3, -40_000, "2025-01-20", versions),
        ];
        for c in &commissions {
            let shares = c.shares.unwrap();
            assert_eq!(shares.total(), c.amount);
        }
        let drafts = build_settlements("2025-01".parse().unwrap(), &commissions);
        let draft = &drafts[0];
        assert_eq!(draft.gross, Cents(115_500));
        assert_eq!(draft.payout, draft.net + draft.chargebacks);
        assert_eq!(draft.positions, 3);
    }
}
