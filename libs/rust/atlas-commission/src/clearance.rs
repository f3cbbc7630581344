//! Clearance view
//!
//! The set of commissions a human must look at before the month can
//! settle: rows without a contract, and rows whose contract matched but
//! whose consultant is still unresolved.

use crate::model::{Commission, MatchStatus};

/// Why a commission sits in clearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearanceReason {
    /// No contract found for the VSNR.
    Unmatched,
    /// Contract matched but the intermediary name resolved to no employee.
    MissingConsultant,
}

/// Classify one commission, `None` when it needs no attention.
pub fn clearance_reason(commission: &Commission) -> Option<ClearanceReason> {
    if !commission.is_relevant || commission.match_status == MatchStatus::Ignored {
        return None;
    }
    if commission.contract_id.is_none() {
        return Some(ClearanceReason::Unmatched);
    }
    if commission.consultant_id.is_none() {
        return Some(ClearanceReason::MissingConsultant);
    }
    None
}

/// Clearance counters for the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ClearanceCounts {
    pub unmatched: i64,
    pub missing_consultant: i64,
}

impl ClearanceCounts {
    pub fn total(&self) -> i64 {
        self.unmatched + self.missing_consultant
    }
}

/// Count the clearance set over a commission snapshot.
pub fn count_clearance(commissions: &[Commission]) -> ClearanceCounts {
    let mut counts = ClearanceCounts::default();
    for commission in commissions {
        match clearance_reason(commission) {
            Some(ClearanceReason::Unmatched) => counts.unmatched += 1,
            Some(ClearanceReason::MissingConsultant) => counts.missing_consultant += 1,
            None => {}
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CommissionKind;
    use atlas_core::Cents;

    fn commission(contract: Option<i64>, consultant: Option<i64>) -> Commission {
        Commission {
            id: 1,
            contract_id: contract,
            vsnr: "1".into(),
            vsnr_normalized: "1".into(),
            amount: Cents(1_000),
            kind: CommissionKind::Initial,
            payout_date: None,
            carrier: "Allianz".into(),
            policyholder: None,
            intermediary_name: None,
            consultant_id: consultant,
            match_status: if contract.is_some() {
                MatchStatus::AutoMatched
            } else {
                MatchStatus::Unmatched
            },
            match_confidence: None,
            shares: None,
            batch_id: None,
            booking_code_raw: None,
            conditions_code: None,
            commission_rate: None,
            is_relevant: true,
            row_hash: "h".into(),
            source_row: None,
            override_amount: None,
            override_reason: None,
            note: None,
        }
    }

    #[test]
    fn test_clearance_classification() {
        assert_eq!(
            clearance_reason(&commission(None, None)),
            Some(ClearanceReason::Unmatched)
        );
        assert_eq!(
            clearance_reason(&commission(Some(1), None)),
            Some(ClearanceReason::MissingConsultant)
        );
        assert_eq!(clearance_reason(&commission(Some(1), Some(7))), None);
    }

    #[test]
    fn test_ignored_and_irrelevant_not_counted() {
        let mut ignored = commission(None, None);
        ignored.match_status = MatchStatus::Ignored;
        let mut irrelevant = commission(None, None);
        irrelevant.is_relevant = false;

        let counts = count_clearance(&[
            ignored,
            irrelevant,
            commission(None, None),
            commission(Some(1), None),
        ]);
        assert_eq!(counts.unmatched, 1);
        assert_eq!(counts.missing_consultant, 1);
        assert_eq!(counts.total(), 2);
    }
}
