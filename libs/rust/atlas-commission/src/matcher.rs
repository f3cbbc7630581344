//! Commission ↔ contract matching
//!
//! Two independent stages per commission:
//!
//! 1. **Contract lookup** - exact equality on the normalized VSNR. Only an
//!    unambiguous hit (exactly one contract) assigns the contract.
//! 2. **Intermediary resolution** - the carrier-side intermediary name,
//!    normalized, looked up in the mapping table; a hit resolves the
//!    consultant.
//!
//! Auto-matching is idempotent: re-running it over already matched rows
//! reproduces the same verdicts and never touches manual decisions.

use atlas_core::normalize_intermediary;
use std::collections::HashMap;

use crate::model::{Commission, Contract, IntermediaryMapping, MatchStatus};

/// Read-mostly index over contracts, keyed by normalized VSNR.
pub struct ContractIndex {
    by_vsnr: HashMap<String, Vec<i64>>,
}

impl ContractIndex {
    pub fn build(contracts: &[Contract]) -> Self {
        let mut by_vsnr: HashMap<String, Vec<i64>> = HashMap::new();
        for contract in contracts {
            if contract.vsnr_normalized.is_empty() || contract.vsnr_normalized == "0" {
                continue;
            }
            by_vsnr
                .entry(contract.vsnr_normalized.clone())
                .or_default()
                .push(contract.id);
        }
        Self { by_vsnr }
    }

    /// The contract id if exactly one contract carries this VSNR.
    pub fn lookup_unique(&self, vsnr_normalized: &str) -> Option<i64> {
        match self.by_vsnr.get(vsnr_normalized).map(Vec::as_slice) {
            Some([single]) => Some(*single),
            _ => None,
        }
    }

    /// Whether the VSNR is ambiguous (more than one contract).
    pub fn is_ambiguous(&self, vsnr_normalized: &str) -> bool {
        self.by_vsnr
            .get(vsnr_normalized)
            .map_or(false, |ids| ids.len() > 1)
    }
}

/// Index over intermediary mappings, keyed by normalized name.
pub struct MappingIndex {
    by_name: HashMap<String, i64>,
}

impl MappingIndex {
    pub fn build(mappings: &[IntermediaryMapping]) -> Self {
        Self {
            by_name: mappings
                .iter()
                .map(|m| (m.name_normalized.clone(), m.employee_id))
                .collect(),
        }
    }

    pub fn resolve(&self, intermediary_name: &str) -> Option<i64> {
        let normalized = normalize_intermediary(intermediary_name);
        if normalized.is_empty() {
            return None;
        }
        self.by_name.get(&normalized).copied()
    }
}

/// Outcome of auto-matching one commission.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchVerdict {
    pub contract_id: Option<i64>,
    pub consultant_id: Option<i64>,
    pub status: MatchStatus,
    pub confidence: Option<f64>,
}

/// Run both stages for one commission.
pub fn match_commission(
    vsnr_normalized: &str,
    intermediary_name: Option<&str>,
    contracts: &ContractIndex,
    mappings: &MappingIndex,
) -> MatchVerdict {
    let contract_id = contracts.lookup_unique(vsnr_normalized);
    let consultant_id = intermediary_name.and_then(|name| mappings.resolve(name));

    let (status, confidence) = match contract_id {
        Some(_) => (MatchStatus::AutoMatched, Some(1.0)),
        None => (MatchStatus::Unmatched, None),
    };

    MatchVerdict {
        contract_id,
        consultant_id,
        status,
        confidence,
    }
}

/// Whether auto-matching may touch this commission at all.
///
/// Manual assignments and ignored rows are off-limits; re-running the
/// matcher over auto states is safe.
pub fn is_auto_matchable(commission: &Commission) -> bool {
    matches!(
        commission.match_status,
        MatchStatus::Unmatched | MatchStatus::AutoMatched
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContractOrigin, ContractStatus};
    use atlas_core::Cents;

    fn contract(id: i64, vsnr_normalized: &str, consultant_id: Option<i64>) -> Contract {
        Contract {
            id,
            vsnr: vsnr_normalized.to_string(),
            vsnr_normalized: vsnr_normalized.to_string(),
            carrier: Some("Allianz".into()),
            policyholder: None,
            branch: None,
            premium: None,
            inception: None,
            consultant_id,
            status: ContractStatus::Concluded,
            origin: ContractOrigin::Xempus,
            xempus_id: None,
            provision_count: 0,
            provision_sum: Cents::ZERO,
        }
    }

    fn mapping(name: &str, employee_id: i64) -> IntermediaryMapping {
        IntermediaryMapping {
            id: employee_id,
            name: name.to_string(),
            name_normalized: normalize_intermediary(name),
            employee_id,
        }
    }

    #[test]
    fn test_unique_vsnr_auto_matches() {
        let contracts = ContractIndex::build(&[contract(1, "12345", Some(7))]);
        let mappings = MappingIndex::build(&[mapping("Müller & Partner", 7)]);

        let verdict = match_commission("12345", Some("Mueller & Partner"), &contracts, &mappings);
        assert_eq!(verdict.contract_id, Some(1));
        assert_eq!(verdict.consultant_id, Some(7));
        assert_eq!(verdict.status, MatchStatus::AutoMatched);
        assert_eq!(verdict.confidence, Some(1.0));
    }

    #[test]
    fn test_contract_match_without_consultant_goes_to_clearance() {
        // S6: VSNR matches exactly one contract, intermediary unknown.
        let contracts = ContractIndex::build(&[contract(1, "12345", Some(7))]);
        let mappings = MappingIndex::build(&[]);

        let verdict = match_commission("12345", Some("Unknown Broker"), &contracts, &mappings);
        assert_eq!(verdict.contract_id, Some(1));
        assert_eq!(verdict.consultant_id, None);
        assert_eq!(verdict.status, MatchStatus::AutoMatched);
    }

    #[test]
    fn test_ambiguous_vsnr_stays_unmatched() {
        let contracts =
            ContractIndex::build(&[contract(1, "12345", None), contract(2, "12345", None)]);
        let mappings = MappingIndex::build(&[]);

        let verdict = match_commission("12345", None, &contracts, &mappings);
        assert_eq!(verdict.contract_id, None);
        assert_eq!(verdict.status, MatchStatus::Unmatched);
        assert!(contracts.is_ambiguous("12345"));
    }

    #[test]
    fn test_consultant_resolution_is_independent_of_contract() {
        let contracts = ContractIndex::build(&[]);
        let mappings = MappingIndex::build(&[mapping("Schmidt", 3)]);

        let verdict = match_commission("999", Some("SCHMIDT"), &contracts, &mappings);
        assert_eq!(verdict.contract_id, None);
        assert_eq!(verdict.consultant_id, Some(3));
        assert_eq!(verdict.status, MatchStatus::Unmatched);
    }

    #[test]
    fn test_empty_vsnr_never_matches() {
        let contracts = ContractIndex::build(&[contract(1, "0", None)]);
        let mappings = MappingIndex::build(&[]);
        let verdict = match_commission("0", None, &contracts, &mappings);
        assert_eq!(verdict.contract_id, None);
    }

    #[test]
    fn test_matching_is_idempotent() {
        let contracts = ContractIndex::build(&[contract(1, "12345", Some(7))]);
        let mappings = MappingIndex::build(&[mapping("Schmidt", 3)]);

        let first = match_commission("12345", Some("Schmidt"), &contracts, &mappings);
        let second = match_commission("12345", Some("Schmidt"), &contracts, &mappings);
        assert_eq!(first, second);
    }
}
