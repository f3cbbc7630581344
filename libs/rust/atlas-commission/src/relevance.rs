//! Settlement relevance rules
//!
//! Per-carrier business rules deciding whether a commission row feeds the
//! settlement run or is informational only. Pure functions of carrier name,
//! booking code, commission rate and conditions code, recomputable at any
//! time.

use crate::model::CommissionKind;

/// Allianz pays out below this courtage rate without settlement relevance.
const ALLIANZ_MIN_RATE: f64 = 20.0;
/// Swiss Life initial-commission booking codes.
const SWISSLIFE_AP_CODES: [&str; 2] = ["BARM", "APG"];
/// VB booking code that is never settlement-relevant.
const VB_IRRELEVANT_CODE: &str = "dy";
/// VB conditions codes that keep a row relevant.
const VB_RELEVANT_CONDITIONS: [&str; 3] = ["15", "35", "50"];

/// Whether a commission row is settlement-relevant.
///
/// Unknown carriers default to relevant.
pub fn is_relevant(
    carrier: &str,
    commission_rate: Option<f64>,
    booking_code: Option<&str>,
    conditions_code: Option<&str>,
) -> bool {
    match carrier.trim() {
        "Allianz" => allianz_relevant(commission_rate),
        "SwissLife" => swisslife_relevant(booking_code),
        "VB" => vb_relevant(booking_code, conditions_code),
        _ => true,
    }
}

fn allianz_relevant(commission_rate: Option<f64>) -> bool {
    match commission_rate {
        Some(rate) => rate >= ALLIANZ_MIN_RATE,
        None => true,
    }
}

/// Swiss Life: only BARM/APG bookings settle; empty code means irrelevant.
fn swisslife_relevant(booking_code: Option<&str>) -> bool {
    match booking_code.map(str::trim) {
        Some(code) if !code.is_empty() => {
            SWISSLIFE_AP_CODES.contains(&code.to_uppercase().as_str())
        }
        _ => false,
    }
}

/// VB: `dy` is irrelevant unconditionally; otherwise the conditions code
/// must be one of the relevant set (absent code passes).
fn vb_relevant(booking_code: Option<&str>, conditions_code: Option<&str>) -> bool {
    if let Some(code) = booking_code {
        if code.trim().eq_ignore_ascii_case(VB_IRRELEVANT_CODE) {
            return false;
        }
    }
    if let Some(conditions) = conditions_code {
        let conditions = conditions.trim();
        if !conditions.is_empty() && !VB_RELEVANT_CONDITIONS.contains(&conditions) {
            return false;
        }
    }
    true
}

/// Translate a carrier booking code into the commission kind.
///
/// The sign rule is applied elsewhere: any negative amount becomes a
/// chargeback no matter what this returns.
pub fn classify_booking_code(carrier: &str, booking_code: Option<&str>) -> CommissionKind {
    let code = booking_code.unwrap_or_default().trim().to_uppercase();
    if code.is_empty() {
        return CommissionKind::Initial;
    }
    match code.as_str() {
        "RB" | "ST" | "STORNO" | "RÜCK" | "RUECK" | "RÜCKBELASTUNG" => {
            return CommissionKind::Chargeback
        }
        "BP" | "FP" | "FOLGEPROV" | "BESTANDSPROV" | "BEST" => return CommissionKind::Portfolio,
        "AP" | "EV" | "EV-PF" | "ABSCHL" | "ABSCHLUSSPROV" => return CommissionKind::Initial,
        _ => {}
    }
    if carrier == "SwissLife" && SWISSLIFE_AP_CODES.contains(&code.as_str()) {
        return CommissionKind::Initial;
    }
    CommissionKind::Other
}
