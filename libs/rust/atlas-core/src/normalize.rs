//! Normalization of policy numbers and names
//!
//! Matching between carrier sheets, Xempus exports and stored contracts
//! always compares normalized forms. The rules mirror the broker backend so
//! both sides agree on what "the same VSNR" means.

/// Normalize a policy number (VSNR) for matching.
///
/// Strips every non-digit, then every `0` digit. An empty result collapses
/// to `"0"`. Excel sometimes hands long numeric VSNRs over in scientific
/// notation (`1,23457E+11`); those are expanded to their digit form first.
pub fn normalize_vsnr(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return String::new();
    }

    let mut expanded = None;
    if s.to_ascii_lowercase().contains('e') && (s.contains(',') || s.contains('.')) {
        let candidate = s.replace(',', ".");
        if let Ok(num) = candidate.parse::<f64>() {
            if num.is_finite() && num > 0.0 {
                expanded = Some(format!("{}", num as i64));
            }
        }
    }
    let digits_src = expanded.as_deref().unwrap_or(s);

    let no_zeros: String = digits_src
        .chars()
        .filter(|c| c.is_ascii_digit() && *c != '0')
        .collect();

    if no_zeros.is_empty() {
        // Only reachable with at least one digit present, all of them zero,
        // or no digits at all - both compare as "0".
        "0".to_string()
    } else {
        no_zeros
    }
}

/// Normalize a carrier-side intermediary name for mapping lookups.
///
/// Lowercase, German umlauts transliterated, everything outside
/// `[a-z0-9 ]` removed, whitespace collapsed.
pub fn normalize_intermediary(name: &str) -> String {
    let lowered = transliterate_lower(name.trim());
    let stripped: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();
    collapse_whitespace(&stripped)
}

/// Normalize a person name the way the database column stores it.
///
/// Same as [`normalize_intermediary`], except parenthesized text survives as
/// a space-separated token (`Smith (John)` becomes `smith john`) and other
/// punctuation turns into a separator instead of vanishing.
pub fn normalize_db_name(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    let lowered = transliterate_lower(name.trim());
    let mut out = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        match c {
            '(' | ')' => out.push(' '),
            c if c.is_ascii_lowercase() || c.is_ascii_digit() => out.push(c),
            c if c.is_whitespace() => out.push(' '),
            _ => out.push(' '),
        }
    }
    collapse_whitespace(&out)
}

/// Rewrite the VB export format `SURNAME (FIRSTNAME)` as `Surname Firstname`.
///
/// Anything not matching that shape is title-cased as-is. Runs before
/// [`normalize_db_name`] so VB policyholders line up with Xempus rows.
pub fn normalize_vb_name(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if let Some(open) = raw.find('(') {
        if raw.ends_with(')') && open > 0 {
            let surname = raw[..open].trim();
            let firstname = raw[open + 1..raw.len() - 1].trim();
            if !surname.is_empty() && !firstname.is_empty() {
                return format!("{} {}", title_case(surname), title_case(firstname));
            }
        }
    }
    title_case(raw)
}

/// Format a ten-digit Swiss Life VSNR as `XXXXX/XXXXX` for display.
///
/// Anything that does not reduce to exactly ten digits is returned verbatim.
pub fn format_swisslife_vsnr(raw: &str) -> String {
    let digits: String = raw.trim().chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        format!("{}/{}", &digits[..5], &digits[5..])
    } else {
        raw.to_string()
    }
}

fn transliterate_lower(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.to_lowercase().chars() {
        match c {
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'ß' => out.push_str("ss"),
            c => out.push(c),
        }
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_vsnr_strips_separators_and_zeros() {
        assert_eq!(normalize_vsnr("000-123 / 4500"), "12345");
        assert_eq!(normalize_vsnr("AB-12.003"), "123");
        assert_eq!(normalize_vsnr("  40506070 "), "4567");
    }

    #[test]
    fn test_normalize_vsnr_all_zeros_collapses() {
        assert_eq!(normalize_vsnr("000"), "0");
        assert_eq!(normalize_vsnr("0-0/0"), "0");
        assert_eq!(normalize_vsnr("---"), "0");
    }

    #[test]
    fn test_normalize_vsnr_empty() {
        assert_eq!(normalize_vsnr(""), "");
        assert_eq!(normalize_vsnr("   "), "");
    }

    #[test]
    fn test_normalize_vsnr_scientific_notation() {
        // Excel export of 123450000000
        assert_eq!(normalize_vsnr("1,2345E+11"), "12345");
        assert_eq!(normalize_vsnr("1.2345E+11"), "12345");
    }

    #[test]
    fn test_normalize_intermediary() {
        assert_eq!(normalize_intermediary("  Müller & Söhne GmbH "), "mueller soehne gmbh");
        assert_eq!(normalize_intermediary("Groß, Hans-Peter"), "gross hanspeter");
    }

    #[test]
    fn test_normalize_db_name_parentheses() {
        assert_eq!(normalize_db_name("Smith (John)"), "smith john");
        assert_eq!(normalize_db_name("Müller-Lüdenscheidt (Egon)"), "mueller luedenscheidt egon");
    }

    #[test]
    fn test_normalize_vb_name() {
        assert_eq!(normalize_vb_name("MUSTERMANN (MAX)"), "Mustermann Max");
        assert_eq!(normalize_vb_name("mustermann max"), "Mustermann Max");
        assert_eq!(normalize_vb_name(""), "");
    }

    #[test]
    fn test_format_swisslife_vsnr() {
        assert_eq!(format_swisslife_vsnr("1234567890"), "12345/67890");
        assert_eq!(format_swisslife_vsnr("12 345 678 90"), "12345/67890");
        assert_eq!(format_swisslife_vsnr("123"), "123");
    }

    proptest! {
        #[test]
        fn prop_normalize_vsnr_idempotent(s in "\\PC{0,40}") {
            let once = normalize_vsnr(&s);
            prop_assert_eq!(normalize_vsnr(&once), once);
        }

        #[test]
        fn prop_normalize_vsnr_no_zeros_no_nondigits(s in "\\PC{0,40}") {
            let n = normalize_vsnr(&s);
            if n != "0" {
                prop_assert!(n.chars().all(|c| c.is_ascii_digit() && c != '0'));
            }
        }

        #[test]
        fn prop_normalize_intermediary_idempotent(s in "\\PC{0,40}") {
            let once = normalize_intermediary(&s);
            prop_assert_eq!(normalize_intermediary(&once), once);
        }

        #[test]
        fn prop_normalize_db_name_charset(s in "\\PC{0,40}") {
            let n = normalize_db_name(&s);
            prop_assert!(n.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == ' '));
            prop_assert!(!n.contains("  "));
        }
    }
}
