//! Money in integer cents
//!
//! Every amount in ATLAS is an integer number of euro cents. Share math
//! (consultant / team-leader / house) happens in cents with round-half-to-even
//! on the final cent, so the three shares of a commission always sum back to
//! the gross amount exactly.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// An amount of money in euro cents. Negative values are chargebacks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cents(pub i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    /// Convert a fractional euro value (e.g. an Excel numeric cell) to cents,
    /// rounding half to even.
    pub fn from_euros(euros: f64) -> Cents {
        let scaled = euros * 100.0;
        let floor = scaled.floor();
        let frac = scaled - floor;
        let mut c = floor as i64;
        match frac.partial_cmp(&0.5) {
            Some(Ordering::Greater) => c += 1,
            Some(Ordering::Equal) => {
                if c % 2 != 0 {
                    c += 1;
                }
            }
            _ => {}
        }
        Cents(c)
    }

    /// Apply a percentage rate, rounding half to even on the final cent.
    ///
    /// The rate is taken to hundredths of a percent (`70.25` means 70.25 %),
    /// which covers every rate the rate models and carrier sheets carry.
    pub fn share(self, rate_percent: f64) -> Cents {
        let rate_centipercent = (rate_percent * 100.0).round() as i128;
        Cents(div_round_half_even(
            self.0 as i128 * rate_centipercent,
            10_000,
        ) as i64)
    }

    /// Clamp between zero and `bound`, whichever way around they lie.
    ///
    /// Used for the team-leader share: it may never exceed the consultant
    /// share and never flips sign against it, for chargebacks included.
    pub fn clamp_to_zero_and(self, bound: Cents) -> Cents {
        let (lo, hi) = if bound.0 < 0 { (bound.0, 0) } else { (0, bound.0) };
        Cents(self.0.clamp(lo, hi))
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn abs(self) -> Cents {
        Cents(self.0.abs())
    }

    /// Fixed two-decimal rendering without going through floats (`-40.00`).
    pub fn format_2dp(self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }

    pub fn to_euros(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_2dp())
    }
}

impl Add for Cents {
    type Output = Cents;
    fn add(self, rhs: Cents) -> Cents {
        Cents(self.0 + rhs.0)
    }
}

impl AddAssign for Cents {
    fn add_assign(&mut self, rhs: Cents) {
        self.0 += rhs.0;
    }
}

impl Sub for Cents {
    type Output = Cents;
    fn sub(self, rhs: Cents) -> Cents {
        Cents(self.0 - rhs.0)
    }
}

impl SubAssign for Cents {
    fn sub_assign(&mut self, rhs: Cents) {
        self.0 -= rhs.0;
    }
}

impl Neg for Cents {
    type Output = Cents;
    fn neg(self) -> Cents {
        Cents(-self.0)
    }
}

impl Sum for Cents {
    fn sum<I: Iterator<Item = Cents>>(iter: I) -> Cents {
        Cents(iter.map(|c| c.0).sum())
    }
}

/// Parse an amount cell as carriers write them: `1.234,56`, `1234.56`,
/// `47,50 €`, `1 234,56 EUR`. Blank cells and a lone dash parse to `None`.
pub fn parse_amount(raw: &str) -> Option<Cents> {
    let cleaned = clean_numeric(raw)?;
    let euros: f64 = cleaned.parse().ok()?;
    Some(Cents::from_euros(euros))
}

/// Parse a plain decimal number (e.g. a commission-rate column) with the
/// same German/English separator handling as [`parse_amount`].
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = clean_numeric(raw)?;
    cleaned.parse().ok()
}

fn clean_numeric(raw: &str) -> Option<String> {
    let s: String = raw
        .trim()
        .replace(' ', "")
        .replace('\u{a0}', "")
        .replace('€', "")
        .replace("EUR", "");
    if s.is_empty() || s == "-" {
        return None;
    }
    let s = if s.contains(',') && s.contains('.') {
        // German thousands + decimal comma
        s.replace('.', "").replace(',', ".")
    } else if s.contains(',') {
        s.replace(',', ".")
    } else {
        s
    };
    Some(s)
}

/// Divide with round-half-to-even, symmetric around zero. `d` must be > 0.
fn div_round_half_even(n: i128, d: i128) -> i128 {
    let neg = n < 0;
    let n_abs = if neg { -n } else { n };
    let q = n_abs / d;
    let r = n_abs % d;
    let q = match (2 * r).cmp(&d) {
        Ordering::Less => q,
        Ordering::Greater => q + 1,
        Ordering::Equal => {
            if q % 2 == 0 {
                q
            } else {
                q + 1
            }
        }
    };
    if neg {
        -q
    } else {
        q
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_amount_german() {
        assert_eq!(parse_amount("1.234,56"), Some(Cents(123_456)));
        assert_eq!(parse_amount("47,50"), Some(Cents(4_750)));
        assert_eq!(parse_amount("47,50 €"), Some(Cents(4_750)));
        assert_eq!(parse_amount("1 234,56 EUR"), Some(Cents(123_456)));
    }

    #[test]
    fn test_parse_amount_english() {
        assert_eq!(parse_amount("1234.56"), Some(Cents(123_456)));
        assert_eq!(parse_amount("-40.00"), Some(Cents(-4_000)));
    }

    #[test]
    fn test_parse_amount_blank() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("  "), None);
        assert_eq!(parse_amount("-"), None);
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn test_share_half_even() {
        // 0.125 EUR at 50% = 6.25 cents -> 6 (even)
        assert_eq!(Cents(13).share(50.0), Cents(6));
        // 0.135 EUR at 50% = 6.75 cents -> 7
        assert_eq!(Cents(15).share(50.0), Cents(8));
        assert_eq!(Cents(100_000).share(70.0), Cents(70_000));
        assert_eq!(Cents(-4_000).share(70.0), Cents(-2_800));
    }

    #[test]
    fn test_share_fractional_rate() {
        // 100.00 EUR at 33.33% = 33.33 EUR
        assert_eq!(Cents(10_000).share(33.33), Cents(3_333));
    }

    #[test]
    fn test_clamp_to_zero_and() {
        assert_eq!(Cents(80).clamp_to_zero_and(Cents(50)), Cents(50));
        assert_eq!(Cents(-10).clamp_to_zero_and(Cents(50)), Cents(0));
        assert_eq!(Cents(-80).clamp_to_zero_and(Cents(-50)), Cents(-50));
        assert_eq!(Cents(10).clamp_to_zero_and(Cents(-50)), Cents(0));
    }

    #[test]
    fn test_format_2dp() {
        assert_eq!(Cents(4_750).format_2dp(), "47.50");
        assert_eq!(Cents(-4_000).format_2dp(), "-40.00");
        assert_eq!(Cents(5).format_2dp(), "0.05");
        assert_eq!(Cents(-5).format_2dp(), "-0.05");
    }

    proptest! {
        #[test]
        fn prop_shares_sum_to_gross(amount in -10_000_000i64..10_000_000, rate in 0.0f64..100.0) {
            let gross = Cents(amount);
            let consultant = gross.share(rate);
            let house = gross - consultant;
            prop_assert_eq!(consultant + house, gross);
        }

        #[test]
        fn prop_share_magnitude_bounded(amount in -10_000_000i64..10_000_000, rate in 0.0f64..100.0) {
            let share = Cents(amount).share(rate);
            prop_assert!(share.0.abs() <= amount.abs());
        }
    }
}
