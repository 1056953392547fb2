//! Posted salary text to a numeric range: `"$150k-200k"`, `"Up to $200k"`, `"$150,000+"`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const AMOUNT: &str = r"(\d+(?:\.\d+)?)(k?)";

static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{AMOUNT}\s*[-–]\s*{AMOUNT}")).expect("salary range pattern")
});
static UP_TO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"up\s+to\s+{AMOUNT}")).expect("salary cap pattern"));
static AT_LEAST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"{AMOUNT}\s*\+")).expect("salary floor pattern"));
static SINGLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(AMOUNT).expect("salary pattern"));

/// Bounds in whole currency units. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl SalaryRange {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Best-effort parse; text without a number ("Competitive") yields an empty range.
///
/// A `k` on either bound of a range scales both, so `"150-200k"` reads as 150000-200000.
pub fn parse_salary(text: &str) -> SalaryRange {
    let text = text.trim().to_lowercase().replace(['$', ','], "");

    if let Some(caps) = RANGE.captures(&text) {
        let thousands = !caps[2].is_empty() || !caps[4].is_empty();
        return SalaryRange {
            min: amount(&caps[1], thousands),
            max: amount(&caps[3], thousands),
        };
    }
    if let Some(caps) = UP_TO.captures(&text) {
        return SalaryRange {
            min: None,
            max: amount(&caps[1], !caps[2].is_empty()),
        };
    }
    if let Some(caps) = AT_LEAST.captures(&text) {
        return SalaryRange {
            min: amount(&caps[1], !caps[2].is_empty()),
            max: None,
        };
    }
    if let Some(caps) = SINGLE.captures(&text) {
        let value = amount(&caps[1], !caps[2].is_empty());
        return SalaryRange { min: value, max: value };
    }
    SalaryRange::default()
}

fn amount(digits: &str, thousands: bool) -> Option<i64> {
    let value: f64 = digits.parse().ok()?;
    let value = if thousands { value * 1000.0 } else { value };
    Some(value.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: Option<i64>, max: Option<i64>) -> SalaryRange {
        SalaryRange { min, max }
    }

    #[test]
    fn ranges_with_and_without_thousands_suffix() {
        assert_eq!(parse_salary("$150k-200k"), range(Some(150_000), Some(200_000)));
        assert_eq!(parse_salary("$150k - $200k"), range(Some(150_000), Some(200_000)));
        assert_eq!(parse_salary("150-200K"), range(Some(150_000), Some(200_000)));
        assert_eq!(
            parse_salary("$150,000-$200,000"),
            range(Some(150_000), Some(200_000))
        );
    }

    #[test]
    fn open_ended_and_single_values() {
        assert_eq!(parse_salary("Up to $200k"), range(None, Some(200_000)));
        assert_eq!(parse_salary("$150k+"), range(Some(150_000), None));
        assert_eq!(parse_salary("$95.5k"), range(Some(95_500), Some(95_500)));
    }

    #[test]
    fn text_without_numbers_is_empty() {
        assert!(parse_salary("Competitive").is_empty());
        assert!(parse_salary("   ").is_empty());
    }
}
