use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;

pub const MILLISECOND: u64 = 1;
pub const SECOND: u64 = 1_000;
pub const MINUTE: u64 = 60 * SECOND;
pub const HOUR: u64 = 60 * MINUTE;
pub const DAY: u64 = 24 * HOUR;
pub const WEEK: u64 = 7 * DAY;
/// Mean Gregorian year (365.25 days).
pub const YEAR: u64 = 31_557_600_000;

/// Bounds on a parsed duration, in milliseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct DurationBounds {
    pub min: Option<u64>,
    pub max: Option<u64>,
    pub exclusive_min: Option<u64>,
    pub exclusive_max: Option<u64>,
}

impl DurationBounds {
    pub fn inclusive(min: u64, max: u64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Default::default()
        }
    }
}

static COMPONENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*([a-zA-Z]+)?\s*").unwrap());

/// Parse a duration value to milliseconds.
///
/// Numbers are scaled by `default_unit_ms`. Strings are a sequence of
/// `<integer> [unit]` components summed together ("1 min 5 secs" = 65000);
/// a component without a unit uses the default unit. Plural unit names are
/// accepted, but the literal token "ms" is never read as plural minutes.
pub fn parse_millis(value: &Value, default_unit_ms: u64, bounds: &DurationBounds) -> Result<u64> {
    let total = match value {
        Value::Number(n) => {
            let raw = n
                .as_f64()
                .with_context(|| format!("duration is not a valid number: {n}"))?;
            if !raw.is_finite() || raw < 0.0 {
                bail!("duration must be a non-negative number, got {raw}");
            }
            (raw * default_unit_ms as f64).round() as u64
        }
        Value::String(s) => parse_components(s, default_unit_ms)?,
        other => bail!("duration must be a number or string, got {other:?}"),
    };

    check_bounds(total, bounds)?;

    Ok(total)
}

fn parse_components(input: &str, default_unit_ms: u64) -> Result<u64> {
    if input.trim().is_empty() {
        bail!("duration string is empty");
    }

    let mut total: u64 = 0;
    let mut rest = input;

    while !rest.is_empty() {
        let caps = COMPONENT
            .captures(rest)
            .with_context(|| format!("invalid duration string: {input:?}"))?;

        let count: u64 = caps[1]
            .parse()
            .with_context(|| format!("duration component too large in {input:?}"))?;

        let unit_ms = match caps.get(2) {
            Some(unit) => unit_millis(unit.as_str())
                .with_context(|| format!("invalid duration string: {input:?}"))?,
            None => default_unit_ms,
        };

        total = total
            .checked_add(count.checked_mul(unit_ms).with_context(|| {
                format!("duration overflows in {input:?}")
            })?)
            .with_context(|| format!("duration overflows in {input:?}"))?;

        rest = &rest[caps.get(0).map(|m| m.end()).unwrap_or(rest.len())..];
    }

    Ok(total)
}

/// Milliseconds per unit token, case-insensitive, plural tolerated.
fn unit_millis(token: &str) -> Result<u64> {
    let lower = token.to_ascii_lowercase();

    let known = |t: &str| -> Option<u64> {
        match t {
            "ms" | "msec" | "millisecond" => Some(MILLISECOND),
            "s" | "sec" | "second" => Some(SECOND),
            "m" | "min" | "minute" => Some(MINUTE),
            "h" | "hr" | "hour" => Some(HOUR),
            "d" | "day" => Some(DAY),
            "w" | "wk" | "week" => Some(WEEK),
            "y" | "yr" | "year" => Some(YEAR),
            _ => None,
        }
    };

    if let Some(ms) = known(&lower) {
        return Ok(ms);
    }

    // Plural form, except "ms" which already matched above.
    if let Some(stripped) = lower.strip_suffix('s') {
        if !stripped.is_empty() {
            if let Some(ms) = known(stripped) {
                return Ok(ms);
            }
        }
    }

    bail!("unknown duration unit: {token:?}")
}

fn check_bounds(total: u64, bounds: &DurationBounds) -> Result<()> {
    if let Some(min) = bounds.min {
        if total < min {
            bail!("duration {total}ms is below the minimum of {min}ms");
        }
    }
    if let Some(min) = bounds.exclusive_min {
        if total <= min {
            bail!("duration {total}ms must be greater than {min}ms");
        }
    }
    if let Some(max) = bounds.max {
        if total > max {
            bail!("duration {total}ms is above the maximum of {max}ms");
        }
    }
    if let Some(max) = bounds.exclusive_max {
        if total >= max {
            bail!("duration {total}ms must be less than {max}ms");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: Value, default_unit: u64) -> Result<u64> {
        parse_millis(&value, default_unit, &DurationBounds::default())
    }

    #[test]
    fn test_bare_number_scaled_by_default_unit() {
        assert_eq!(parse(Value::from(45), SECOND).unwrap(), 45_000);
        assert_eq!(parse(Value::from(250), MILLISECOND).unwrap(), 250);
    }

    #[test]
    fn test_multi_component_string() {
        assert_eq!(parse(Value::from("1 min 5 secs"), SECOND).unwrap(), 65_000);
        assert_eq!(parse(Value::from("2h30m"), SECOND).unwrap(), 9_000_000);
        assert_eq!(parse(Value::from("1 day"), SECOND).unwrap(), 86_400_000);
    }

    #[test]
    fn test_unitless_component_uses_default_unit() {
        assert_eq!(parse(Value::from("45"), SECOND).unwrap(), 45_000);
        assert_eq!(parse(Value::from("1m 30"), SECOND).unwrap(), 90_000);
    }

    #[test]
    fn test_ms_is_never_plural_minutes() {
        assert_eq!(parse(Value::from("500ms"), SECOND).unwrap(), 500);
        // "mins" is plural minutes, "ms" stays milliseconds.
        assert_eq!(parse(Value::from("2 mins"), SECOND).unwrap(), 120_000);
    }

    #[test]
    fn test_plural_and_case_insensitive_units() {
        assert_eq!(parse(Value::from("3 Hours"), SECOND).unwrap(), 10_800_000);
        assert_eq!(parse(Value::from("2 WEEKS"), SECOND).unwrap(), 1_209_600_000);
        assert_eq!(parse(Value::from("1 yr"), SECOND).unwrap(), YEAR);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse(Value::from("soon"), SECOND).is_err());
        assert!(parse(Value::from("5 fortnights"), SECOND).is_err());
        assert!(parse(Value::from(""), SECOND).is_err());
        assert!(parse(Value::Bool(true), SECOND).is_err());
    }

    #[test]
    fn test_rejects_negative_number() {
        assert!(parse(Value::from(-1), SECOND).is_err());
    }

    #[test]
    fn test_inclusive_bounds() {
        let bounds = DurationBounds::inclusive(SECOND, 10 * SECOND);
        assert_eq!(
            parse_millis(&Value::from("1s"), SECOND, &bounds).unwrap(),
            1_000
        );
        assert_eq!(
            parse_millis(&Value::from("10s"), SECOND, &bounds).unwrap(),
            10_000
        );

        let err = parse_millis(&Value::from("999ms"), SECOND, &bounds).unwrap_err();
        assert!(err.to_string().contains("below the minimum"));

        let err = parse_millis(&Value::from("11s"), SECOND, &bounds).unwrap_err();
        assert!(err.to_string().contains("above the maximum"));
    }

    #[test]
    fn test_exclusive_bounds() {
        let bounds = DurationBounds {
            exclusive_min: Some(0),
            exclusive_max: Some(60_000),
            ..Default::default()
        };

        let err = parse_millis(&Value::from(0), MILLISECOND, &bounds).unwrap_err();
        assert!(err.to_string().contains("greater than"));

        let err = parse_millis(&Value::from("1m"), SECOND, &bounds).unwrap_err();
        assert!(err.to_string().contains("less than"));

        assert!(parse_millis(&Value::from("59s"), SECOND, &bounds).is_ok());
    }
}
