//! Currency helpers for Argentine pesos.
//!
//! Amounts travel as `f64` (the PHP backend returns plain JSON numbers or
//! numeric strings). Everything shown to the cashier goes through
//! [`format_ars`], which mirrors `Intl.NumberFormat('es-AR')`: `.` for
//! thousands, `,` for decimals, always two decimals.

/// Currency symbol used when no store configuration overrides it.
pub const DEFAULT_SYMBOL: &str = "$";

/// Tolerance used when comparing money values that went through `f64`.
pub const EPSILON: f64 = 0.005;

/// Relative nudge applied before rounding, so that decimal halves stored
/// just below .5 (`1.005 * 100.0 == 100.49999999999999`) round up.
const HALF_CENT_NUDGE: f64 = 1e-12;

fn rounded_cents(value: f64) -> f64 {
    let scaled = value * 100.0;
    (scaled + scaled.signum() * scaled.abs().max(1.0) * HALF_CENT_NUDGE).round()
}

/// Round to cents, half away from zero.
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    rounded_cents(value) / 100.0
}

/// Convert an amount to whole cents. Non-finite values become zero.
pub fn to_cents(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    rounded_cents(value) as i64
}

/// Group an unsigned integer with `.` every three digits.
fn group_thousands(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut groups: Vec<String> = Vec::new();
    while n > 0 {
        let chunk = n % 1000;
        n /= 1000;
        if n > 0 {
            groups.push(format!("{chunk:03}"));
        } else {
            groups.push(chunk.to_string());
        }
    }
    groups.reverse();
    groups.join(".")
}

/// Format with an explicit currency symbol, e.g. `$ 1.234,56`.
pub fn format_with_symbol(value: f64, symbol: &str) -> String {
    let cents = to_cents(value);
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let int_part = group_thousands(abs / 100);
    let frac = abs % 100;
    if symbol.is_empty() {
        format!("{sign}{int_part},{frac:02}")
    } else {
        format!("{sign}{symbol} {int_part},{frac:02}")
    }
}

/// Format an amount as ARS: `$ 1.234,56`, `-$ 50,00`.
pub fn format_ars(value: f64) -> String {
    format_with_symbol(value, DEFAULT_SYMBOL)
}

/// Format a plain number with two decimals and no symbol: `1.234,56`.
pub fn format_number(value: f64) -> String {
    format_with_symbol(value, "")
}

/// Parse a user- or backend-supplied amount.
///
/// Accepts `$ 1.234,56`, `1234,56`, `1234.56`, `1.234` (thousands) and
/// `-$ 10,00`. Returns `None` for anything that is not a number.
pub fn parse_ars(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let negative = trimmed.starts_with('-') || trimmed.ends_with('-');
    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = if cleaned.contains(',') {
        // es-AR: comma is the decimal separator, dots group thousands.
        if cleaned.matches(',').count() > 1 {
            return None;
        }
        cleaned.replace('.', "").replace(',', ".")
    } else {
        let dots = cleaned.matches('.').count();
        match dots {
            0 => cleaned,
            1 => {
                let decimals = cleaned.len() - cleaned.find('.').map(|i| i + 1).unwrap_or(0);
                if decimals == 3 {
                    // "1.234" reads as one thousand two hundred thirty-four.
                    cleaned.replace('.', "")
                } else {
                    cleaned
                }
            }
            _ => cleaned.replace('.', ""),
        }
    };

    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Relative change between two periods, in percent.
///
/// Returns `None` when the previous value is zero; the caller decides how
/// to present "no baseline".
pub fn percent_change(current: f64, previous: f64) -> Option<f64> {
    if previous.abs() < EPSILON {
        return None;
    }
    Some(round2((current - previous) / previous.abs() * 100.0))
}

/// Share of `part` over `total` in percent, zero when `total` is zero.
pub fn percent_of(part: f64, total: f64) -> f64 {
    if total.abs() < EPSILON {
        return 0.0;
    }
    part / total * 100.0
}

/// Equality within half a cent.
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}
