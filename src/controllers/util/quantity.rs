//! Minimal `resource.Quantity` numeric parsing, used only to compare
//! parent/child dependence ratios (spec.md §3's dependence invariant).
//!
//! Grounded on the magnitude-comparison performed by
//! `original_source/pkg/api/v1alpha1/machine_webhook.go`'s `ValidateDependence`,
//! which calls Go's `resource.Quantity.Value()` on each side. We parse into an
//! `f64` magnitude instead of an int64 `Value()`, since the suffix table (Ki,
//! Mi, m, ...) is all this crate needs and floating compare with an epsilon is
//! simpler than replicating `Value()`'s rounding rules.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const EPSILON: f64 = 1e-6;

/// Parses a quantity string like `"8Gi"`, `"500m"`, or `"2"` into its
/// numeric magnitude.
pub fn as_f64(q: &Quantity) -> Result<f64, String> {
    let s = q.0.trim();
    let (number, suffix) = split_numeric_suffix(s);
    let base: f64 = number.parse().map_err(|_| format!("invalid quantity {s:?}"))?;
    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" | "K" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        other => return Err(format!("unknown quantity suffix {other:?} in {s:?}")),
    };
    Ok(base * multiplier)
}

fn split_numeric_suffix(s: &str) -> (&str, &str) {
    let split_at = s.find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+')).unwrap_or(s.len());
    s.split_at(split_at)
}

/// True if `parent * ratio == child`, within a small epsilon.
pub fn ratio_matches(parent: &Quantity, child: &Quantity, ratio: f64) -> Result<bool, String> {
    let parent = as_f64(parent)?;
    let child = as_f64(child)?;
    let expected = parent * ratio;
    Ok((expected - child).abs() <= EPSILON * expected.abs().max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_suffix() {
        assert_eq!(as_f64(&Quantity("8Gi".into())).unwrap(), 8.0 * 1024f64.powi(3));
    }

    #[test]
    fn parses_milli_cpu() {
        assert_eq!(as_f64(&Quantity("500m".into())).unwrap(), 0.5);
    }

    #[test]
    fn parses_plain_integer() {
        assert_eq!(as_f64(&Quantity("2".into())).unwrap(), 2.0);
    }

    #[test]
    fn ratio_matches_exact_half() {
        assert!(ratio_matches(&Quantity("4".into()), &Quantity("2".into()), 0.5).unwrap());
    }

    #[test]
    fn ratio_rejects_mismatch() {
        assert!(!ratio_matches(&Quantity("4".into()), &Quantity("3".into()), 0.5).unwrap());
    }
}
