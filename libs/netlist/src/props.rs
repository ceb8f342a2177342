//! Device property keys and values.
//!
//! Property keys are declared on a device cell, in order; each device
//! instance carries a value list aligned 1-to-1 with that key list.
//! Values parse from netlist text with the usual SPICE metric suffixes.

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

/// The type of a declared property.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum PropKind {
    /// A floating-point value.
    Double,
    /// An integer value.
    Integer,
    /// A string value.
    String,
}

/// The tolerance allowed when comparing two property values.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Slop {
    /// Relative tolerance for doubles.
    Double(f64),
    /// Absolute tolerance for integers, or prefix length for strings
    /// (0 = exact).
    Integer(i32),
}

/// A property key declared on a device cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyKey {
    /// The key name, matched case-insensitively.
    pub key: ArcStr,
    /// The declared value type.
    pub kind: PropKind,
    /// The comparison tolerance.
    pub slop: Slop,
}

/// One typed property value of a device instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// A floating-point value.
    Double(f64),
    /// An integer value.
    Integer(i32),
    /// A string value.
    Text(ArcStr),
}

/// The property payload of a device instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyData {
    /// Typed values, aligned with the model cell's key list.
    pub values: Vec<PropertyValue>,
    /// All key:value pairs as read, verbatim.
    pub raw: Vec<(ArcStr, ArcStr)>,
}

/// Parses a numeric string with an optional SPICE metric suffix.
///
/// Suffixes are case-insensitive: `g`, `k`, `c`, `m` (milli), `meg`
/// (mega), `u`, `n`, `p`, `f`, `a`. An unknown suffix is ignored and the
/// mantissa returned. Returns `None` if no leading number can be parsed.
pub fn parse_si_float(s: &str) -> Option<f64> {
    let s = s.trim();
    let end = numeric_prefix_len(s);
    if end == 0 {
        return None;
    }
    let mantissa: f64 = s[..end].parse().ok()?;
    let suffix = s[end..].trim_start();
    let scale = match suffix.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('g') => 1.0e9,
        Some('k') => 1.0e3,
        Some('c') => 1.0e-2,
        Some('m') => {
            if suffix.len() >= 3 && suffix[..3].eq_ignore_ascii_case("meg") {
                1.0e6
            } else {
                1.0e-3
            }
        }
        Some('u') => 1.0e-6,
        Some('n') => 1.0e-9,
        Some('p') => 1.0e-12,
        Some('f') => 1.0e-15,
        Some('a') => 1.0e-18,
        _ => 1.0,
    };
    Some(mantissa * scale)
}

/// Returns `true` if the string parses as a number with an optional
/// metric suffix.
pub fn string_is_value(s: &str) -> bool {
    let s = s.trim();
    let end = numeric_prefix_len(s);
    if end == 0 || s[..end].parse::<f64>().is_err() {
        return false;
    }
    matches!(
        s[end..].trim_start().chars().next().map(|c| c.to_ascii_lowercase()),
        None | Some('g' | 'k' | 'c' | 'm' | 'u' | 'n' | 'p' | 'f' | 'a')
    )
}

fn numeric_prefix_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let start = i;
    let mut seen_dot = false;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => i += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                i += 1;
            }
            b'e' | b'E' => {
                // Exponent only counts if followed by digits.
                let mut j = i + 1;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                if j < bytes.len() && bytes[j].is_ascii_digit() {
                    i = j;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                break;
            }
            _ => break,
        }
    }
    if i == start {
        0
    } else {
        i
    }
}

/// Builds the typed value list for one device instance.
///
/// Each declared key is looked up (case-insensitively) among the raw
/// pairs and parsed per its declared type; missing keys yield zero/empty
/// values and are appended to `missing`. All raw pairs are retained in
/// the sidecar untouched.
pub fn align_values(
    keys: &[PropertyKey],
    pairs: &[(ArcStr, ArcStr)],
    missing: &mut Vec<ArcStr>,
) -> PropertyData {
    let mut values = Vec::with_capacity(keys.len());
    for key in keys {
        let found = pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key.key))
            .map(|(_, v)| v);
        let value = match (key.kind, found) {
            (PropKind::Double, Some(v)) => PropertyValue::Double(parse_si_float(v).unwrap_or(0.0)),
            (PropKind::Integer, Some(v)) => {
                PropertyValue::Integer(v.trim().parse().unwrap_or_else(|_| {
                    parse_si_float(v).map(|f| f as i32).unwrap_or(0)
                }))
            }
            (PropKind::String, Some(v)) => PropertyValue::Text(v.clone()),
            (kind, None) => {
                missing.push(key.key.clone());
                match kind {
                    PropKind::Double => PropertyValue::Double(0.0),
                    PropKind::Integer => PropertyValue::Integer(0),
                    PropKind::String => PropertyValue::Text(ArcStr::new()),
                }
            }
        };
        values.push(value);
    }
    PropertyData {
        values,
        raw: pairs.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_suffixes() {
        assert_eq!(parse_si_float("1meg"), Some(1.0e6));
        assert_eq!(parse_si_float("1m"), Some(1.0e-3));
        assert_eq!(parse_si_float("10u"), Some(1.0e-5));
        assert_eq!(parse_si_float("2.5p"), Some(2.5e-12));
        assert_eq!(parse_si_float("3k"), Some(3.0e3));
        assert_eq!(parse_si_float("1.5"), Some(1.5));
        // Unknown suffix: mantissa kept, suffix ignored.
        assert_eq!(parse_si_float("4x"), Some(4.0));
        assert_eq!(parse_si_float("volts"), None);
    }

    #[test]
    fn value_detection() {
        assert!(string_is_value("10k"));
        assert!(string_is_value("2.5e-9"));
        assert!(string_is_value("-3.3"));
        assert!(!string_is_value("rmodel"));
        assert!(!string_is_value(""));
    }

    #[test]
    fn align_missing_key_defaults_to_zero() {
        let keys = vec![
            PropertyKey {
                key: "length".into(),
                kind: PropKind::Double,
                slop: Slop::Double(0.01),
            },
            PropertyKey {
                key: "width".into(),
                kind: PropKind::Double,
                slop: Slop::Double(0.01),
            },
        ];
        let pairs = vec![(ArcStr::from("W"), ArcStr::from("2u"))];
        let mut missing = Vec::new();
        let data = align_values(&keys, &pairs, &mut missing);
        assert_eq!(data.values[0], PropertyValue::Double(0.0));
        assert_eq!(data.values[1], PropertyValue::Double(2.0e-6));
        assert_eq!(missing, vec![ArcStr::from("length")]);
        assert_eq!(data.raw.len(), 1);
    }
}
