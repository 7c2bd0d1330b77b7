//! Named value transforms
//!
//! Pure, total string transforms referenced by name from inheritance
//! rules and computed dependency edges. Unknown names are a configuration
//! mistake; callers log and skip.

use crate::normalize;

/// Apply a named transform. Returns `None` for unknown names.
pub fn apply(name: &str, value: &str) -> Option<String> {
    match name {
        "identity" => Some(value.to_string()),
        "trim" => Some(normalize::collapse_whitespace(value)),
        "lowercase" => Some(value.to_lowercase()),
        "uppercase" => Some(value.to_uppercase()),
        // 11-digit mainland form; passes unparseable input through
        // unchanged so the transform stays total.
        "normalize_phone" => {
            Some(normalize::normalize_phone(value).unwrap_or_else(|| value.to_string()))
        },
        // "北京" -> "北京市"; already-suffixed input is left alone.
        "city_suffix" => {
            let trimmed = value.trim();
            if trimmed.ends_with('市') || trimmed.is_empty() {
                Some(trimmed.to_string())
            } else {
                Some(format!("{trimmed}市"))
            }
        },
        // Title-case latin-script person names.
        "title_case" => Some(
            value
                .split_whitespace()
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => {
                            first.to_uppercase().collect::<String>() + chars.as_str().to_lowercase().as_str()
                        },
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ => None,
    }
}

pub fn is_known(name: &str) -> bool {
    apply(name, "").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_city_suffix() {
        assert_eq!(apply("city_suffix", "北京").unwrap(), "北京市");
        assert_eq!(apply("city_suffix", "北京市").unwrap(), "北京市");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(apply("title_case", "zhang SAN").unwrap(), "Zhang San");
    }

    #[test]
    fn test_phone_transform_total() {
        assert_eq!(apply("normalize_phone", "+86 13800138000").unwrap(), "13800138000");
        // Unparseable input passes through.
        assert_eq!(apply("normalize_phone", "no-phone").unwrap(), "no-phone");
    }

    #[test]
    fn test_unknown_transform() {
        assert!(apply("reverse_polarity", "x").is_none());
        assert!(!is_known("reverse_polarity"));
        assert!(is_known("identity"));
    }

    #[test]
    fn test_transforms_idempotent() {
        for name in ["trim", "lowercase", "city_suffix", "normalize_phone", "title_case"] {
            let once = apply(name, " Zhang san ").unwrap();
            let twice = apply(name, &once).unwrap();
            assert_eq!(once, twice, "transform {name} is not idempotent");
        }
    }
}
