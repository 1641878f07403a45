//! Normalization helpers shared by candidate selection and scoring.

/// Canonical digits-only form of a phone number.
///
/// `+254 712-345 678`, `0712345678` and `254712345678` all normalize to
/// `254712345678` when `country_code` is `254`. Returns `None` when no digits
/// remain.
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let normalized = if let Some(international) = digits.strip_prefix("00") {
        international.to_string()
    } else if let Some(national) = digits.strip_prefix('0') {
        format!("{}{}", country_code, national)
    } else {
        digits
    };

    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Trimmed, lowercased reference. `None` for blank input.
pub fn fold_reference(raw: &str) -> Option<String> {
    let folded = raw.trim().to_lowercase();
    if folded.is_empty() {
        None
    } else {
        Some(folded)
    }
}
