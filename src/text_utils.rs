/*!
 * Text hygiene for translatable items.
 *
 * Decides which source strings are not worth sending to a provider and
 * normalizes what comes back.
 */

use once_cell::sync::Lazy;
use regex::Regex;

/// `$variable`
static VARIABLE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$\w+$").unwrap());

/// `{{placeholder}}`
static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\{\{.*\}\}$").unwrap());

/// `function()`
static CALL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+\(\)$").unwrap());

/// Punctuation and symbols only
static SYMBOLS_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\w\s]+$").unwrap());

/// Whether a source text should bypass the provider
///
/// Skipped items are counted as processed by a task but left untouched.
pub fn should_skip_translation(text: &str) -> bool {
    let text = text.trim();

    if text.chars().count() < 2 {
        return true;
    }

    if VARIABLE_REGEX.is_match(text) || PLACEHOLDER_REGEX.is_match(text) || CALL_REGEX.is_match(text) {
        return true;
    }

    if text.chars().all(|c| c.is_numeric()) {
        return true;
    }

    SYMBOLS_REGEX.is_match(text)
}

/// Trim a provider result and drop one pair of wrapping quotes
pub fn clean_translation(text: &str) -> String {
    let mut cleaned = text.trim();

    for quote in ['"', '\''] {
        if cleaned.len() >= 2 && cleaned.starts_with(quote) && cleaned.ends_with(quote) {
            cleaned = &cleaned[1..cleaned.len() - 1];
        }
    }

    cleaned.to_string()
}
