use std::sync::OnceLock;

use regex::Regex;

fn email_regex() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    // local@domain.tld, no whitespace, exactly one '@'
    EMAIL_RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"))
}

/// Permissive syntactic check. No DNS/MX lookup, no RFC 5322 parsing.
pub fn is_valid_email(candidate: &str) -> bool {
    !candidate.is_empty() && email_regex().is_match(candidate)
}

/// Split a comma-separated recipients field into trimmed, non-empty candidates.
pub fn split_manual(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
