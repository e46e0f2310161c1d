//! Candidate scanning and deduplication.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::info;

use super::validate::is_valid_address;

/// Email-shaped tokens.
///
/// Looser than a real address grammar on purpose: the domain side may carry
/// stray `@` characters so tokens like `bad-email@@x` are captured and later
/// reported as invalid instead of vanishing. A token always ends on an ASCII
/// alphanumeric, which keeps trailing punctuation out.
static CANDIDATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9._%+\-@]*[A-Za-z0-9]")
        .expect("candidate pattern is valid")
});

/// An address that passed validation.
///
/// Keeps the casing it was first seen with for display; comparisons use the
/// lower-cased key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct ValidatedAddress {
    display: String,
    key: String,
}

impl ValidatedAddress {
    /// Validate a single address outside of a text scan.
    pub fn parse(address: &str) -> Option<Self> {
        let address = address.trim();
        is_valid_address(address).then(|| Self::new_unchecked(address))
    }

    fn new_unchecked(address: &str) -> Self {
        Self {
            display: address.to_string(),
            key: address.to_lowercase(),
        }
    }

    /// Address as first written.
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// Lower-cased comparison key.
    pub fn normalized(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ValidatedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl AsRef<str> for ValidatedAddress {
    fn as_ref(&self) -> &str {
        &self.display
    }
}

impl From<ValidatedAddress> for String {
    fn from(address: ValidatedAddress) -> Self {
        address.display
    }
}

/// Result of scanning one block of text.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    /// Valid addresses in order of first occurrence
    pub valid: Vec<ValidatedAddress>,
    /// Candidates that failed validation, in order of first occurrence
    pub invalid: Vec<String>,
    /// Candidates dropped because an earlier one matched case-insensitively
    pub duplicate_count: usize,
}

impl Extraction {
    /// Number of candidates the scan produced before deduplication.
    pub fn candidate_count(&self) -> usize {
        self.valid.len() + self.invalid.len() + self.duplicate_count
    }
}

/// Extract, deduplicate and classify every email-like token in `text`.
///
/// Never fails; empty or address-free input yields an empty [`Extraction`].
pub fn extract(text: &str) -> Extraction {
    let mut extraction = Extraction::default();
    if text.trim().is_empty() {
        return extraction;
    }

    let mut seen: HashSet<String> = HashSet::new();

    for candidate in CANDIDATE_PATTERN.find_iter(text).map(|m| m.as_str()) {
        if !seen.insert(candidate.to_lowercase()) {
            extraction.duplicate_count += 1;
            continue;
        }

        if is_valid_address(candidate) {
            extraction.valid.push(ValidatedAddress::new_unchecked(candidate));
        } else {
            extraction.invalid.push(candidate.to_string());
        }
    }

    info!(
        text_length = text.len(),
        candidates = extraction.candidate_count(),
        valid = extraction.valid.len(),
        invalid = extraction.invalid.len(),
        duplicates = extraction.duplicate_count,
        "addresses_extracted"
    );

    extraction
}

/// Render a numbered list for display, truncated after `max_display` entries.
pub fn format_address_list<T: AsRef<str>>(addresses: &[T], max_display: usize) -> String {
    if addresses.is_empty() {
        return "No emails found".to_string();
    }

    let listed = addresses
        .iter()
        .take(max_display)
        .enumerate()
        .map(|(i, address)| format!("{}. {}", i + 1, address.as_ref()))
        .collect::<Vec<_>>()
        .join("\n");

    if addresses.len() <= max_display {
        listed
    } else {
        format!(
            "{}\n\n... and {} more",
            listed,
            addresses.len() - max_display
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn displays(extraction: &Extraction) -> Vec<&str> {
        extraction.valid.iter().map(|a| a.as_str()).collect()
    }

    #[test]
    fn test_case_insensitive_dedup_and_invalid() {
        let result = extract("contact a@x.com, A@X.COM, and bad-email@@x");

        assert_eq!(displays(&result), vec!["a@x.com"]);
        assert_eq!(result.invalid, vec!["bad-email@@x".to_string()]);
        assert_eq!(result.duplicate_count, 1);
        assert_eq!(result.candidate_count(), 3);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(extract(""), Extraction::default());
        assert_eq!(extract("   \n\t "), Extraction::default());
        assert_eq!(extract("no addresses in here"), Extraction::default());
    }

    #[test]
    fn test_embedded_in_prose() {
        let text = r#"
            Hey, contact me at john.doe@example.com for more info.
            You can also reach Jane at jane_smith@company.co.uk
            or try the support team: support@startup.io.
            WhatsApp: "Email me at mobile.user@gmail.com"
        "#;

        let result = extract(text);

        assert_eq!(
            displays(&result),
            vec![
                "john.doe@example.com",
                "jane_smith@company.co.uk",
                "support@startup.io",
                "mobile.user@gmail.com",
            ]
        );
        assert!(result.invalid.is_empty());
    }

    #[test]
    fn test_first_casing_and_order_kept() {
        let text = "Admin@Company.com\njohn@startup.io\nadmin@company.com\nADMIN@COMPANY.COM";
        let result = extract(text);

        assert_eq!(displays(&result), vec!["Admin@Company.com", "john@startup.io"]);
        assert_eq!(result.duplicate_count, 2);
        assert_eq!(result.valid[0].normalized(), "admin@company.com");
    }

    #[test]
    fn test_mixed_valid_and_invalid() {
        let text = "valid@email.com\ninvalid@email\nnot-an-email\nsome..dots@test.io\n@invalid.com";
        let result = extract(text);

        assert_eq!(displays(&result), vec!["valid@email.com"]);
        // "@invalid.com" has no local part and is not a candidate at all
        assert_eq!(
            result.invalid,
            vec!["invalid@email".to_string(), "some..dots@test.io".to_string()]
        );
    }

    #[test]
    fn test_counts_add_up_to_raw_matches() {
        let text = "a@b.co a@b.co x@@y b@c.org B@C.ORG c@d";
        let raw = CANDIDATE_PATTERN.find_iter(text).count();
        let result = extract(text);

        assert_eq!(result.candidate_count(), raw);
        for address in &result.valid {
            assert!(is_valid_address(address.as_str()));
        }
    }

    #[test]
    fn test_idempotent() {
        let text = "one@a.com, two@b.org; ONE@A.COM and broken@@c";
        assert_eq!(extract(text), extract(text));
    }

    #[test]
    fn test_validated_address_parse() {
        let address = ValidatedAddress::parse("  Jane@Example.com ").unwrap();
        assert_eq!(address.as_str(), "Jane@Example.com");
        assert_eq!(address.normalized(), "jane@example.com");
        assert!(ValidatedAddress::parse("jane@@example.com").is_none());
    }

    #[test]
    fn test_serializes_as_display_string() {
        let address = ValidatedAddress::parse("Jane@Example.com").unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, r#""Jane@Example.com""#);
    }

    #[test]
    fn test_format_address_list() {
        assert_eq!(format_address_list::<&str>(&[], 5), "No emails found");
        assert_eq!(
            format_address_list(&["a@b.com", "c@d.com"], 5),
            "1. a@b.com\n2. c@d.com"
        );
        assert_eq!(
            format_address_list(&["a@b.com", "c@d.com", "e@f.com"], 1),
            "1. a@b.com\n\n... and 2 more"
        );
    }
}
