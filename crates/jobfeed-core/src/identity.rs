//! Identity keys used for deduplication.
//!
//! Both keys are SHA-256 hex digests with no salt, so they are stable across processes and
//! safe to persist as lookup indexes.

use sha2::{Digest, Sha256};

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Exact-URL key. Only surrounding whitespace is trimmed; case, trailing slashes and query
/// strings are part of the identity.
pub fn compute_url_key(url: &str) -> String {
    sha256_hex(url.trim().as_bytes())
}

/// Company + title key used to spot the same posting on different platforms.
///
/// The two normalized parts are concatenated without a separator, so `("Acme", "Engineer")`
/// and `("Acme E", "ngineer")` produce the same key.
pub fn compute_fuzzy_key(company: &str, title: &str) -> String {
    let key = format!(
        "{}{}",
        company.trim().to_lowercase(),
        title.trim().to_lowercase()
    );
    sha256_hex(key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_key_is_stable_sha256() {
        assert_eq!(
            compute_url_key("hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(compute_url_key("  hello world\n"), compute_url_key("hello world"));
    }

    #[test]
    fn url_key_does_not_normalize_case_or_slashes() {
        let base = compute_url_key("https://jobs.lever.co/acme/1");
        assert_ne!(base, compute_url_key("https://jobs.lever.co/acme/1/"));
        assert_ne!(base, compute_url_key("HTTPS://jobs.lever.co/acme/1"));
        assert_ne!(base, compute_url_key("https://jobs.lever.co/acme/1?utm_source=x"));
    }

    #[test]
    fn fuzzy_key_ignores_case_and_outer_whitespace() {
        assert_eq!(
            compute_fuzzy_key("Acme", "AI Engineer"),
            compute_fuzzy_key("  ACME ", "ai engineer  ")
        );
        assert_ne!(
            compute_fuzzy_key("Acme", "AI Engineer"),
            compute_fuzzy_key("Acme", "ML Engineer")
        );
    }

    #[test]
    fn fuzzy_key_has_no_field_separator() {
        assert_eq!(
            compute_fuzzy_key("Acme", "Engineer"),
            compute_fuzzy_key("Acme E", "ngineer")
        );
    }
}
