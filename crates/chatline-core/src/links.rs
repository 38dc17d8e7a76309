//! Link extraction from chat text
//!
//! Two pattern classes are recognised: fully-qualified URLs (scheme or
//! `www.` prefixed) and bare `label.tld` domains. A bare domain that is
//! already part of a matched URL is not reported again.

use std::sync::LazyLock;

use regex::Regex;

/// Scheme- or `www.`-prefixed URLs, up to the first whitespace or delimiter.
static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"{}|\\^`\[\]]+"#)
        .expect("URL regex should compile")
});

/// Bare `label.tld` tokens with an alphabetic suffix of at least two letters.
static DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9](?:[a-z0-9\-]*[a-z0-9])?\.[a-z]{2,}\b")
        .expect("domain regex should compile")
});

/// Find candidate links in `text`.
///
/// URLs come first in order of appearance, followed by bare domains not
/// covered by any URL. Each candidate appears once.
pub fn find_links(text: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();

    for m in URL_REGEX.find_iter(text) {
        let url = m.as_str();
        if !links.iter().any(|l| l == url) {
            links.push(url.to_string());
        }
    }

    let url_count = links.len();
    for m in DOMAIN_REGEX.find_iter(text) {
        let domain = m.as_str();
        let covered = links[..url_count].iter().any(|url| url.contains(domain));
        if !covered && !links.iter().any(|l| l == domain) {
            links.push(domain.to_string());
        }
    }

    links
}
