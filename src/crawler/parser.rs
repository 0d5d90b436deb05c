//! Gemtext link extraction
//!
//! A link line starts with `=>` at the beginning of a line, followed by the
//! target and an optional label:
//!
//! ```text
//! => gemini://example.org/ Example
//! => /docs/	Documentation
//! => relative.gmi
//! ```

use crate::url::normalize;
use ::url::Url;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Link lines considered per page; the rest of an oversized page is ignored
pub const MAX_LINKS_PER_PAGE: usize = 500;

#[allow(clippy::unwrap_used)]
static LINK_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^=>[ \t]*(.*)$").unwrap());

/// A link target as written on the page, before resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLink {
    pub target: String,
    pub label: Option<String>,
}

/// Extracts link lines from a gemtext body
///
/// # Parsing Rules
///
/// - The target is the first whitespace-delimited token after `=>`
/// - If the line has a tab, the label is everything after the first tab
/// - Otherwise the label is everything after the first run of whitespace
/// - At most [`MAX_LINKS_PER_PAGE`] link lines are looked at
/// - Link lines with no target are skipped; other lines are ignored
///
/// # Example
///
/// ```
/// use gemini_ripple::crawler::extract_links;
///
/// let links = extract_links("# Title\n=> gemini://x/y Some Label\n");
/// assert_eq!(links[0].target, "gemini://x/y");
/// assert_eq!(links[0].label.as_deref(), Some("Some Label"));
/// ```
pub fn extract_links(body: &str) -> Vec<CandidateLink> {
    LINK_LINE_RE
        .captures_iter(body)
        .take(MAX_LINKS_PER_PAGE)
        .filter_map(|caps| caps.get(1).and_then(|m| parse_link_line(m.as_str())))
        .collect()
}

fn parse_link_line(rest: &str) -> Option<CandidateLink> {
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }

    let target_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let target = &rest[..target_end];

    let label = match rest.split_once('\t') {
        Some((_, label)) => label.trim(),
        None => rest[target_end..].trim(),
    };

    Some(CandidateLink {
        target: target.to_string(),
        label: (!label.is_empty()).then(|| label.to_string()),
    })
}

/// Returns true if a success meta names a gemtext body
///
/// An empty meta defaults to `text/gemini` in the protocol.
pub fn is_gemtext(meta: &str) -> bool {
    let mime = meta.split(';').next().unwrap_or("").trim();
    mime.is_empty() || mime.eq_ignore_ascii_case("text/gemini")
}

/// Extracts and resolves every crawlable link on a page
///
/// Rejected targets (cross-protocol, empty, unparseable) are dropped with a
/// debug log. Duplicates on the same page are collapsed, first one wins.
pub fn discover_links(base: &Url, body: &str) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for link in extract_links(body) {
        match normalize(base, &link.target) {
            Ok(url) => {
                if seen.insert(url.as_str().to_string()) {
                    urls.push(url);
                }
            }
            Err(e) => tracing::debug!("Dropping link {:?} on {}: {}", link.target, base, e),
        }
    }

    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_url() -> Url {
        Url::parse("gemini://example.org/dir/page.gmi").unwrap()
    }

    #[test]
    fn test_tab_separated_label() {
        let links = extract_links("=> gemini://x/y\tLabel");
        assert_eq!(
            links,
            vec![CandidateLink {
                target: "gemini://x/y".to_string(),
                label: Some("Label".to_string()),
            }]
        );
    }

    #[test]
    fn test_space_separated_label() {
        let links = extract_links("=> gemini://x/y Some Label");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "gemini://x/y");
        assert_eq!(links[0].label.as_deref(), Some("Some Label"));
    }

    #[test]
    fn test_tab_label_preferred_over_space() {
        let links = extract_links("=> gemini://x/y ignored words\tReal Label");
        assert_eq!(links[0].target, "gemini://x/y");
        assert_eq!(links[0].label.as_deref(), Some("Real Label"));
    }

    #[test]
    fn test_link_without_label() {
        let links = extract_links("=> other.gmi\n");
        assert_eq!(links[0].target, "other.gmi");
        assert_eq!(links[0].label, None);
    }

    #[test]
    fn test_crlf_lines() {
        let links = extract_links("=> a.gmi First\r\n=> b.gmi\r\n");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].label.as_deref(), Some("First"));
        assert_eq!(links[1].target, "b.gmi");
        assert_eq!(links[1].label, None);
    }

    #[test]
    fn test_marker_without_space() {
        let links = extract_links("=>tight.gmi Tight");
        assert_eq!(links[0].target, "tight.gmi");
    }

    #[test]
    fn test_non_link_lines_ignored() {
        let body = "# Heading\nSome text => not a link\n* list item\n> quote\n```\ncode\n```\n";
        assert!(extract_links(body).is_empty());
    }

    #[test]
    fn test_empty_link_line_skipped() {
        let links = extract_links("=>\n=>   \n=> real.gmi");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "real.gmi");
    }

    #[test]
    fn test_link_cap() {
        let body: String = (0..MAX_LINKS_PER_PAGE + 50)
            .map(|i| format!("=> /{}.gmi\n", i))
            .collect();
        let links = extract_links(&body);
        assert_eq!(links.len(), MAX_LINKS_PER_PAGE);
        assert_eq!(links.last().unwrap().target, format!("/{}.gmi", MAX_LINKS_PER_PAGE - 1));
    }

    #[test]
    fn test_is_gemtext() {
        assert!(is_gemtext("text/gemini"));
        assert!(is_gemtext("text/gemini; lang=en"));
        assert!(is_gemtext("TEXT/GEMINI"));
        assert!(is_gemtext(""));
        assert!(!is_gemtext("text/plain"));
        assert!(!is_gemtext("image/png"));
    }

    #[test]
    fn test_discover_resolves_and_filters() {
        let body = "\
=> sibling.gmi Sibling
=> /root.gmi
=> gemini://other.host/
=> https://example.com/ Web
=> mailto:someone@example.org
=> sibling.gmi Again
";
        let urls: Vec<String> = discover_links(&base_url(), body)
            .into_iter()
            .map(|u| u.to_string())
            .collect();

        assert_eq!(
            urls,
            vec![
                "gemini://example.org/dir/sibling.gmi",
                "gemini://example.org/root.gmi",
                "gemini://other.host/",
            ]
        );
    }

    #[test]
    fn test_discover_on_garbage_body() {
        let body = "\u{0}\u{1}=> \n\n=>\t\t\n";
        assert!(discover_links(&base_url(), body).is_empty());
    }
}
