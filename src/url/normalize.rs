use crate::url::SCHEME;
use crate::{UrlError, UrlResult};
use ::url::Url;

/// Resolves a raw link target found on `base` into an absolute gemini URL
///
/// # Resolution Rules
///
/// 1. Empty (or all-whitespace) targets are rejected
/// 2. Targets containing `://` are accepted only when the scheme is `gemini`
/// 3. Targets that parse as an absolute URL of another scheme (`mailto:`,
///    `https:` without slashes, ...) are rejected as cross-protocol
/// 4. Everything else is relative: a leading `/` replaces the whole path,
///    other targets are joined onto the directory of the base path. A
///    leading `//` is a network-path reference and names another host
/// 5. The fragment is dropped, it never reaches the server
///
/// # Examples
///
/// ```
/// use gemini_ripple::url::normalize;
/// use url::Url;
///
/// let base = Url::parse("gemini://h/a/b.gmi").unwrap();
/// assert_eq!(normalize(&base, "c.gmi").unwrap().as_str(), "gemini://h/a/c.gmi");
/// assert_eq!(normalize(&base, "/z").unwrap().as_str(), "gemini://h/z");
/// assert!(normalize(&base, "").is_err());
/// ```
pub fn normalize(base: &Url, raw: &str) -> UrlResult<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut resolved = if let Some((scheme, _)) = raw.split_once("://") {
        if !scheme.eq_ignore_ascii_case(SCHEME) {
            return Err(UrlError::CrossProtocol(raw.to_string()));
        }
        Url::parse(raw).map_err(|e| UrlError::Parse(format!("{}: {}", raw, e)))?
    } else {
        if let Ok(opaque) = Url::parse(raw) {
            if opaque.scheme() != SCHEME {
                return Err(UrlError::CrossProtocol(raw.to_string()));
            }
        }
        base.join(raw)
            .map_err(|e| UrlError::Parse(format!("{}: {}", raw, e)))?
    };

    resolved.set_fragment(None);
    ensure_crawlable(resolved)
}

/// Parses a start URL supplied by configuration or the command line
///
/// Seeds must already be absolute gemini URLs; no base is available to
/// resolve them against.
pub fn parse_seed(seed: &str) -> UrlResult<Url> {
    let seed = seed.trim();
    if seed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut url = Url::parse(seed).map_err(|e| UrlError::Parse(format!("{}: {}", seed, e)))?;
    if url.scheme() != SCHEME {
        return Err(UrlError::CrossProtocol(seed.to_string()));
    }
    url.set_fragment(None);
    ensure_crawlable(url)
}

fn ensure_crawlable(url: Url) -> UrlResult<Url> {
    if url.scheme() != SCHEME {
        return Err(UrlError::CrossProtocol(url.to_string()));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlError::MissingHost(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("gemini://h/a/b.gmi").unwrap()
    }

    #[test]
    fn test_relative_sibling() {
        let result = normalize(&base(), "c.gmi").unwrap();
        assert_eq!(result.as_str(), "gemini://h/a/c.gmi");
    }

    #[test]
    fn test_absolute_path_replaces_path() {
        let result = normalize(&base(), "/z").unwrap();
        assert_eq!(result.as_str(), "gemini://h/z");
    }

    #[test]
    fn test_network_path_switches_host() {
        let result = normalize(&base(), "//other.host/x.gmi").unwrap();
        assert_eq!(result.as_str(), "gemini://other.host/x.gmi");
        assert_eq!(result.host_str(), Some("other.host"));
    }

    #[test]
    fn test_relative_from_directory_base() {
        let base = Url::parse("gemini://h/docs/").unwrap();
        let result = normalize(&base, "intro.gmi").unwrap();
        assert_eq!(result.as_str(), "gemini://h/docs/intro.gmi");
    }

    #[test]
    fn test_parent_segments_resolved() {
        let base = Url::parse("gemini://h/a/b/c.gmi").unwrap();
        let result = normalize(&base, "../d.gmi").unwrap();
        assert_eq!(result.as_str(), "gemini://h/a/d.gmi");
    }

    #[test]
    fn test_relative_keeps_base_port() {
        let base = Url::parse("gemini://h:1966/a/b.gmi").unwrap();
        let result = normalize(&base, "c.gmi").unwrap();
        assert_eq!(result.as_str(), "gemini://h:1966/a/c.gmi");
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(normalize(&base(), ""), Err(UrlError::Empty));
        assert_eq!(normalize(&base(), "   "), Err(UrlError::Empty));
    }

    #[test]
    fn test_absolute_gemini_accepted() {
        let result = normalize(&base(), "gemini://other.host/x.gmi").unwrap();
        assert_eq!(result.as_str(), "gemini://other.host/x.gmi");
    }

    #[test]
    fn test_scheme_match_is_case_insensitive() {
        let result = normalize(&base(), "GEMINI://other.host/x").unwrap();
        assert_eq!(result.scheme(), "gemini");
    }

    #[test]
    fn test_cross_protocol_rejected() {
        for target in [
            "https://example.com/",
            "other://host/x",
            "gopher://hole.example/1/",
        ] {
            assert!(
                matches!(normalize(&base(), target), Err(UrlError::CrossProtocol(_))),
                "{} was not rejected",
                target
            );
        }
    }

    #[test]
    fn test_opaque_scheme_rejected() {
        let result = normalize(&base(), "mailto:someone@example.com");
        assert!(matches!(result, Err(UrlError::CrossProtocol(_))));
    }

    #[test]
    fn test_fragment_removed() {
        let result = normalize(&base(), "c.gmi#section").unwrap();
        assert_eq!(result.as_str(), "gemini://h/a/c.gmi");
    }

    #[test]
    fn test_query_preserved() {
        let result = normalize(&base(), "search?gemini").unwrap();
        assert_eq!(result.as_str(), "gemini://h/a/search?gemini");
    }

    #[test]
    fn test_parse_seed() {
        let seed = parse_seed("gemini://gemini.circumlunar.space/").unwrap();
        assert_eq!(seed.as_str(), "gemini://gemini.circumlunar.space/");
    }

    #[test]
    fn test_parse_seed_rejects_other_schemes() {
        assert!(matches!(
            parse_seed("https://example.com/"),
            Err(UrlError::CrossProtocol(_))
        ));
        assert!(matches!(parse_seed("not a url"), Err(UrlError::Parse(_))));
        assert_eq!(parse_seed(""), Err(UrlError::Empty));
    }
}
