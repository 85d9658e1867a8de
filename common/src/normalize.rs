//! Canonicalizes a URL into the dedup fingerprint used by the queue core.
//!
//! The output is a pure function of the input: same string in, same
//! string out, every time. Nothing here touches the network or the
//! clock.

use url::Url;

use crate::error::QueueError;

/// Normalize `url` into the canonical string used as a dedup
/// fingerprint.
///
/// Rules, applied in order:
/// 1. Reject if empty or the scheme isn't `http`/`https` or the
///    authority is absent.
/// 2. Lowercase the entire URL prior to parsing.
/// 3. Discard the fragment.
/// 4. Strip a single trailing `/` from the path unless the path is
///    exactly `/`.
/// 5. Preserve the query string verbatim (order-preserving; query
///    parameters are never sorted).
/// 6. Preserve the parameters segment verbatim.
pub fn normalize(url: &str) -> Result<String, QueueError> {
    if url.is_empty() {
        return Err(QueueError::InvalidUrl("URL must not be empty".to_owned()));
    }

    // Lowercasing before parsing means the query string and path come
    // out lowercased too; this is intentional, not an oversight. Query
    // parameter order is a separate concern from casing and is never
    // sorted — two URLs differing only in parameter order still get
    // distinct fingerprints.
    let lowered = url.to_lowercase();

    let mut parsed =
        Url::parse(&lowered).map_err(|e| QueueError::InvalidUrl(format!("{url}: {e}")))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(QueueError::InvalidUrl(format!(
            "unsupported scheme in {url}"
        )));
    }

    if parsed.host_str().is_none() {
        return Err(QueueError::InvalidUrl(format!(
            "missing authority in {url}"
        )));
    }

    parsed.set_fragment(None);

    let path = parsed.path();
    if path != "/" && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_owned();
        parsed.set_path(&trimmed);
    }

    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(normalize("").is_err());
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(normalize("ftp://example.com/a").is_err());
    }

    #[test]
    fn rejects_missing_authority() {
        assert!(normalize("http:///a").is_err());
    }

    #[test]
    fn strips_fragment() {
        assert_eq!(
            normalize("https://example.com/a#frag").unwrap(),
            normalize("https://example.com/a").unwrap()
        );
    }

    #[test]
    fn strips_single_trailing_slash_but_not_root() {
        assert_eq!(
            normalize("https://example.com/a/").unwrap(),
            "https://example.com/a"
        );
        assert_eq!(normalize("https://example.com/").unwrap(), "https://example.com/");
    }

    #[test]
    fn lowercases_authority_and_path() {
        assert_eq!(
            normalize("HTTPS://EXAMPLE.COM/A").unwrap(),
            "https://example.com/a"
        );
    }

    #[test]
    fn preserves_query_order() {
        let normalized = normalize("https://example.com/a?b=1&a=2").unwrap();
        assert_eq!(normalized, "https://example.com/a?b=1&a=2");
    }

    #[test]
    fn is_idempotent() {
        let once = normalize("HTTPS://Example.com/a/?z=1&y=2#frag").unwrap();
        let twice = normalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn case_fragment_and_trailing_slash_do_not_change_fingerprint() {
        let a = normalize("https://example.com/a").unwrap();
        let b = normalize("HTTPS://EXAMPLE.COM/a/#frag").unwrap();
        assert_eq!(a, b);
    }
}
