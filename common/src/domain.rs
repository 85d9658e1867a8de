//! Registrable-domain (eTLD+1) extraction, used to scope the per-domain
//! lock.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::OnceLock;

use publicsuffix::{List, Psl};
use url::Url;

use crate::error::QueueError;

const PSL_DATA: &str = include_str!("../assets/public_suffix_list.dat");

fn psl() -> &'static List {
    static PSL: OnceLock<List> = OnceLock::new();
    PSL.get_or_init(|| {
        List::from_str(PSL_DATA).expect("vendored public suffix list snapshot failed to parse")
    })
}

/// Extract the registrable domain (eTLD+1) from `url`.
///
/// Falls back to the lowercase hostname unchanged when the host is an
/// IP literal or the public-suffix dataset yields no match. Fails with
/// `QueueError::InvalidUrl` only when no hostname can be parsed at
/// all.
pub fn main_domain(url: &str) -> Result<String, QueueError> {
    let parsed =
        Url::parse(url).map_err(|e| QueueError::InvalidUrl(format!("{url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| QueueError::InvalidUrl(format!("missing authority in {url}")))?;

    if host.parse::<IpAddr>().is_ok() {
        return Ok(host.to_lowercase());
    }

    match psl().domain(host.as_bytes()) {
        Some(domain) => Ok(String::from_utf8_lossy(domain.as_bytes()).to_lowercase()),
        None => {
            tracing::warn!(host, "could not extract eTLD+1, using full hostname");
            Ok(host.to_lowercase())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_etld_plus_one() {
        assert_eq!(
            main_domain("https://a.example.com/path").unwrap(),
            "example.com"
        );
        assert_eq!(
            main_domain("https://b.example.com/path").unwrap(),
            "example.com"
        );
    }

    #[test]
    fn handles_multi_label_suffix() {
        assert_eq!(
            main_domain("https://www.example.co.uk/path").unwrap(),
            "example.co.uk"
        );
    }

    #[test]
    fn falls_back_to_hostname_for_ip_literal() {
        assert_eq!(main_domain("http://127.0.0.1/a").unwrap(), "127.0.0.1");
    }

    #[test]
    fn falls_back_to_hostname_for_ipv6_literal() {
        assert_eq!(main_domain("http://[::1]/a").unwrap(), "::1");
    }

    #[test]
    fn rejects_url_without_hostname() {
        assert!(main_domain("not a url").is_err());
    }

    #[test]
    fn lowercases_result() {
        assert_eq!(
            main_domain("https://WWW.EXAMPLE.COM/a").unwrap(),
            "example.com"
        );
    }
}
