//! SSRF (Server-Side Request Forgery) protection for submitted and
//! about-to-be-rendered URLs.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use reqwest::redirect::Policy;
use reqwest::StatusCode;
use url::Url;

use crate::error::QueueError;

const METADATA_HOSTNAMES: &[&str] = &["169.254.169.254", "metadata.google.internal"];
const LOCALHOST_HOSTNAMES: &[&str] = &["localhost", "localhost.localdomain"];

/// True if `ip` falls in any of the ranges treated as unsafe render
/// targets: `10/8`, `172.16/12`, `192.168/16`, `127/8`, `169.254/16`,
/// `::1/128`, `fc00::/7`, `fe80::/10`.
fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local()
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() {
        return true;
    }
    let segments = ip.segments();
    // fc00::/7 — the top 7 bits of the first segment are 1111 110x.
    let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
    // fe80::/10 — link-local unicast.
    let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
    is_unique_local || is_link_local
}

fn is_blocked_hostname(hostname: &str) -> bool {
    let lower = hostname.to_lowercase();
    METADATA_HOSTNAMES.contains(&lower.as_str()) || LOCALHOST_HOSTNAMES.contains(&lower.as_str())
}

fn hostname_of(url: &str) -> Result<String, QueueError> {
    let parsed = Url::parse(url).map_err(|e| QueueError::InvalidUrl(format!("{url}: {e}")))?;
    parsed
        .host_str()
        .map(str::to_owned)
        .ok_or_else(|| QueueError::InvalidUrl(format!("missing authority in {url}")))
}

/// Pre-submission SSRF check.
///
/// Rejects known metadata hostnames, `localhost`, and IP literals or
/// resolved addresses in the blocked ranges. DNS resolution errors are
/// swallowed — rendering will fail naturally later — as are any other
/// resolver errors, to avoid a TOCTOU-driven false reject.
pub async fn validate_submission(url: &str) -> Result<(), QueueError> {
    let hostname = hostname_of(url)?;

    if is_blocked_hostname(&hostname) {
        return Err(QueueError::SsrfBlocked(format!(
            "{hostname} is a blocked metadata or localhost hostname"
        )));
    }

    if let Ok(ip) = hostname.parse::<IpAddr>() {
        if is_blocked_ip(ip) {
            return Err(QueueError::SsrfBlocked(format!(
                "{hostname} is in a blocked IP range"
            )));
        }
        return Ok(());
    }

    match tokio::net::lookup_host((hostname.as_str(), 0)).await {
        Ok(addrs) => {
            for addr in addrs {
                if is_blocked_ip(addr.ip()) {
                    return Err(QueueError::SsrfBlocked(format!(
                        "{hostname} resolves to blocked address {}",
                        addr.ip()
                    )));
                }
            }
            Ok(())
        }
        Err(_) => Ok(()),
    }
}

/// Pre-render redirect validation.
///
/// Issues HEAD requests and follows up to `max_redirects` redirects,
/// revalidating each hop with [`validate_submission`]. Relative
/// `Location` values are resolved against the current hop. Network
/// errors terminate the walk non-fatally — rendering will then fail
/// naturally — returning whatever URL was last validated.
pub async fn validate_redirects(url: &str, max_redirects: usize) -> Result<String, QueueError> {
    validate_submission(url).await?;

    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("failed to construct reqwest client for redirect validation");

    let mut current = url.to_owned();

    for _ in 0..max_redirects {
        let response = match client.head(&current).send().await {
            Ok(response) => response,
            Err(_) => break,
        };

        if !is_redirect(response.status()) {
            break;
        }

        let location = match response.headers().get(reqwest::header::LOCATION) {
            Some(value) => match value.to_str() {
                Ok(s) => s.to_owned(),
                Err(_) => break,
            },
            None => break,
        };

        let next = resolve_location(&current, &location)?;

        validate_submission(&next).await?;

        current = next;
    }

    Ok(current)
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn resolve_location(current: &str, location: &str) -> Result<String, QueueError> {
    let base = Url::parse(current).map_err(|e| QueueError::InvalidUrl(format!("{current}: {e}")))?;
    let resolved = base
        .join(location)
        .map_err(|e| QueueError::InvalidUrl(format!("invalid redirect location {location}: {e}")))?;
    Ok(resolved.to_string())
}
