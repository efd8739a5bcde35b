//! Checks run on a video URL before any TikTok API call
//!
//! TikTok pulls media from the open internet, so a URL that we can reach but
//! TikTok cannot (plain HTTP, local or private hosts) is rejected up front
//! with hints instead of surfacing as an opaque pull failure later.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;
use url::{Host, Url};

use crate::http::HttpClient;
use crate::platforms::media::{self, MediaInfo};
use crate::types::{FailReason, Platform, PublishResult};

fn unreachable(message: impl Into<String>, hints: &[&str]) -> PublishResult {
    PublishResult::failure(Platform::TikTok.as_str(), FailReason::UrlValidationFailed, message)
        .with_recommendations(hints.iter().map(|h| h.to_string()).collect())
}

fn incompatible(message: impl Into<String>) -> PublishResult {
    PublishResult::failure(Platform::TikTok.as_str(), FailReason::CompatibilityFailed, message)
        .with_recommendations(vec![
            "Host the video on a public CDN or storage bucket that TikTok can reach".to_string(),
            "Local, loopback and private-network addresses are never reachable by TikTok"
                .to_string(),
        ])
}

fn parse_url(raw: &str) -> Result<Url, PublishResult> {
    Url::parse(raw.trim()).map_err(|e| {
        unreachable(
            format!("Video URL is not valid: {}", e),
            &["Provide an absolute https:// URL pointing at the video file"],
        )
    })
}

/// Validate the URL format and its host without touching the network
pub fn check_url(raw: &str) -> Result<Url, PublishResult> {
    let url = parse_url(raw)?;

    if url.scheme() != "https" {
        return Err(unreachable(
            format!("Video URL must use HTTPS, got {}://", url.scheme()),
            &["Serve the video over HTTPS"],
        ));
    }

    match url.host() {
        None => Err(unreachable(
            "Video URL has no host",
            &["Provide an absolute https:// URL pointing at the video file"],
        )),
        Some(host) if is_local_host(&host) => Err(incompatible(format!(
            "Video host {} is not publicly reachable",
            host
        ))),
        Some(_) => Ok(url),
    }
}

/// Every address a domain resolves to must be public
async fn check_resolved_host(url: &Url) -> Result<(), PublishResult> {
    let Some(Host::Domain(domain)) = url.host() else {
        return Ok(());
    };
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs: Vec<IpAddr> = tokio::net::lookup_host((domain, port))
        .await
        .map_err(|e| {
            unreachable(
                format!("Video host {} could not be resolved: {}", domain, e),
                &["Check the domain name in the video URL"],
            )
        })?
        .map(|addr| addr.ip())
        .collect();

    if let Some(ip) = addrs.iter().find(|ip| !is_public_ip(**ip)) {
        return Err(incompatible(format!(
            "Video host {} resolves to non-public address {}",
            domain, ip
        )));
    }
    debug!(host = domain, addresses = addrs.len(), "Video host resolves to public addresses");
    Ok(())
}

/// Full preflight: static URL checks, host resolution, then a HEAD request
///
/// `allow_local` skips the HTTPS and public-host requirements.
pub async fn validate_video_url(
    http: &HttpClient,
    raw: &str,
    max_bytes: u64,
    allow_local: bool,
) -> Result<MediaInfo, PublishResult> {
    let url = if allow_local {
        parse_url(raw)?
    } else {
        let url = check_url(raw)?;
        check_resolved_host(&url).await?;
        url
    };

    let info = media::inspect(http, url.as_str()).await.map_err(|e| {
        unreachable(
            format!("Video URL could not be reached: {}", e),
            &["Check that the URL is public and does not require authentication"],
        )
    })?;

    check_media_info(&info, max_bytes)?;
    Ok(info)
}

/// Reachability facts from the HEAD request
pub fn check_media_info(info: &MediaInfo, max_bytes: u64) -> Result<(), PublishResult> {
    if !info.status.is_success() {
        return Err(unreachable(
            format!("Video URL answered {}", info.status),
            &[
                "Check that the URL is public and does not require authentication",
                "Signed URLs may have expired; generate a fresh one",
            ],
        ));
    }

    if !info.is_video() {
        return Err(unreachable(
            format!(
                "Video URL serves {}, not a video",
                info.content_type.as_deref().unwrap_or("an unknown content type")
            ),
            &["Link directly to the video file (MP4, MOV or WebM), not a web page"],
        ));
    }

    if let Some(size) = info.content_length {
        if size > max_bytes {
            return Err(unreachable(
                format!("Video is {} bytes, above the {} byte limit", size, max_bytes),
                &["Compress or trim the video before publishing"],
            ));
        }
    }

    Ok(())
}

fn is_local_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".local")
                || domain.ends_with(".internal")
        }
        Host::Ipv4(ip) => is_private_v4(ip),
        Host::Ipv6(ip) => is_private_v6(ip),
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local, fe80::/10 link local
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

/// Whether an address could be fetched from the public internet
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !is_private_v4(&v4),
        IpAddr::V6(v6) => !is_private_v6(&v6),
    }
}
