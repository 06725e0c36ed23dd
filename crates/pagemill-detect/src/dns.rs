//! Reverse/forward DNS verification for spider candidates.
//!
//! A verified crawler resolves backwards to a hostname under one of its
//! family's declared suffixes, and that hostname resolves forward to the
//! original address. Any resolution failure or timeout yields an unverified
//! verdict, never an error.

use hickory_resolver::TokioAsyncResolver;
use pagemill_types::SpiderKind;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared resolver handle; `None` when system DNS configuration is absent.
pub fn system_resolver() -> Option<TokioAsyncResolver> {
    match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => Some(resolver),
        Err(e) => {
            warn!(error = %e, "System DNS configuration unavailable, verification disabled");
            None
        }
    }
}

/// Run the reverse-then-forward check with a per-lookup timeout.
pub async fn verify_spider_ip(
    resolver: &TokioAsyncResolver,
    ip: IpAddr,
    kind: SpiderKind,
    timeout: Duration,
) -> bool {
    let reverse = match tokio::time::timeout(timeout, resolver.reverse_lookup(ip)).await {
        Ok(Ok(lookup)) => lookup,
        Ok(Err(e)) => {
            debug!(ip = %ip, error = %e, "Reverse lookup failed");
            return false;
        }
        Err(_) => {
            debug!(ip = %ip, "Reverse lookup timed out");
            return false;
        }
    };

    for name in reverse.iter() {
        let hostname = name.to_string();
        let hostname = hostname.trim_end_matches('.');
        if !kind
            .dns_suffixes()
            .iter()
            .any(|suffix| hostname.ends_with(suffix))
        {
            continue;
        }

        match tokio::time::timeout(timeout, resolver.lookup_ip(hostname)).await {
            Ok(Ok(addrs)) if addrs.iter().any(|a| a == ip) => {
                debug!(ip = %ip, hostname, spider = kind.name(), "DNS verification succeeded");
                return true;
            }
            Ok(Ok(_)) => {
                debug!(ip = %ip, hostname, "Forward lookup did not return the original address");
            }
            Ok(Err(e)) => {
                debug!(hostname, error = %e, "Forward lookup failed");
            }
            Err(_) => {
                debug!(hostname, "Forward lookup timed out");
            }
        }
    }

    false
}
