//! Reverse-DNS lookup for the relay log's `from <ip>/<rdns>` tag (spec.md
//! §1: "Reverse-DNS lookup and the append-only relay log are pure sinks").
//!
//! Uses `TokioAsyncResolver::tokio` with the system resolver config and a
//! `reverse_lookup` rather than a forward DNS-seed lookup.

use std::net::IpAddr;

use tracing::debug;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Resolves `addr`'s PTR record, returning `None` on any failure (no record,
/// timeout, resolver error). Reverse DNS is cosmetic only — never a reason
/// to delay or drop a log line.
pub async fn resolve_ptr(addr: IpAddr) -> Option<String> {
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    match resolver.reverse_lookup(addr).await {
        Ok(response) => response
            .iter()
            .next()
            .map(|name| name.to_string().trim_end_matches('.').to_string()),
        Err(err) => {
            debug!(%addr, %err, "reverse dns lookup failed");
            None
        }
    }
}
