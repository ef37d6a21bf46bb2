//! SRV-record node discovery.
//!
//! Some deployments point confd-rs at `srv_domain`/`srv_record` instead of a
//! static node list, letting DNS own cluster membership. Resolved nodes are
//! spliced into [`confd_types::BackendConfig::nodes`] before the backend is
//! built, the same way the teacher resolves registry hosts before dialing
//! them.

use confd_types::ConfdError;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::Resolver;

/// Resolve `_{record}._tcp.{domain}` into a list of `host:port` node
/// addresses, sorted by SRV priority then target name for determinism.
pub fn resolve_srv(domain: &str, record: &str) -> Result<Vec<String>, ConfdError> {
    let resolver = Resolver::new(ResolverConfig::default(), ResolverOpts::default())
        .map_err(|e| ConfdError::Connect(format!("failed to build DNS resolver: {e}")))?;

    let query = format!("_{record}._tcp.{domain}");
    let lookup = resolver
        .srv_lookup(&query)
        .map_err(|e| ConfdError::Connect(format!("SRV lookup for {query} failed: {e}")))?;

    let mut nodes: Vec<(u16, String)> = lookup
        .iter()
        .map(|srv| {
            let target = srv.target().to_utf8();
            let host = target.trim_end_matches('.');
            (srv.priority(), format!("{host}:{}", srv.port()))
        })
        .collect();
    nodes.sort();

    Ok(nodes.into_iter().map(|(_, node)| node).collect())
}
