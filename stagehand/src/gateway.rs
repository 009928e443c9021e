//! Routing resolution for the reverse proxy.
//!
//! The HTTP transport lives in the server crate; this module owns the parts
//! that do not depend on it: which endpoint serves a `(version, component)`
//! pair, how the upstream URL is built, and which headers travel upstream.

use tracing::debug;

use crate::core::types::{ComponentKind, ServiceEndpoint};
use crate::error::{Error, Result};
use crate::registry::VersionRegistry;

/// Headers that describe one hop rather than the request itself.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Endpoint registered for `component` under `version`.
///
/// `version` is looked up as a version first and as a commit hash second.
pub fn resolve_endpoint(
    registry: &VersionRegistry,
    version: &str,
    component: &str,
) -> Result<ServiceEndpoint> {
    let kind: ComponentKind = component.parse()?;
    let record = registry
        .get_by_version(version)
        .or_else(|| registry.get_by_commit(version))
        .ok_or_else(|| Error::NotFound(format!("version {version}")))?;
    let endpoint = record.endpoint(kind).cloned().ok_or_else(|| {
        Error::NotFound(format!(
            "{kind} endpoint for version {version} (commit {})",
            record.commit_hash
        ))
    })?;
    debug!(version, kind = %kind, base_url = %endpoint.base_url, "endpoint resolved");
    Ok(endpoint)
}

/// `base_url + "/" + path_suffix`, with the inbound query string appended.
pub fn upstream_url(base_url: &str, path_suffix: &str, query: Option<&str>) -> String {
    let mut url = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path_suffix.trim_start_matches('/')
    );
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Whether an inbound header is copied onto the upstream request.
///
/// `host` identifies the gateway, and `content-length` is recomputed from the
/// buffered body.
pub fn is_forwardable_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name != "host" && name != "content-length" && !HOP_BY_HOP.contains(&name.as_str())
}

/// Whether an upstream response header is copied back to the client.
pub fn is_returnable_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name != "content-length" && !HOP_BY_HOP.contains(&name.as_str())
}
