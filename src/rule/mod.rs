//! Destination access control

use std::collections::HashSet;
use tracing::debug;

/// Exact-match set of destination hosts that may be proxied.
///
/// No wildcards, no case folding and no DNS lookups: a host is allowed only
/// when the very same string was configured. Built once at startup and never
/// modified afterwards.
#[derive(Debug, Clone, Default)]
pub struct DomainAllowlist {
    domains: HashSet<String>,
}

impl DomainAllowlist {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let domains = domains
            .into_iter()
            .map(Into::into)
            .filter(|d: &String| !d.is_empty())
            .collect();
        DomainAllowlist { domains }
    }

    /// Check whether `host` (already stripped of any port) may be proxied
    pub fn allows(&self, host: &str) -> bool {
        let allowed = !host.is_empty() && self.domains.contains(host);
        debug!("allowlist check {:?}: {}", host, allowed);
        allowed
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Configured domains, sorted for display
    pub fn domains(&self) -> Vec<&str> {
        let mut domains: Vec<&str> = self.domains.iter().map(String::as_str).collect();
        domains.sort_unstable();
        domains
    }
}
