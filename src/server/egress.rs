//! Egress decisions for socket hooks.
//!
//! A flow to an address is allowed only if every tag on the sender's label
//! has a domain binding that includes the hostname last observed for that
//! address. Two inputs fail open: lines with too few fields, and label
//! entries that are not integers (skipped as if they passed).

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::kernel::store::TagStore;
use crate::server::cache::HostCache;
use crate::server::protocol::{canonical_ip, parse_label_field, Decision, LabelToken, QueryRequest};
use crate::types::TagValue;

/// Decides query-channel requests from domain bindings and observations.
#[derive(Clone)]
pub struct EgressPolicy {
    store: Arc<TagStore>,
    hosts: Arc<HostCache>,
}

impl EgressPolicy {
    /// Bind to the shared store and observation cache.
    pub fn new(store: Arc<TagStore>, hosts: Arc<HostCache>) -> Self {
        Self { store, hosts }
    }

    /// The observation cache this policy reads.
    pub fn hosts(&self) -> &Arc<HostCache> {
        &self.hosts
    }

    /// Decide one request line.
    pub fn decide(&self, line: &str) -> Decision {
        match QueryRequest::parse(line) {
            QueryRequest::Malformed => {
                debug!(line, "malformed query, allowing");
                Decision::Allow
            }
            QueryRequest::Unrecognized { kind } => {
                debug!(kind, "unrecognized query kind, denying");
                Decision::Deny
            }
            QueryRequest::Egress { ip, label } => self.decide_egress(ip, label),
        }
    }

    /// Decide a socket egress check to `ip` for data labeled `label`.
    pub fn decide_egress(&self, ip: &str, label: &str) -> Decision {
        let Some(addr) = canonical_ip(ip) else {
            warn!(ip, "destination is not an IP literal, allowing");
            return Decision::Allow;
        };
        let host = self.hosts.lookup(&addr);

        let tokens = parse_label_field(label);
        if tokens.is_empty() {
            info!(ip = %addr, label, "empty tag list in egress query, denying");
            return Decision::Deny;
        }

        for token in tokens {
            match token {
                LabelToken::Tag(raw) => {
                    let tag = TagValue(raw);
                    let permitted = host
                        .as_deref()
                        .is_some_and(|h| self.store.permits_domain(tag, h));
                    if !permitted {
                        info!(ip = %addr, host = ?host, %tag, "egress denied");
                        return Decision::Deny;
                    }
                }
                LabelToken::Unparseable(raw) => {
                    warn!(ip = %addr, tag = raw, "skipping unparseable tag");
                }
            }
        }
        debug!(ip = %addr, host = ?host, label, "egress allowed");
        Decision::Allow
    }
}
