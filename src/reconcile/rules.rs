//! Ruleset construction: canonicalise, prune, render
//!
//! Everything here is pure. The rendered ruleset is a total function of the
//! mapping set: permuting the input yields byte-identical output, and two
//! consecutive renders of the same set are trivially identical. That is what
//! makes the reconciler idempotent and the rule state auditable.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::model::MappingView;

/// NAT table name (IPv4 family; `redirect` is IPv4-only here)
pub const NAT_TABLE: &str = "pgw_nat";

/// Filter table name (inet family covers both address families at once)
pub const FILTER_TABLE: &str = "pgw_filter";

/// One canonical redirect: client prefix to local port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RedirectRule {
    /// Client source prefix
    pub prefix: Ipv4Net,
    /// Local redirect port on the gateway
    pub port: u16,
}

/// A mapping that produced a canonical rule, kept for state reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsideredMapping {
    /// Mapping ID
    pub id: String,
    /// The mapping's allocated port (preserved in state writes)
    pub port: u16,
}

/// Canonicalise the mapping set into redirect rules.
///
/// Keeps mappings with a parseable IPv4 CIDR source and a positive port,
/// deduplicated by `(prefix, port)`. Returns the rules plus the mappings
/// that contributed one (the set the reconciler reports APPLIED/FAILED on).
#[must_use]
pub fn canonicalize(views: &[MappingView]) -> (Vec<RedirectRule>, Vec<ConsideredMapping>) {
    let mut seen: HashSet<RedirectRule> = HashSet::new();
    let mut rules = Vec::new();
    let mut considered = Vec::new();

    for view in views {
        if view.local_redirect_port == 0 {
            continue;
        }
        let Ok(prefix) = view.client.ip_cidr.parse::<Ipv4Net>() else {
            continue;
        };

        let rule = RedirectRule {
            prefix,
            port: view.local_redirect_port,
        };
        if seen.insert(rule) {
            rules.push(rule);
        }
        considered.push(ConsideredMapping {
            id: view.id.clone(),
            port: view.local_redirect_port,
        });
    }

    (rules, considered)
}

/// Drop rules whose prefix is contained by a kept, more-general prefix at
/// the same port.
///
/// Within a port, candidates are visited most-general first (ascending
/// prefix length, then address), so a kept rule can only ever shadow
/// narrower ones. The union of kept prefixes equals the union of the input
/// prefixes.
#[must_use]
pub fn prune(rules: &[RedirectRule]) -> Vec<RedirectRule> {
    let mut sorted: Vec<RedirectRule> = rules.to_vec();
    sorted.sort_by(sort_for_prune);

    let mut kept: Vec<RedirectRule> = Vec::with_capacity(sorted.len());
    for rule in sorted {
        let covered = kept
            .iter()
            .any(|k| k.port == rule.port && k.prefix.contains(&rule.prefix));
        if !covered {
            kept.push(rule);
        }
    }
    kept
}

fn sort_for_prune(a: &RedirectRule, b: &RedirectRule) -> std::cmp::Ordering {
    a.port
        .cmp(&b.port)
        .then(a.prefix.prefix_len().cmp(&b.prefix.prefix_len()))
        .then(a.prefix.addr().cmp(&b.prefix.addr()))
}

/// Stable render order: `(port asc, bits desc, prefix asc)`
fn sort_for_render(a: &RedirectRule, b: &RedirectRule) -> std::cmp::Ordering {
    a.port
        .cmp(&b.port)
        .then(b.prefix.prefix_len().cmp(&a.prefix.prefix_len()))
        .then(a.prefix.addr().cmp(&b.prefix.addr()))
}

/// Render the complete nftables script for a pruned rule list.
///
/// Layout (semantics per the packet-filter contract):
/// - NAT table, prerouting chain (dstnat priority, policy accept): redirect
///   TCP 80/443 from each client prefix arriving on the LAN interface to its
///   local port.
/// - Filter table, forward chain: accept established/related, drop client
///   egress on the WAN interface, drop client UDP.
/// - Filter table, input chain: accept DNS and the local redirect port from
///   each client prefix on the LAN interface.
#[must_use]
pub fn render(rules: &[RedirectRule], lan_iface: &str, wan_iface: &str) -> String {
    let mut ordered: Vec<RedirectRule> = rules.to_vec();
    ordered.sort_by(sort_for_render);

    let mut out = String::new();

    // NAT table (IPv4): one redirect per rule
    out.push_str(&format!("table ip {NAT_TABLE} {{\n"));
    out.push_str("    chain prerouting {\n");
    out.push_str("        type nat hook prerouting priority dstnat; policy accept;\n");
    for rule in &ordered {
        out.push_str(&format!(
            "        iifname \"{lan_iface}\" ip saddr {} tcp dport {{ 80, 443 }} redirect to :{}\n",
            rule.prefix, rule.port
        ));
    }
    out.push_str("    }\n");
    out.push_str("}\n");

    // Filter table (inet): forwarding restrictions and input accepts
    out.push_str(&format!("table inet {FILTER_TABLE} {{\n"));
    out.push_str("    chain forward {\n");
    out.push_str("        type filter hook forward priority filter; policy accept;\n");
    out.push_str("        ct state established,related accept\n");
    for rule in &ordered {
        out.push_str(&format!(
            "        ip saddr {} oifname \"{wan_iface}\" drop\n",
            rule.prefix
        ));
        out.push_str(&format!(
            "        ip saddr {} meta l4proto udp drop\n",
            rule.prefix
        ));
    }
    out.push_str("    }\n");
    out.push_str("    chain input {\n");
    out.push_str("        type filter hook input priority filter; policy accept;\n");
    for rule in &ordered {
        out.push_str(&format!(
            "        iifname \"{lan_iface}\" ip saddr {} udp dport 53 accept\n",
            rule.prefix
        ));
        out.push_str(&format!(
            "        iifname \"{lan_iface}\" ip saddr {} tcp dport 53 accept\n",
            rule.prefix
        ));
        out.push_str(&format!(
            "        iifname \"{lan_iface}\" ip saddr {} tcp dport {} accept\n",
            rule.prefix, rule.port
        ));
    }
    out.push_str("    }\n");
    out.push_str("}\n");

    out
}

/// Convenience: canonicalise, prune, and render one mapping snapshot.
#[must_use]
pub fn build_ruleset(
    views: &[MappingView],
    lan_iface: &str,
    wan_iface: &str,
) -> (String, Vec<ConsideredMapping>) {
    let (rules, considered) = canonicalize(views);
    let pruned = prune(&rules);
    (render(&pruned, lan_iface, wan_iface), considered)
}

/// Helper for building a rule in tests and tools
#[must_use]
pub fn rule(addr: Ipv4Addr, prefix_len: u8, port: u16) -> RedirectRule {
    RedirectRule {
        prefix: Ipv4Net::new(addr, prefix_len).expect("valid prefix length"),
        port,
    }
}
