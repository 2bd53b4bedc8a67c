//! CIDR allow/deny evaluation for scan targets.

use ipnetwork::IpNetwork;

use crate::error::ConfigError;
use crate::roe::{parse_networks, NetworkConfig};

/// Outcome of [`NetworkPolicy::is_target_allowed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDecision {
    pub allowed: bool,
    pub reason: String,
}

impl NetworkDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Compiled network section of the Rules of Engagement.
///
/// Deny entries always win over allow entries. Targets that are not IP
/// addresses or CIDRs (hostnames, URLs) pass unconditionally; they are
/// resolved and checked elsewhere.
#[derive(Debug, Clone)]
pub struct NetworkPolicy {
    enabled: bool,
    allow: Vec<IpNetwork>,
    deny: Vec<IpNetwork>,
}

impl NetworkPolicy {
    pub fn from_config(config: &NetworkConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: config.enabled,
            allow: parse_networks("network.allow", &config.allow)?,
            deny: parse_networks("network.deny", &config.deny)?,
        })
    }

    pub fn is_target_allowed(&self, target: &str) -> NetworkDecision {
        if !self.enabled {
            return NetworkDecision::allow("network policy disabled");
        }

        let target = target.trim();
        let network = match target.parse::<IpNetwork>() {
            Ok(net) => net,
            Err(_) => {
                return NetworkDecision::allow(format!(
                    "non-IP target '{target}' deferred to DNS resolution"
                ));
            }
        };

        if let Some(denied) = self.deny.iter().find(|d| overlaps(d, &network)) {
            return NetworkDecision::deny(format!(
                "target {target} is in denied network {denied}"
            ));
        }

        if self.allow.is_empty() {
            return NetworkDecision::allow(format!(
                "target {target} allowed (no allow list configured)"
            ));
        }

        match self.allow.iter().find(|a| overlaps(a, &network)) {
            Some(allowed) => {
                NetworkDecision::allow(format!("target {target} is in allowed network {allowed}"))
            }
            None => NetworkDecision::deny(format!(
                "target {target} is not in any allowed network"
            )),
        }
    }
}

/// Two networks overlap when either contains the other's base address.
/// Networks of different address families never overlap.
fn overlaps(a: &IpNetwork, b: &IpNetwork) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}
