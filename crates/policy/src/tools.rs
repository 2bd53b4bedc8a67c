//! Per-tool policy lookup.

use std::collections::{HashMap, HashSet};

use crate::roe::{RiskLevel, RulesOfEngagement, ToolPolicy};

/// Resolved tool policies keyed by lowercase tool name.
///
/// Lookup order: an explicit entry in `tool_policies` wins; otherwise a tool
/// listed in `high_risk_tools` is denied; otherwise the tool is allowed at
/// MEDIUM risk without approval.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicyRegistry {
    policies: HashMap<String, ToolPolicy>,
    high_risk: HashSet<String>,
}

impl ToolPolicyRegistry {
    pub fn from_rules(roe: &RulesOfEngagement) -> Self {
        Self {
            policies: roe
                .tool_policies
                .iter()
                .map(|(name, policy)| (normalize(name), *policy))
                .collect(),
            high_risk: roe.high_risk_tools.iter().map(|n| normalize(n)).collect(),
        }
    }

    pub fn is_tool_allowed(&self, name: &str) -> bool {
        let key = normalize(name);
        match self.policies.get(&key) {
            Some(policy) => policy.enabled,
            None => !self.high_risk.contains(&key),
        }
    }

    pub fn get_policy(&self, name: &str) -> ToolPolicy {
        let key = normalize(name);
        if let Some(policy) = self.policies.get(&key) {
            return *policy;
        }
        if self.high_risk.contains(&key) {
            return ToolPolicy {
                risk_level: RiskLevel::High,
                enabled: false,
                requires_approval: true,
            };
        }
        ToolPolicy::default()
    }

    pub fn is_high_risk(&self, name: &str) -> bool {
        self.high_risk.contains(&normalize(name))
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
