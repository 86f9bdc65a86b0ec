//! Cascade Rule Engine
//!
//! Pure decision function mapping a closed trigger position to the dependent
//! positions that should (or should not) be closed.
//!
//! Rule table:
//!
//! | Trigger | Target | Condition                         |
//! |---------|--------|-----------------------------------|
//! | owner   | shadow | shadow account has `shadow_close` |
//! | owner   | slave  | always                            |
//! | shadow  | slave  | always                            |
//!
//! Slave has no outgoing edges and never triggers anything.

use serde::{Deserialize, Serialize};

use super::account::{AccountConfig, AccountRole};
use super::association::Association;

pub const REASON_ALWAYS: &str = "mandatory close";
pub const REASON_CONDITION_MET: &str = "condition met";
pub const REASON_CONDITION_NOT_MET: &str = "condition not met";
pub const REASON_NO_RULE: &str = "no applicable rule";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCondition {
    Always,
    /// Only when the shadow account has `shadow_close` enabled
    ShadowClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeRule {
    pub trigger: AccountRole,
    pub target: AccountRole,
    pub condition: RuleCondition,
}

pub const RULES: [CascadeRule; 3] = [
    CascadeRule {
        trigger: AccountRole::Owner,
        target: AccountRole::Shadow,
        condition: RuleCondition::ShadowClose,
    },
    CascadeRule {
        trigger: AccountRole::Owner,
        target: AccountRole::Slave,
        condition: RuleCondition::Always,
    },
    CascadeRule {
        trigger: AccountRole::Shadow,
        target: AccountRole::Slave,
        condition: RuleCondition::Always,
    },
];

pub fn rule_for(trigger: AccountRole, target: AccountRole) -> Option<&'static CascadeRule> {
    RULES.iter().find(|r| r.trigger == trigger && r.target == target)
}

/// Verdict for one dependent position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeTarget {
    pub target_role: AccountRole,
    pub target_position_id: String,
    pub should_close: bool,
    pub reason: String,
}

impl CascadeTarget {
    fn close(role: AccountRole, position_id: &str, reason: &str) -> Self {
        Self {
            target_role: role,
            target_position_id: position_id.to_string(),
            should_close: true,
            reason: reason.to_string(),
        }
    }

    fn skip(role: AccountRole, position_id: &str, reason: &str) -> Self {
        Self {
            should_close: false,
            ..Self::close(role, position_id, reason)
        }
    }
}

/// Decide which dependents of `trigger_position_id` to close.
///
/// Only associations holding `trigger_position_id` in the `trigger_role` slot
/// are considered. Every other populated slot is a candidate and yields
/// exactly one verdict; a target reachable through several associations is
/// reported once. `config_lookup` is queried only for conditional rules.
pub fn decide<F>(
    trigger_role: AccountRole,
    trigger_position_id: &str,
    associations: &[Association],
    config_lookup: F,
) -> Vec<CascadeTarget>
where
    F: Fn(AccountRole) -> Option<AccountConfig>,
{
    if trigger_role == AccountRole::Slave {
        return Vec::new();
    }

    let mut targets: Vec<CascadeTarget> = Vec::new();

    for association in associations
        .iter()
        .filter(|a| a.references(trigger_role, trigger_position_id))
    {
        for (role, position_id) in association.populated() {
            if role == trigger_role {
                continue;
            }
            if targets
                .iter()
                .any(|t| t.target_role == role && t.target_position_id == position_id)
            {
                continue;
            }

            let verdict = match rule_for(trigger_role, role) {
                None => CascadeTarget::skip(role, position_id, REASON_NO_RULE),
                Some(rule) => match rule.condition {
                    RuleCondition::Always => CascadeTarget::close(role, position_id, REASON_ALWAYS),
                    RuleCondition::ShadowClose => {
                        let enabled = config_lookup(AccountRole::Shadow)
                            .map_or(false, |c| c.shadow_close);
                        if enabled {
                            CascadeTarget::close(role, position_id, REASON_CONDITION_MET)
                        } else {
                            CascadeTarget::skip(role, position_id, REASON_CONDITION_NOT_MET)
                        }
                    }
                },
            };
            targets.push(verdict);
        }
    }

    targets
}
