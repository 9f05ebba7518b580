use serde::{Deserialize, Serialize};

use super::actions::RuleAction;
use super::arn::RuleArn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleCondition {
    HostHeader(Vec<String>),
    PathPattern(Vec<String>),
    HttpHeader { name: String, values: Vec<String> },
    QueryString { key: Option<String>, value: String },
    HttpRequestMethod(Vec<String>),
    SourceIp(Vec<String>),
}

/// One ordered routing entry under a Listener (spec §3 Rule).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub arn: Option<RuleArn>,
    pub priority: u32,
    /// Conjunction: all conditions must match (spec §3 Rule invariant).
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<RuleAction>,
}

pub const MIN_PRIORITY: u32 = 1;
pub const MAX_PRIORITY: u32 = 50_000;

impl Rule {
    /// Priority is the stable pairing key within one listener (spec §4.7).
    pub fn key(&self) -> u32 {
        self.priority
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(format!(
                "rule priority {} out of range [{MIN_PRIORITY}, {MAX_PRIORITY}]",
                self.priority
            ));
        }
        let terminal_count = self.actions.iter().filter(|a| a.is_terminal()).count();
        if terminal_count != 1 {
            return Err(format!(
                "rule at priority {} must have exactly one terminal action, found {terminal_count}",
                self.priority
            ));
        }
        for action in &self.actions {
            action.validate().map_err(|e| format!("priority {}: {e}", self.priority))?;
        }
        Ok(())
    }

    /// A replace for a Rule is modeled as delete-at-old-priority + create-at-new-priority
    /// (spec §4.7: "priority (treated as delete+create)").
    pub fn dirty_mask(&self, current: &Rule) -> RuleDirtyMask {
        let mut mask = RuleDirtyMask::empty();
        if self.conditions != current.conditions {
            mask |= RuleDirtyMask::CONDITIONS;
        }
        if !actions_equal(&self.actions, &current.actions) {
            mask |= RuleDirtyMask::ACTIONS;
        }
        mask
    }
}

fn actions_equal(a: &[RuleAction], b: &[RuleAction]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equal(y))
}

/// Validates priority uniqueness across all rules of one listener (spec §8).
pub fn validate_unique_priorities(rules: &[Rule]) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for rule in rules {
        if !seen.insert(rule.priority) {
            return Err(format!("duplicate rule priority {}", rule.priority));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleDirtyMask(u8);

impl RuleDirtyMask {
    pub const CONDITIONS: Self = Self(1 << 0);
    pub const ACTIONS: Self = Self(1 << 1);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOrAssign for RuleDirtyMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitOr for RuleDirtyMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::actions::{FixedResponseAction, RuleAction};

    fn fixed_response_rule(priority: u32) -> Rule {
        Rule {
            arn: None,
            priority,
            conditions: vec![RuleCondition::PathPattern(vec!["/".into()])],
            actions: vec![RuleAction::FixedResponse(FixedResponseAction {
                status_code: 200,
                content_type: None,
                message_body: None,
            })],
        }
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let rule = fixed_response_rule(50_001);
        assert!(rule.validate().is_err());
    }

    #[test]
    fn rejects_zero_or_multiple_terminal_actions() {
        let mut rule = fixed_response_rule(1);
        rule.actions.push(RuleAction::FixedResponse(FixedResponseAction {
            status_code: 404,
            content_type: None,
            message_body: None,
        }));
        assert!(rule.validate().is_err());
    }

    #[test]
    fn detects_duplicate_priorities() {
        let rules = vec![fixed_response_rule(10), fixed_response_rule(10)];
        assert!(validate_unique_priorities(&rules).is_err());
    }

    #[test]
    fn unique_priorities_pass() {
        let rules = vec![fixed_response_rule(10), fixed_response_rule(20)];
        assert!(validate_unique_priorities(&rules).is_ok());
    }
}
