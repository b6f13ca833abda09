//! Security-group rule planning.
//!
//! New inbound rules take the lowest free priorities at or above
//! [`MIN_PRIORITY`]; a port that already has its rule is left alone.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub const MIN_PRIORITY: u16 = 100;
pub const MAX_PRIORITY: u16 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub name: String,
    pub port: u16,
    pub priority: u16,
    pub direction: Direction,
    pub allow: bool,
}

impl SecurityRule {
    /// Allow any source to reach `port` over any protocol.
    pub fn allow_inbound(port: u16, priority: u16) -> Self {
        Self {
            name: rule_name(port),
            port,
            priority,
            direction: Direction::Inbound,
            allow: true,
        }
    }
}

pub fn rule_name(port: u16) -> String {
    format!("AllowAnyCustom{}Inbound", port)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Exceeded max NSG priority limit of 4096: {requested} rules requested, {available} priorities free")]
pub struct PriorityExhausted {
    pub requested: usize,
    pub available: usize,
}

/// The `count` lowest priorities in `MIN_PRIORITY..=MAX_PRIORITY` not in `used`.
///
/// All or nothing: fails without a partial assignment when the range runs out.
pub fn allocate_priorities(
    used: &BTreeSet<u16>,
    count: usize,
) -> Result<Vec<u16>, PriorityExhausted> {
    let free: Vec<u16> = (MIN_PRIORITY..=MAX_PRIORITY)
        .filter(|p| !used.contains(p))
        .take(count)
        .collect();
    if free.len() < count {
        return Err(PriorityExhausted {
            requested: count,
            available: free.len(),
        });
    }
    Ok(free)
}

/// Rules that must be added so every port in `ports` is open.
pub fn plan_port_rules(
    existing: &[SecurityRule],
    ports: &[u16],
) -> Result<Vec<SecurityRule>, PriorityExhausted> {
    let names: BTreeSet<&str> = existing.iter().map(|r| r.name.as_str()).collect();
    let used: BTreeSet<u16> = existing
        .iter()
        .filter(|r| r.direction == Direction::Inbound)
        .map(|r| r.priority)
        .collect();

    let mut seen = BTreeSet::new();
    let missing: Vec<u16> = ports
        .iter()
        .copied()
        .filter(|port| seen.insert(*port) && !names.contains(rule_name(*port).as_str()))
        .collect();

    let priorities = allocate_priorities(&used, missing.len())?;
    Ok(missing
        .into_iter()
        .zip(priorities)
        .map(|(port, priority)| SecurityRule::allow_inbound(port, priority))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn existing(priorities: &[(u16, u16)]) -> Vec<SecurityRule> {
        priorities
            .iter()
            .map(|(port, prio)| SecurityRule::allow_inbound(*port, *prio))
            .collect()
    }

    #[test]
    fn fills_gaps_before_extending() {
        let rules = existing(&[(9000, 100), (9001, 101), (9005, 105)]);
        let planned = plan_port_rules(&rules, &[22, 80, 443]).unwrap();
        let priorities: Vec<u16> = planned.iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![102, 103, 104]);
        assert_eq!(planned[0].name, "AllowAnyCustom22Inbound");
    }

    #[test]
    fn empty_group_starts_at_min_priority() {
        let planned = plan_port_rules(&[], &[22, 80]).unwrap();
        assert_eq!(planned[0].priority, 100);
        assert_eq!(planned[1].priority, 101);
    }

    #[test]
    fn ports_with_existing_rule_are_skipped() {
        let rules = existing(&[(22, 100)]);
        let planned = plan_port_rules(&rules, &[22, 80, 80]).unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].port, 80);
        assert_eq!(planned[0].priority, 101);
    }

    #[test]
    fn outbound_priorities_do_not_block_inbound() {
        let mut rules = existing(&[]);
        rules.push(SecurityRule {
            name: "DenyOut".into(),
            port: 25,
            priority: 100,
            direction: Direction::Outbound,
            allow: false,
        });
        let planned = plan_port_rules(&rules, &[443]).unwrap();
        assert_eq!(planned[0].priority, 100);
    }

    #[test]
    fn exhaustion_fails_whole_plan() {
        let used: BTreeSet<u16> = (MIN_PRIORITY..MAX_PRIORITY).collect();
        assert_eq!(allocate_priorities(&used, 1).unwrap(), vec![MAX_PRIORITY]);
        let err = allocate_priorities(&used, 2).unwrap_err();
        assert_eq!(err.available, 1);
        assert!(err.to_string().contains("4096"));
    }
}
