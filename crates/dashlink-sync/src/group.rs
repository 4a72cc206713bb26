//! Sync group registry.
//!
//! Each group holds its members with per-member mode flags and at most one
//! master. Members are kept ordered by chart id, so master reassignment after
//! the master leaves is deterministic. A group disappears with its last member.

use chrono::{DateTime, Utc};
use dashlink_core::{ChartId, GroupId, SyncMode, SyncModes};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// One group of synchronized charts.
#[derive(Debug, Clone)]
pub struct SyncGroup {
    pub id: GroupId,
    pub members: BTreeMap<ChartId, SyncModes>,
    pub master: Option<ChartId>,
    pub created_at: DateTime<Utc>,
}

impl SyncGroup {
    fn new(id: GroupId) -> Self {
        Self {
            id,
            members: BTreeMap::new(),
            master: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_master(&self, chart: &ChartId) -> bool {
        self.master.as_ref() == Some(chart)
    }
}

/// Result of adding a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    pub is_master: bool,
    /// Master before the join, when the join replaced it.
    pub replaced_master: Option<ChartId>,
}

/// Result of removing a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Left {
    pub group: GroupId,
    pub was_master: bool,
    /// Replacement master when the removed chart was master.
    pub new_master: Option<ChartId>,
    pub group_deleted: bool,
}

#[derive(Debug, Default)]
pub struct SyncGroupRegistry {
    groups: HashMap<GroupId, SyncGroup>,
    membership: HashMap<ChartId, GroupId>,
}

impl SyncGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `chart` to `group`, creating the group if needed.
    ///
    /// The chart becomes master when `is_master` is set or the group has none.
    /// A chart that already belongs to a group is moved.
    pub fn add_member(
        &mut self,
        group: &GroupId,
        chart: &ChartId,
        modes: SyncModes,
        is_master: bool,
    ) -> Joined {
        if self.membership.contains_key(chart) {
            self.remove_member(chart);
        }

        let entry = self
            .groups
            .entry(group.clone())
            .or_insert_with(|| SyncGroup::new(group.clone()));
        entry.members.insert(chart.clone(), modes);
        self.membership.insert(chart.clone(), group.clone());

        let becomes_master = is_master || entry.master.is_none();
        let previous = entry.master.clone();
        if becomes_master {
            entry.master = Some(chart.clone());
        }
        debug!(group = %group, chart = %chart, master = becomes_master, "Chart joined group");

        Joined {
            is_master: becomes_master,
            replaced_master: if becomes_master { previous } else { None },
        }
    }

    /// Remove `chart` from its group. Returns `None` for unknown charts.
    pub fn remove_member(&mut self, chart: &ChartId) -> Option<Left> {
        let group_id = self.membership.remove(chart)?;
        let group = self.groups.get_mut(&group_id)?;
        group.members.remove(chart);

        let was_master = group.is_master(chart);
        if group.members.is_empty() {
            self.groups.remove(&group_id);
            debug!(group = %group_id, "Group emptied and deleted");
            return Some(Left {
                group: group_id,
                was_master,
                new_master: None,
                group_deleted: true,
            });
        }

        let new_master = if was_master {
            group.master = group.members.keys().next().cloned();
            group.master.clone()
        } else {
            None
        };
        Some(Left {
            group: group_id,
            was_master,
            new_master,
            group_deleted: false,
        })
    }

    /// Make `chart` the master of `group`. Returns the previous master, or
    /// `None` when `chart` is not a member.
    pub fn set_master(&mut self, group: &GroupId, chart: &ChartId) -> Option<Option<ChartId>> {
        let entry = self.groups.get_mut(group)?;
        if !entry.members.contains_key(chart) {
            return None;
        }
        Some(entry.master.replace(chart.clone()))
    }

    pub fn get(&self, group: &GroupId) -> Option<&SyncGroup> {
        self.groups.get(group)
    }

    pub fn group_of(&self, chart: &ChartId) -> Option<&GroupId> {
        self.membership.get(chart)
    }

    pub fn modes(&self, chart: &ChartId) -> Option<SyncModes> {
        let group = self.groups.get(self.membership.get(chart)?)?;
        group.members.get(chart).copied()
    }

    pub fn set_mode(&mut self, chart: &ChartId, mode: SyncMode, enabled: bool) -> bool {
        let Some(group_id) = self.membership.get(chart) else {
            return false;
        };
        match self
            .groups
            .get_mut(group_id)
            .and_then(|g| g.members.get_mut(chart))
        {
            Some(modes) => {
                modes.set(mode, enabled);
                true
            }
            None => false,
        }
    }

    /// Other members of `source`'s group with `mode` enabled.
    pub fn targets(&self, source: &ChartId, mode: SyncMode) -> Vec<ChartId> {
        let Some(group) = self
            .membership
            .get(source)
            .and_then(|id| self.groups.get(id))
        else {
            return Vec::new();
        };
        group
            .members
            .iter()
            .filter(|(id, modes)| *id != source && modes.is_enabled(mode))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn groups(&self) -> impl Iterator<Item = &SyncGroup> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn chart_count(&self) -> usize {
        self.membership.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<ChartId> {
        names.iter().map(|n| ChartId::from(*n)).collect()
    }

    #[test]
    fn test_first_member_becomes_master() {
        let mut registry = SyncGroupRegistry::new();
        let g = GroupId::main();
        assert!(registry.add_member(&g, &"a".into(), SyncModes::default(), false).is_master);
        assert!(!registry.add_member(&g, &"b".into(), SyncModes::default(), false).is_master);
        assert_eq!(registry.get(&g).unwrap().master, Some("a".into()));
    }

    #[test]
    fn test_explicit_master_replaces() {
        let mut registry = SyncGroupRegistry::new();
        let g = GroupId::main();
        registry.add_member(&g, &"a".into(), SyncModes::default(), false);
        let joined = registry.add_member(&g, &"b".into(), SyncModes::default(), true);
        assert!(joined.is_master);
        assert_eq!(joined.replaced_master, Some("a".into()));
        assert_eq!(registry.get(&g).unwrap().master, Some("b".into()));
    }

    #[test]
    fn test_master_reassigned_on_leave() {
        let mut registry = SyncGroupRegistry::new();
        let g = GroupId::main();
        for id in ["m", "c", "b"] {
            registry.add_member(&g, &id.into(), SyncModes::default(), false);
        }
        let left = registry.remove_member(&"m".into()).unwrap();
        assert!(left.was_master);
        assert_eq!(left.new_master, Some("b".into()));
        assert_eq!(registry.get(&g).unwrap().master, Some("b".into()));
    }

    #[test]
    fn test_last_member_deletes_group() {
        let mut registry = SyncGroupRegistry::new();
        let g = GroupId::new("g1");
        registry.add_member(&g, &"a".into(), SyncModes::default(), false);
        let left = registry.remove_member(&"a".into()).unwrap();
        assert!(left.group_deleted);
        assert!(registry.get(&g).is_none());
        assert!(registry.is_empty());
        assert!(registry.remove_member(&"a".into()).is_none());
    }

    #[test]
    fn test_targets_respect_flags() {
        let mut registry = SyncGroupRegistry::new();
        let g = GroupId::main();
        registry.add_member(&g, &"a".into(), SyncModes::default(), false);
        registry.add_member(&g, &"b".into(), SyncModes::default(), false);
        registry.add_member(&g, &"c".into(), SyncModes::only(&[SyncMode::Zoom]), false);
        registry.add_member(&GroupId::new("other"), &"d".into(), SyncModes::all(), false);

        assert_eq!(registry.targets(&"a".into(), SyncMode::Time), ids(&["b"]));
        assert_eq!(registry.targets(&"a".into(), SyncMode::Zoom), ids(&["b", "c"]));

        registry.set_mode(&"b".into(), SyncMode::Time, false);
        assert!(registry.targets(&"a".into(), SyncMode::Time).is_empty());
    }

    #[test]
    fn test_set_master_requires_membership() {
        let mut registry = SyncGroupRegistry::new();
        let g = GroupId::main();
        registry.add_member(&g, &"a".into(), SyncModes::default(), false);
        registry.add_member(&g, &"b".into(), SyncModes::default(), false);
        registry.add_member(&GroupId::new("x"), &"z".into(), SyncModes::default(), false);

        assert_eq!(registry.set_master(&g, &"z".into()), None);
        assert_eq!(registry.set_master(&g, &"b".into()), Some(Some("a".into())));
    }

    #[test]
    fn test_move_between_groups() {
        let mut registry = SyncGroupRegistry::new();
        registry.add_member(&GroupId::new("g1"), &"a".into(), SyncModes::default(), false);
        registry.add_member(&GroupId::new("g2"), &"a".into(), SyncModes::default(), false);
        assert!(registry.get(&GroupId::new("g1")).is_none());
        assert_eq!(registry.group_of(&"a".into()), Some(&GroupId::new("g2")));
        assert_eq!(registry.chart_count(), 1);
    }
}
