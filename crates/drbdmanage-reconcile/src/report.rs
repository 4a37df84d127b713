//! Summarizes the outcome of a reconciliation run.

use drbdmanage_model::AssignmentKey;

/// Per-assignment and garbage-collection outcome of one reconcile run.
/// Never carries an error variant for storage/admin-tool failures — those
/// are recorded here rather than aborting the run, per the per-assignment
/// failure semantics.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub succeeded: Vec<AssignmentKey>,
    pub failed: Vec<(AssignmentKey, String)>,
    pub removed_assignments: u32,
    pub removed_nodes: u32,
    pub removed_volume_states: u32,
    pub removed_volumes: u32,
    pub removed_resources: u32,
}

impl RunReport {
    pub fn record_ok(&mut self, key: &AssignmentKey) {
        self.succeeded.push(key.clone());
    }

    pub fn record_failed(&mut self, key: &AssignmentKey, reason: impl Into<String>) {
        self.failed.push((key.clone(), reason.into()));
    }

    pub fn merge(&mut self, other: RunReport) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.removed_assignments += other.removed_assignments;
        self.removed_nodes += other.removed_nodes;
        self.removed_volume_states += other.removed_volume_states;
        self.removed_volumes += other.removed_volumes;
        self.removed_resources += other.removed_resources;
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_combines_both_reports() {
        let mut a = RunReport::default();
        a.record_ok(&("alpha".to_string(), "res0".to_string()));
        let mut b = RunReport::default();
        b.record_failed(&("bravo".to_string(), "res0".to_string()), "boom");
        a.merge(b);
        assert_eq!(a.succeeded.len(), 1);
        assert_eq!(a.failed.len(), 1);
        assert!(!a.is_clean());
    }
}
