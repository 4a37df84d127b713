//! The pluggable deployer policy used by `auto_deploy`/`auto_undeploy`.
//!
//! The concrete placement algorithm is an external collaborator behind a
//! pluggable interface; what belongs here is the trait the façade drives
//! and a simple default so `auto_deploy` has something to call.

use drbdmanage_model::Node;

/// Chooses which nodes a resource should be deployed to.
pub trait Deployer {
    /// Returns up to `count` node names, preferring ones most able to take
    /// the new assignment. `candidates` excludes nodes already assigned.
    fn select_nodes(&self, candidates: &[&Node], count: usize) -> Vec<String>;
}

/// Picks nodes by descending free pool space, treating an unknown
/// `poolfree_kib` as least preferred.
#[derive(Debug, Default, Clone, Copy)]
pub struct BalancedDeployer;

impl Deployer for BalancedDeployer {
    fn select_nodes(&self, candidates: &[&Node], count: usize) -> Vec<String> {
        let mut sorted: Vec<&&Node> = candidates.iter().collect();
        sorted.sort_by_key(|node| std::cmp::Reverse(node.poolfree_kib.unwrap_or(0)));
        sorted
            .into_iter()
            .take(count)
            .map(|node| node.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drbdmanage_model::AddressFamily;
    use drbdmanage_types::{NodeId, StateFlags};

    fn node(name: &str, free_kib: Option<u64>) -> Node {
        Node {
            name: name.to_string(),
            node_id: NodeId::new(0),
            addr: "10.0.0.1".to_string(),
            af: AddressFamily::Ipv4,
            poolsize_kib: None,
            poolfree_kib: free_kib,
            cstate: StateFlags::NONE,
            tstate: StateFlags::NONE,
            props: Default::default(),
        }
    }

    #[test]
    fn picks_nodes_with_most_free_space_first() {
        let a = node("alpha", Some(100));
        let b = node("bravo", Some(900));
        let c = node("charlie", Some(500));
        let deployer = BalancedDeployer;
        let picked = deployer.select_nodes(&[&a, &b, &c], 2);
        assert_eq!(picked, vec!["bravo".to_string(), "charlie".to_string()]);
    }

    #[test]
    fn unknown_pool_state_is_least_preferred() {
        let a = node("alpha", None);
        let b = node("bravo", Some(1));
        let deployer = BalancedDeployer;
        let picked = deployer.select_nodes(&[&a, &b], 1);
        assert_eq!(picked, vec!["bravo".to_string()]);
    }
}
