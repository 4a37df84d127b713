//! Read-only listing queries. Every `list_*` accepts an optional name
//! filter, a `filter_props` bag every returned entity must be a superset
//! of, and an optional `req_props` key list restricting which properties
//! come back with each entity.

use drbdmanage_model::{
    Assignment, Node, PropsContainer, Resource, Snapshot, SnapshotAssignment, Volume, VolumeState,
};
use drbdmanage_reconcile::ChangeNotifier;

use crate::facade::ServerFacade;

fn passes(props: &PropsContainer, filter_props: &PropsContainer) -> bool {
    filter_props.is_empty() || props.is_superset_of(filter_props)
}

impl<N: ChangeNotifier> ServerFacade<N> {
    pub fn list_nodes(
        &self,
        name_filter: Option<&str>,
        filter_props: &PropsContainer,
        req_props: Option<&[String]>,
    ) -> Vec<Node> {
        self.state
            .nodes
            .values()
            .filter(|n| name_filter.map_or(true, |f| n.name == f))
            .filter(|n| passes(&n.props, filter_props))
            .map(|n| Node {
                props: n.props.restricted_to(req_props),
                ..n.clone()
            })
            .collect()
    }

    pub fn list_resources(
        &self,
        name_filter: Option<&str>,
        filter_props: &PropsContainer,
        req_props: Option<&[String]>,
    ) -> Vec<Resource> {
        self.state
            .resources
            .values()
            .filter(|r| name_filter.map_or(true, |f| r.name == f))
            .filter(|r| passes(&r.props, filter_props))
            .map(|r| Resource {
                props: r.props.restricted_to(req_props),
                ..r.clone()
            })
            .collect()
    }

    pub fn list_volumes(
        &self,
        resource_filter: Option<&str>,
        filter_props: &PropsContainer,
        req_props: Option<&[String]>,
    ) -> Vec<Volume> {
        self.state
            .volumes
            .values()
            .filter(|v| resource_filter.map_or(true, |f| v.resource_name == f))
            .filter(|v| passes(&v.props, filter_props))
            .map(|v| Volume {
                props: v.props.restricted_to(req_props),
                ..v.clone()
            })
            .collect()
    }

    pub fn list_assignments(
        &self,
        node_filter: Option<&str>,
        resource_filter: Option<&str>,
        filter_props: &PropsContainer,
        req_props: Option<&[String]>,
    ) -> Vec<Assignment> {
        self.state
            .assignments
            .values()
            .filter(|a| node_filter.map_or(true, |f| a.node_name == f))
            .filter(|a| resource_filter.map_or(true, |f| a.resource_name == f))
            .filter(|a| passes(&a.props, filter_props))
            .map(|a| Assignment {
                props: a.props.restricted_to(req_props),
                ..a.clone()
            })
            .collect()
    }

    pub fn list_volume_states(
        &self,
        node_filter: Option<&str>,
        resource_filter: Option<&str>,
    ) -> Vec<VolumeState> {
        self.state
            .volume_states
            .values()
            .filter(|vs| node_filter.map_or(true, |f| vs.node_name == f))
            .filter(|vs| resource_filter.map_or(true, |f| vs.resource_name == f))
            .cloned()
            .collect()
    }

    pub fn list_snapshots(&self, resource_filter: Option<&str>) -> Vec<Snapshot> {
        self.state
            .snapshots
            .values()
            .filter(|s| resource_filter.map_or(true, |f| s.resource_name == f))
            .cloned()
            .collect()
    }

    pub fn list_snapshot_assignments(
        &self,
        resource_filter: Option<&str>,
        snapshot_filter: Option<&str>,
    ) -> Vec<SnapshotAssignment> {
        self.state
            .snapshot_assignments
            .values()
            .filter(|sa| resource_filter.map_or(true, |f| sa.resource_name == f))
            .filter(|sa| snapshot_filter.map_or(true, |f| sa.snapshot_name == f))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::BalancedDeployer;
    use drbdmanage_config::DrbdmanageConfig;
    use drbdmanage_model::AddressFamily;
    use drbdmanage_reconcile::NullNotifier;
    use drbdmanage_storage::backend::tests::FakeStorageBackend;
    use std::sync::Arc;

    fn facade(dir: &tempfile::TempDir) -> ServerFacade<NullNotifier> {
        ServerFacade::new(
            dir.path().join("drbdctrl.dat"),
            Arc::new(FakeStorageBackend::default()),
            NullNotifier,
            DrbdmanageConfig::default(),
            Box::new(BalancedDeployer),
            "alpha",
        )
        .unwrap()
    }

    #[test]
    fn list_nodes_filters_by_name_and_props() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        let mut aux = PropsContainer::new();
        aux.set("aux/site", "east");
        facade.create_node("alpha", "10.0.0.1", AddressFamily::Ipv4, &aux);
        facade.create_node("beta", "10.0.0.2", AddressFamily::Ipv4, &PropsContainer::new());

        assert_eq!(facade.list_nodes(None, &PropsContainer::new(), None).len(), 2);
        assert_eq!(facade.list_nodes(Some("alpha"), &PropsContainer::new(), None).len(), 1);

        let mut filter = PropsContainer::new();
        filter.set("aux/site", "east");
        let matched = facade.list_nodes(None, &filter, None);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "alpha");
    }

    #[test]
    fn list_volumes_req_props_restricts_returned_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        facade.create_resource("r0", None, &PropsContainer::new());
        let mut aux = PropsContainer::new();
        aux.set("aux/label", "fast");
        facade.create_volume("r0", 65536, &aux);

        let req = vec!["aux/label".to_string()];
        let volumes = facade.list_volumes(Some("r0"), &PropsContainer::new(), Some(&req));
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].props.get("aux/label"), Some("fast"));
        assert_eq!(volumes[0].props.len(), 1);
    }
}
