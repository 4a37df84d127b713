//! Generates DRBD `.res` configuration file text for a resource.

use std::fmt::Write as _;

use drbdmanage_model::{Assignment, Node, Resource, Volume, VolumeState};

/// One node's view of a resource, gathered from the domain model for
/// rendering into a `.res` file's `on <host> { ... }` block.
pub struct NodeView<'a> {
    pub node: &'a Node,
    pub assignment: &'a Assignment,
    pub volume_states: Vec<&'a VolumeState>,
}

/// Renders a complete `.res` file for `resource`, covering every node it is
/// currently assigned to.
pub fn render_resource_config(
    resource: &Resource,
    volumes: &[&Volume],
    nodes: &[NodeView<'_>],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "resource {} {{", resource.name);
    let _ = writeln!(out, "    net {{");
    let _ = writeln!(out, "        shared-secret \"{}\";", resource.secret);
    let _ = writeln!(out, "    }}");

    for view in nodes {
        let af = match view.node.af {
            drbdmanage_model::AddressFamily::Ipv4 => "ipv4",
            drbdmanage_model::AddressFamily::Ipv6 => "ipv6",
        };
        let _ = writeln!(out, "    on {} {{", view.node.name);
        let _ = writeln!(
            out,
            "        address {} {}:{};",
            af, view.node.addr, resource.port
        );
        let _ = writeln!(out, "        node-id {};", view.assignment.node_id_in_res);

        for volume in volumes {
            let state = view
                .volume_states
                .iter()
                .find(|vs| vs.vol_nr == volume.vol_nr);
            let _ = writeln!(out, "        volume {} {{", volume.vol_nr);
            let _ = writeln!(out, "            device minor {};", volume.minor);
            let disk = state
                .and_then(|vs| vs.blockdevice_path.as_deref())
                .unwrap_or("none");
            let _ = writeln!(out, "            disk {disk};");
            let _ = writeln!(out, "            meta-disk internal;");
            let _ = writeln!(out, "        }}");
        }

        let _ = writeln!(out, "    }}");
    }

    let _ = writeln!(out, "}}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use drbdmanage_model::AddressFamily;
    use drbdmanage_types::{assg_flags, MinorNr, NodeId, PortNr, StateFlags, VolNr};

    #[test]
    fn renders_resource_with_one_node_and_volume() {
        let resource = Resource {
            name: "res0".to_string(),
            port: PortNr::new(7000),
            secret: "s3cr3t".to_string(),
            cstate: StateFlags::NONE,
            tstate: StateFlags::NONE,
            props: Default::default(),
        };
        let volume = Volume {
            resource_name: "res0".to_string(),
            vol_nr: VolNr::new(0),
            minor: MinorNr::new(100),
            size_kib: 1024,
            cstate: StateFlags::NONE,
            tstate: StateFlags::NONE,
            props: Default::default(),
        };
        let node = Node {
            name: "alpha".to_string(),
            node_id: NodeId::new(0),
            addr: "10.0.0.1".to_string(),
            af: AddressFamily::Ipv4,
            poolsize_kib: None,
            poolfree_kib: None,
            cstate: StateFlags::NONE,
            tstate: StateFlags::NONE,
            props: Default::default(),
        };
        let assignment = Assignment {
            node_name: "alpha".to_string(),
            resource_name: "res0".to_string(),
            node_id_in_res: NodeId::new(0),
            cstate: StateFlags::NONE,
            tstate: StateFlags::NONE.set(assg_flags::DEPLOY),
            props: Default::default(),
            failure_count: 0,
        };
        let vol_state = VolumeState {
            node_name: "alpha".to_string(),
            resource_name: "res0".to_string(),
            vol_nr: VolNr::new(0),
            blockdevice_path: Some("/dev/drbdpool/res0_0".to_string()),
            cstate: StateFlags::NONE,
            tstate: StateFlags::NONE,
            props: Default::default(),
        };

        let nodes = [NodeView {
            node: &node,
            assignment: &assignment,
            volume_states: vec![&vol_state],
        }];
        let rendered = render_resource_config(&resource, &[&volume], &nodes);

        assert!(rendered.contains("resource res0 {"));
        assert!(rendered.contains("on alpha {"));
        assert!(rendered.contains("address ipv4 10.0.0.1:7000;"));
        assert!(rendered.contains("disk /dev/drbdpool/res0_0;"));
        assert!(rendered.contains("device minor 100;"));
    }
}
