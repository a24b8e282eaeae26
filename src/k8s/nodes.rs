use crate::error::Result;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::debug;

/// Node labels that mark control plane members, which never receive traffic
pub const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

const INTERNAL_IP: &str = "InternalIP";

fn is_control_plane(node: &Node) -> bool {
    node.metadata.labels.as_ref().is_some_and(|labels| {
        CONTROL_PLANE_LABELS
            .iter()
            .any(|label| labels.contains_key(*label))
    })
}

fn is_unschedulable(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false)
}

/// Internal IPs of the schedulable worker nodes, in list order
#[must_use]
pub fn node_addresses(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter(|node| !is_control_plane(node) && !is_unschedulable(node))
        .filter_map(|node| node.status.as_ref()?.addresses.as_ref())
        .flat_map(|addresses| {
            addresses
                .iter()
                .filter(|address| address.type_ == INTERNAL_IP)
                .map(|address| address.address.clone())
        })
        .collect()
}

/// # Errors
///
/// Will return `Err` if the nodes can not be listed from the k8s cluster api
pub async fn list_node_addresses(client: Client) -> Result<Vec<String>> {
    let nodes: Api<Node> = Api::all(client);
    let node_list = nodes.list(&ListParams::default()).await?;

    let addresses = node_addresses(&node_list.items);
    debug!("Found {} worker node addresses", addresses.len());
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeSpec, NodeStatus};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn node(name: &str, labels: &[&str], addresses: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|label| ((*label).to_string(), String::new()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..ObjectMeta::default()
            },
            status: Some(NodeStatus {
                addresses: Some(
                    addresses
                        .iter()
                        .map(|(type_, address)| NodeAddress {
                            type_: (*type_).to_string(),
                            address: (*address).to_string(),
                        })
                        .collect(),
                ),
                ..NodeStatus::default()
            }),
            ..Node::default()
        }
    }

    #[test]
    fn test_worker_internal_ips_only() {
        let nodes = vec![
            node(
                "cp-1",
                &["node-role.kubernetes.io/control-plane"],
                &[("InternalIP", "10.0.0.1")],
            ),
            node(
                "worker-1",
                &[],
                &[("InternalIP", "10.0.0.2"), ("Hostname", "worker-1")],
            ),
            node("old-master", &["node-role.kubernetes.io/master"], &[("InternalIP", "10.0.0.3")]),
            node("worker-2", &["topology.kubernetes.io/zone"], &[("ExternalIP", "34.1.1.1"), ("InternalIP", "10.0.0.4")]),
        ];

        assert_eq!(node_addresses(&nodes), vec!["10.0.0.2", "10.0.0.4"]);
    }

    #[test]
    fn test_cordoned_node_is_skipped() {
        let mut cordoned = node("worker-9", &[], &[("InternalIP", "10.0.0.9")]);
        cordoned.spec = Some(NodeSpec {
            unschedulable: Some(true),
            ..NodeSpec::default()
        });
        let mut uncordoned = node("worker-10", &[], &[("InternalIP", "10.0.0.10")]);
        uncordoned.spec = Some(NodeSpec {
            unschedulable: Some(false),
            ..NodeSpec::default()
        });

        assert_eq!(node_addresses(&[cordoned, uncordoned]), vec!["10.0.0.10"]);
    }

    #[test]
    fn test_node_without_status_is_skipped() {
        let nodes = vec![Node::default()];
        assert!(node_addresses(&nodes).is_empty());
    }
}
