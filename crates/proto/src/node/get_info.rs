use super::Topology;
use crate::proto;
use std::convert::TryFrom;

#[derive(Debug, Clone)]
pub struct NodeGetInfoResponse {
  /// Identifies the node in `ControllerPublishVolume`. At most 192 bytes.
  node_id: String,

  /// Zero leaves the limit to the orchestrator.
  max_volumes_per_node: u32,

  accessible_topology: Option<Topology>,
}

impl NodeGetInfoResponse {
  pub fn new(node_id: impl Into<String>) -> Self {
    NodeGetInfoResponse {
      node_id: node_id.into(),
      max_volumes_per_node: 0,
      accessible_topology: None,
    }
  }

  pub fn with_max_volumes_per_node(mut self, max_volumes_per_node: u32) -> Self {
    self.max_volumes_per_node = max_volumes_per_node;
    self
  }

  /// Only meaningful when the plugin advertises
  /// `VOLUME_ACCESSIBILITY_CONSTRAINTS`.
  pub fn with_accessible_topology(mut self, accessible_topology: Topology) -> Self {
    self.accessible_topology = Some(accessible_topology);
    self
  }

  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  #[inline]
  pub fn max_volumes_per_node(&self) -> u32 {
    self.max_volumes_per_node
  }

  #[inline]
  pub fn accessible_topology(&self) -> Option<&Topology> {
    self.accessible_topology.as_ref()
  }
}

impl TryFrom<NodeGetInfoResponse> for proto::NodeGetInfoResponse {
  type Error = tonic::Status;

  fn try_from(value: NodeGetInfoResponse) -> Result<Self, Self::Error> {
    if value.node_id.len() > 192 {
      return Err(tonic::Status::internal(
        "NodeGetInfoResponse.node_id is longer than 192 bytes",
      ));
    }

    Ok(proto::NodeGetInfoResponse {
      node_id: value.node_id,
      max_volumes_per_node: i64::from(value.max_volumes_per_node),
      accessible_topology: value
        .accessible_topology
        .map(|segments| proto::Topology { segments }),
    })
  }
}
