use bitflags::bitflags;

use crate::proto;

#[rustfmt::skip]
bitflags! {
  pub struct NodeCapabilities: u32 {
    const STAGE_UNSTAGE_VOLUME         = 0b_0000_0001;
    const GET_VOLUME_STATS             = 0b_0000_0010;
    const EXPAND_VOLUME                = 0b_0000_0100;
    const VOLUME_CONDITION             = 0b_0000_1000;

    /// The single-node access modes are understood.
    const SINGLE_NODE_MULTI_WRITER     = 0b_0001_0000;
  }
}

use proto::node_service_capability::rpc::Type;

const WIRE_TYPES: &[(NodeCapabilities, Type)] = &[
  (NodeCapabilities::STAGE_UNSTAGE_VOLUME, Type::StageUnstageVolume),
  (NodeCapabilities::GET_VOLUME_STATS, Type::GetVolumeStats),
  (NodeCapabilities::EXPAND_VOLUME, Type::ExpandVolume),
  (NodeCapabilities::VOLUME_CONDITION, Type::VolumeCondition),
  (NodeCapabilities::SINGLE_NODE_MULTI_WRITER, Type::SingleNodeMultiWriter),
];

impl From<NodeCapabilities> for proto::NodeGetCapabilitiesResponse {
  fn from(value: NodeCapabilities) -> Self {
    let capabilities = WIRE_TYPES
      .iter()
      .filter(|(flag, _)| value.contains(*flag))
      .map(|(_, ty)| proto::NodeServiceCapability {
        r#type: Some(proto::node_service_capability::Type::Rpc(
          proto::node_service_capability::Rpc { r#type: *ty as i32 },
        )),
      })
      .collect();

    proto::NodeGetCapabilitiesResponse { capabilities }
  }
}
