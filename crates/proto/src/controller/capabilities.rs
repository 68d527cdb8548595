use bitflags::bitflags;

use crate::proto;

#[rustfmt::skip]
bitflags! {
  pub struct ControllerCapabilities: u32 {
    const CREATE_DELETE_VOLUME         = 0b_0000_0000_0000_0001;
    const PUBLISH_UNPUBLISH_VOLUME     = 0b_0000_0000_0000_0010;
    const LIST_VOLUMES                 = 0b_0000_0000_0000_0100;
    const GET_CAPACITY                 = 0b_0000_0000_0000_1000;
    const CREATE_DELETE_SNAPSHOT       = 0b_0000_0000_0001_0000;
    const LIST_SNAPSHOTS               = 0b_0000_0000_0010_0000;
    const CLONE_VOLUME                 = 0b_0000_0000_0100_0000;

    /// `ControllerPublishVolume.readonly` is honored.
    const PUBLISH_READONLY             = 0b_0000_0000_1000_0000;
    const EXPAND_VOLUME                = 0b_0000_0001_0000_0000;

    /// List entries carry the nodes a volume is published on.
    const LIST_VOLUMES_PUBLISHED_NODES = 0b_0000_0010_0000_0000;
    const VOLUME_CONDITION             = 0b_0000_0100_0000_0000;
    const GET_VOLUME                   = 0b_0000_1000_0000_0000;

    /// The `SINGLE_NODE_SINGLE_WRITER` and `SINGLE_NODE_MULTI_WRITER`
    /// access modes are understood.
    const SINGLE_NODE_MULTI_WRITER     = 0b_0001_0000_0000_0000;
  }
}

use proto::controller_service_capability::rpc::Type;

const WIRE_TYPES: &[(ControllerCapabilities, Type)] = &[
  (ControllerCapabilities::CREATE_DELETE_VOLUME, Type::CreateDeleteVolume),
  (ControllerCapabilities::PUBLISH_UNPUBLISH_VOLUME, Type::PublishUnpublishVolume),
  (ControllerCapabilities::LIST_VOLUMES, Type::ListVolumes),
  (ControllerCapabilities::GET_CAPACITY, Type::GetCapacity),
  (ControllerCapabilities::CREATE_DELETE_SNAPSHOT, Type::CreateDeleteSnapshot),
  (ControllerCapabilities::LIST_SNAPSHOTS, Type::ListSnapshots),
  (ControllerCapabilities::CLONE_VOLUME, Type::CloneVolume),
  (ControllerCapabilities::PUBLISH_READONLY, Type::PublishReadonly),
  (ControllerCapabilities::EXPAND_VOLUME, Type::ExpandVolume),
  (ControllerCapabilities::LIST_VOLUMES_PUBLISHED_NODES, Type::ListVolumesPublishedNodes),
  (ControllerCapabilities::VOLUME_CONDITION, Type::VolumeCondition),
  (ControllerCapabilities::GET_VOLUME, Type::GetVolume),
  (ControllerCapabilities::SINGLE_NODE_MULTI_WRITER, Type::SingleNodeMultiWriter),
];

impl From<ControllerCapabilities> for proto::ControllerGetCapabilitiesResponse {
  fn from(value: ControllerCapabilities) -> Self {
    let capabilities = WIRE_TYPES
      .iter()
      .filter(|(flag, _)| value.contains(*flag))
      .map(|(_, ty)| proto::ControllerServiceCapability {
        r#type: Some(proto::controller_service_capability::Type::Rpc(
          proto::controller_service_capability::Rpc { r#type: *ty as i32 },
        )),
      })
      .collect();

    proto::ControllerGetCapabilitiesResponse { capabilities }
  }
}
