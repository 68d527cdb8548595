mod capacity;
mod labels;

pub use capacity::volume_size_from_capacity_range;
pub use labels::{merge_labels, parse_labels, LabelParseError};

use crate::{
  gateway::{IdempotentGateway, VolumeGateway},
  CreateOpts, Readiness, ServerId, Volume, VolumeError, VolumeId, DEVICE_PATH_KEY,
  FS_FORMAT_OPTIONS_KEY, TOPOLOGY_KEY,
};
use async_trait::async_trait;
use csi_proto::controller::{
  self as csi, AccessMode, ControllerCapabilities, ControllerExpandVolumeError,
  ControllerExpandVolumeRequest, ControllerExpandVolumeResponse, ControllerPublishVolumeError,
  ControllerPublishVolumeRequest, ControllerPublishVolumeResponse, ControllerService,
  ControllerUnpublishVolumeError, ControllerUnpublishVolumeRequest, CreateVolumeError,
  CreateVolumeRequest, DeleteVolumeError, DeleteVolumeRequest, ListVolumesEntry, ListVolumesError,
  ListVolumesRequest, ListVolumesResponse, Topology, TopologyRequirement,
  ValidateVolumeCapabilitiesError, ValidateVolumeCapabilitiesRequest,
  ValidateVolumeCapabilitiesResponse, VolumeCapability,
};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, warn};

/// Request parameter holding free-form `key=value,...` volume labels.
const LABELS_PARAMETER: &str = "labels";

/// Orchestrator-supplied request parameters copied onto volume labels.
const PARAMETER_LABELS: &[(&str, &str)] = &[
  ("csi.storage.k8s.io/pvc/name", "pvc-name"),
  ("csi.storage.k8s.io/pvc/namespace", "pvc-namespace"),
  ("csi.storage.k8s.io/pv/name", "pv-name"),
];

/// Whether an access mode can be served by a volume that attaches to one
/// server at a time.
pub fn is_capability_supported(capability: &VolumeCapability) -> bool {
  match capability.access_mode() {
    AccessMode::SingleNodeWriter | AccessMode::SingleNodeMultiWriter => true,
    AccessMode::Unknown
    | AccessMode::SingleNodeReaderOnly
    | AccessMode::SingleNodeSingleWriter
    | AccessMode::MultiNodeReaderOnly
    | AccessMode::MultiNodeSingleWriter
    | AccessMode::MultiNodeMultiWriter => false,
  }
}

fn topology(location: &str) -> Topology {
  let mut topology = Topology::new();
  topology.insert(TOPOLOGY_KEY.to_owned(), location.to_owned());
  topology
}

fn csi_volume(volume: &Volume, context: HashMap<String, String>) -> csi::Volume {
  csi::Volume::new(volume.id.to_string(), volume.size_bytes())
    .with_volume_context(context)
    .with_accessible_topology(topology(&volume.location))
}

/// CSI controller backed by a provider volume gateway. Every gateway call
/// goes through [`IdempotentGateway`] so that orchestrator retries converge.
pub struct ControllerServer<G: VolumeGateway> {
  gateway: IdempotentGateway<G>,
  location: String,
  extra_labels: HashMap<String, String>,
  readiness: Arc<Readiness>,
}

impl<G: VolumeGateway> ControllerServer<G> {
  pub fn new(
    gateway: G,
    location: impl Into<String>,
    extra_labels: HashMap<String, String>,
    readiness: Arc<Readiness>,
  ) -> Self {
    ControllerServer {
      gateway: IdempotentGateway::new(gateway),
      location: location.into(),
      extra_labels,
      readiness,
    }
  }

  #[inline]
  pub fn readiness(&self) -> &Arc<Readiness> {
    &self.readiness
  }

  #[inline]
  pub fn gateway(&self) -> &G {
    self.gateway.inner()
  }

  /// First location found in the preferred, then the requisite topologies,
  /// falling back to the configured default.
  fn location_for(&self, requirement: Option<&TopologyRequirement>) -> String {
    requirement
      .and_then(|requirement| {
        requirement
          .preferred()
          .iter()
          .chain(requirement.requisite())
          .find_map(|segments| segments.get(TOPOLOGY_KEY))
      })
      .cloned()
      .unwrap_or_else(|| self.location.clone())
  }

  fn labels_for(
    &self,
    parameters: &HashMap<String, String>,
  ) -> Result<HashMap<String, String>, LabelParseError> {
    let mut managed = HashMap::new();
    managed.insert("managed-by".to_owned(), "cloudvol-csi".to_owned());

    let mut orchestrator = HashMap::new();
    for (parameter, label) in PARAMETER_LABELS {
      if let Some(value) = parameters.get(*parameter) {
        orchestrator.insert((*label).to_owned(), value.clone());
      }
    }

    let free = match parameters.get(LABELS_PARAMETER) {
      Some(value) => parse_labels(value)?,
      None => HashMap::new(),
    };

    Ok(merge_labels(vec![
      managed,
      self.extra_labels.clone(),
      orchestrator,
      free,
    ]))
  }
}

plugin_identity!(ControllerServer, G: VolumeGateway);

fn publish_error(error: VolumeError) -> ControllerPublishVolumeError {
  let message = format!("failed to publish volume: {}", error);
  match error {
    VolumeError::VolumeNotFound => ControllerPublishVolumeError::VolumeDoesNotExist(message),
    VolumeError::ServerNotFound => ControllerPublishVolumeError::NodeDoesNotExist(message),
    VolumeError::Attached => ControllerPublishVolumeError::PublishedToAnotherNode(message),
    VolumeError::AttachLimitReached => ControllerPublishVolumeError::MaxVolumesAttached(message),
    VolumeError::LockedServer => ControllerPublishVolumeError::NodeLocked(message),
    _ => tonic::Status::internal(message).into(),
  }
}

#[async_trait]
impl<G: VolumeGateway> ControllerService for ControllerServer<G> {
  fn capabilities(&self) -> ControllerCapabilities {
    ControllerCapabilities::CREATE_DELETE_VOLUME
      | ControllerCapabilities::PUBLISH_UNPUBLISH_VOLUME
      | ControllerCapabilities::LIST_VOLUMES
      | ControllerCapabilities::LIST_VOLUMES_PUBLISHED_NODES
      | ControllerCapabilities::EXPAND_VOLUME
      | ControllerCapabilities::SINGLE_NODE_MULTI_WRITER
  }

  async fn create_volume(
    &self,
    request: CreateVolumeRequest,
  ) -> Result<csi::Volume, CreateVolumeError> {
    if !request
      .volume_capabilities()
      .iter()
      .all(is_capability_supported)
    {
      return Err(tonic::Status::invalid_argument("volume capability is not supported").into());
    }

    let (min_size_gib, max_size_gib) =
      volume_size_from_capacity_range(request.capacity_range()).ok_or_else(|| {
        CreateVolumeError::UnsupportedCapacityRange("invalid capacity range".to_owned())
      })?;

    let labels = self
      .labels_for(request.parameters())
      .map_err(|e| tonic::Status::invalid_argument(format!("invalid volume labels: {}", e)))?;

    let opts = CreateOpts {
      name: request.name().to_owned(),
      min_size_gib,
      max_size_gib,
      location: self.location_for(request.accessibility_requirements()),
      labels,
    };

    let volume = match self.gateway.create(opts).await {
      Ok(volume) => volume,
      Err(VolumeError::VolumeAlreadyExists) => {
        return Err(CreateVolumeError::AlreadyExists(format!(
          "volume {} already exists with different parameters",
          request.name()
        )));
      }
      Err(e) => {
        warn!(name = request.name(), error = %e, "failed to create volume");
        return Err(tonic::Status::internal(format!("failed to create volume: {}", e)).into());
      }
    };

    info!(
      volume_id = %volume.id,
      name = %volume.name,
      size_gib = volume.size_gib,
      location = %volume.location,
      "created volume"
    );

    let mut context = HashMap::new();
    if let Some(options) = request.parameters().get(FS_FORMAT_OPTIONS_KEY) {
      context.insert(FS_FORMAT_OPTIONS_KEY.to_owned(), options.clone());
    }

    Ok(csi_volume(&volume, context))
  }

  async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<(), DeleteVolumeError> {
    let id = match request.volume_id().parse::<VolumeId>() {
      Ok(id) => id,
      Err(_) => {
        info!(
          volume_id = request.volume_id(),
          "volume id is not valid, assuming the volume is already deleted"
        );
        return Ok(());
      }
    };

    match self.gateway.delete(id).await {
      Ok(()) => info!(volume_id = %id, "deleted volume"),
      Err(VolumeError::VolumeNotFound) => info!(volume_id = %id, "volume is already deleted"),
      Err(VolumeError::Attached) => {
        return Err(DeleteVolumeError::VolumeInUse(format!(
          "volume {} is still attached",
          id
        )));
      }
      Err(e) => {
        return Err(tonic::Status::internal(format!("failed to delete volume: {}", e)).into());
      }
    }

    Ok(())
  }

  async fn controller_publish_volume(
    &self,
    request: ControllerPublishVolumeRequest,
  ) -> Result<ControllerPublishVolumeResponse, ControllerPublishVolumeError> {
    if request.readonly() {
      return Err(tonic::Status::invalid_argument("readonly volumes are not supported").into());
    }

    if !is_capability_supported(request.volume_capability()) {
      return Err(tonic::Status::invalid_argument("volume capability is not supported").into());
    }

    let volume_id = request.volume_id().parse::<VolumeId>().map_err(|_| {
      ControllerPublishVolumeError::VolumeDoesNotExist(format!(
        "volume {} not found",
        request.volume_id()
      ))
    })?;

    let server_id = request.node_id().parse::<ServerId>().map_err(|_| {
      ControllerPublishVolumeError::NodeDoesNotExist(format!(
        "server {} not found",
        request.node_id()
      ))
    })?;

    self
      .gateway
      .attach(volume_id, server_id)
      .await
      .map_err(publish_error)?;

    let volume = self
      .gateway
      .get_by_id(volume_id)
      .await
      .map_err(publish_error)?;

    info!(volume_id = %volume_id, server_id = %server_id, device = %volume.linux_device, "published volume");

    let mut context = HashMap::new();
    context.insert(DEVICE_PATH_KEY.to_owned(), volume.linux_device);
    Ok(ControllerPublishVolumeResponse::new(context))
  }

  async fn controller_unpublish_volume(
    &self,
    request: ControllerUnpublishVolumeRequest,
  ) -> Result<(), ControllerUnpublishVolumeError> {
    let volume_id = request.volume_id().parse::<VolumeId>().map_err(|_| {
      ControllerUnpublishVolumeError::VolumeDoesNotExist(format!(
        "volume {} not found",
        request.volume_id()
      ))
    })?;

    let server_id = match request.node_id() {
      None => None,
      Some(node_id) => Some(node_id.parse::<ServerId>().map_err(|_| {
        ControllerUnpublishVolumeError::NodeDoesNotExist(format!("server {} not found", node_id))
      })?),
    };

    match self.gateway.detach(volume_id, server_id).await {
      Ok(()) => {
        info!(volume_id = %volume_id, "unpublished volume");
        Ok(())
      }
      Err(VolumeError::VolumeNotFound) => {
        info!(volume_id = %volume_id, "volume to unpublish does not exist");
        Ok(())
      }
      Err(VolumeError::LockedServer) => Err(ControllerUnpublishVolumeError::NodeLocked(format!(
        "server of volume {} is locked",
        volume_id
      ))),
      Err(e) => {
        Err(tonic::Status::internal(format!("failed to unpublish volume: {}", e)).into())
      }
    }
  }

  async fn validate_volume_capabilities(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
  ) -> Result<ValidateVolumeCapabilitiesResponse, ValidateVolumeCapabilitiesError> {
    let not_found = || {
      ValidateVolumeCapabilitiesError::VolumeDoesNotExist(format!(
        "volume {} not found",
        request.volume_id()
      ))
    };

    let id = request
      .volume_id()
      .parse::<VolumeId>()
      .map_err(|_| not_found())?;

    match self.gateway.get_by_id(id).await {
      Ok(_) => {}
      Err(VolumeError::VolumeNotFound) => return Err(not_found()),
      Err(e) => {
        return Err(tonic::Status::internal(format!("failed to get volume: {}", e)).into());
      }
    }

    if request
      .volume_capabilities()
      .iter()
      .all(is_capability_supported)
    {
      Ok(ValidateVolumeCapabilitiesResponse::confirmed(&request))
    } else {
      Ok(ValidateVolumeCapabilitiesResponse::not_confirmed(
        "only single node access modes are supported",
      ))
    }
  }

  async fn list_volumes(
    &self,
    request: ListVolumesRequest,
  ) -> Result<ListVolumesResponse, ListVolumesError> {
    if let Some(token) = request.starting_token() {
      return Err(ListVolumesError::InvalidStartingToken(format!(
        "pagination is not supported, got starting token {:?}",
        token
      )));
    }

    let volumes = self
      .gateway
      .all()
      .await
      .map_err(|e| tonic::Status::internal(format!("failed to list volumes: {}", e)))?;

    let entries = volumes
      .iter()
      .map(|volume| {
        let entry = ListVolumesEntry::new(csi_volume(volume, HashMap::new()));
        match volume.attached_server {
          Some(server) => entry.with_published_node(server.to_string()),
          None => entry,
        }
      })
      .collect();

    Ok(ListVolumesResponse::new(entries))
  }

  async fn controller_expand_volume(
    &self,
    request: ControllerExpandVolumeRequest,
  ) -> Result<ControllerExpandVolumeResponse, ControllerExpandVolumeError> {
    let not_found = || {
      ControllerExpandVolumeError::VolumeDoesNotExist(format!(
        "volume {} not found",
        request.volume_id()
      ))
    };

    let id = request
      .volume_id()
      .parse::<VolumeId>()
      .map_err(|_| not_found())?;

    let (min_size_gib, _) = volume_size_from_capacity_range(request.capacity_range())
      .ok_or_else(|| {
        ControllerExpandVolumeError::UnsupportedCapacityRange("invalid capacity range".to_owned())
      })?;

    match self.gateway.resize(id, min_size_gib).await {
      Ok(()) => info!(volume_id = %id, size_gib = min_size_gib, "resized volume"),
      Err(VolumeError::VolumeSizeAlreadyReached) => {
        info!(volume_id = %id, size_gib = min_size_gib, "volume is already large enough")
      }
      Err(VolumeError::VolumeNotFound) => return Err(not_found()),
      Err(e) => {
        return Err(tonic::Status::internal(format!("failed to resize volume: {}", e)).into());
      }
    }

    let volume = match self.gateway.get_by_id(id).await {
      Ok(volume) => volume,
      Err(VolumeError::VolumeNotFound) => return Err(not_found()),
      Err(e) => {
        return Err(tonic::Status::internal(format!("failed to get volume: {}", e)).into());
      }
    };

    Ok(ControllerExpandVolumeResponse::new(
      volume.size_bytes(),
      true,
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{gateway::GatewayOp, gateway::InMemoryGateway, GIB};
  use csi_proto::{
    controller::{AccessType, MountVolume},
    proto, IdentityService,
  };
  use std::convert::TryInto;

  fn controller() -> ControllerServer<InMemoryGateway> {
    let gateway = InMemoryGateway::new();
    gateway.add_server(ServerId(7));

    let mut extra = HashMap::new();
    extra.insert("team".to_owned(), "storage".to_owned());

    ControllerServer::new(gateway, "fsn1", extra, Arc::new(Readiness::new()))
  }

  fn capability(mode: AccessMode) -> proto::VolumeCapability {
    VolumeCapability::new(mode, AccessType::Mount(MountVolume::new(None, Vec::new()))).into()
  }

  fn create_request(name: &str, required: i64, limit: i64) -> proto::CreateVolumeRequest {
    proto::CreateVolumeRequest {
      name: name.to_owned(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: required,
        limit_bytes: limit,
      }),
      volume_capabilities: vec![capability(AccessMode::SingleNodeWriter)],
      ..Default::default()
    }
  }

  async fn create(
    controller: &ControllerServer<InMemoryGateway>,
    request: proto::CreateVolumeRequest,
  ) -> Result<csi::Volume, tonic::Status> {
    let request = request.try_into().expect("valid request");
    controller.create_volume(request).await.map_err(Into::into)
  }

  fn publish_request(volume_id: &str, node_id: &str, readonly: bool) -> ControllerPublishVolumeRequest {
    proto::ControllerPublishVolumeRequest {
      volume_id: volume_id.to_owned(),
      node_id: node_id.to_owned(),
      volume_capability: Some(capability(AccessMode::SingleNodeWriter)),
      readonly,
      ..Default::default()
    }
    .try_into()
    .expect("valid request")
  }

  fn unpublish_request(volume_id: &str, node_id: &str) -> ControllerUnpublishVolumeRequest {
    proto::ControllerUnpublishVolumeRequest {
      volume_id: volume_id.to_owned(),
      node_id: node_id.to_owned(),
      ..Default::default()
    }
    .try_into()
    .expect("valid request")
  }

  fn expand_request(volume_id: &str, required: i64) -> ControllerExpandVolumeRequest {
    proto::ControllerExpandVolumeRequest {
      volume_id: volume_id.to_owned(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: required,
        limit_bytes: 0,
      }),
      ..Default::default()
    }
    .try_into()
    .expect("valid request")
  }

  #[test]
  fn access_modes() {
    let supported = |mode| {
      let capability: VolumeCapability = capability(mode).try_into().unwrap();
      is_capability_supported(&capability)
    };

    assert!(supported(AccessMode::SingleNodeWriter));
    assert!(supported(AccessMode::SingleNodeMultiWriter));
    assert!(!supported(AccessMode::Unknown));
    assert!(!supported(AccessMode::SingleNodeReaderOnly));
    assert!(!supported(AccessMode::MultiNodeReaderOnly));
    assert!(!supported(AccessMode::MultiNodeMultiWriter));
  }

  #[test]
  fn identity() {
    let controller = controller();
    assert_eq!(controller.name(), "csi.cloudvol.io");
    assert!(controller.volume_accessibility_constraints_support());
    assert!(!controller.ready());

    controller.readiness().set_ready();
    assert!(controller.ready());
  }

  #[tokio::test]
  async fn create_is_idempotent() {
    let controller = controller();

    let first = create(&controller, create_request("pvc-1", 0, 0))
      .await
      .unwrap();
    let second = create(&controller, create_request("pvc-1", 0, 0))
      .await
      .unwrap();

    assert_eq!(first.volume_id(), second.volume_id());
    assert_eq!(first.capacity_bytes(), 10 * GIB);
    assert_eq!(
      first.accessible_topology()[0].get(TOPOLOGY_KEY),
      Some(&"fsn1".to_owned())
    );

    assert_eq!(controller.gateway().create_calls(), 2);
    assert_eq!(controller.gateway().all().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn create_conflicting_size() {
    let controller = controller();
    let g = GIB as i64;

    create(&controller, create_request("pvc-1", 10 * g, 0))
      .await
      .unwrap();
    let err = create(&controller, create_request("pvc-1", 20 * g, 0))
      .await
      .unwrap_err();

    assert_eq!(err.code(), tonic::Code::AlreadyExists);
  }

  #[tokio::test]
  async fn create_rejects_invalid_requests() {
    let controller = controller();
    let g = GIB as i64;

    let err = create(&controller, create_request("pvc-1", 20 * g, 10 * g))
      .await
      .unwrap_err();
    assert_eq!(err.code(), tonic::Code::OutOfRange);

    let mut request = create_request("pvc-1", 0, 0);
    request.volume_capabilities = vec![capability(AccessMode::MultiNodeMultiWriter)];
    let err = create(&controller, request).await.unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    let mut request = create_request("pvc-1", 0, 0);
    request
      .parameters
      .insert("labels".to_owned(), "broken".to_owned());
    let err = create(&controller, request).await.unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    assert_eq!(controller.gateway().create_calls(), 0);
  }

  #[tokio::test]
  async fn create_uses_topology_labels_and_format_options() {
    let controller = controller();

    let mut request = create_request("pvc-1", 0, 0);
    let mut preferred = HashMap::new();
    preferred.insert(TOPOLOGY_KEY.to_owned(), "nbg1".to_owned());
    request.accessibility_requirements = Some(proto::TopologyRequirement {
      requisite: Vec::new(),
      preferred: vec![proto::Topology {
        segments: preferred,
      }],
    });
    request.parameters.insert(
      "csi.storage.k8s.io/pvc/name".to_owned(),
      "data".to_owned(),
    );
    request
      .parameters
      .insert("labels".to_owned(), "team=db,tier=gold".to_owned());
    request
      .parameters
      .insert(FS_FORMAT_OPTIONS_KEY.to_owned(), "-b 4096".to_owned());

    let volume = create(&controller, request).await.unwrap();
    assert_eq!(
      volume.accessible_topology()[0].get(TOPOLOGY_KEY),
      Some(&"nbg1".to_owned())
    );
    assert_eq!(
      volume.volume_context().get(FS_FORMAT_OPTIONS_KEY),
      Some(&"-b 4096".to_owned())
    );

    let id: VolumeId = volume.volume_id().parse().unwrap();
    let labels = controller.gateway().labels(id).unwrap();
    assert_eq!(labels.get("managed-by"), Some(&"cloudvol-csi".to_owned()));
    assert_eq!(labels.get("pvc-name"), Some(&"data".to_owned()));
    assert_eq!(labels.get("team"), Some(&"db".to_owned()));
    assert_eq!(labels.get("tier"), Some(&"gold".to_owned()));
  }

  #[tokio::test]
  async fn delete_missing_or_invalid_volume() {
    let controller = controller();

    for id in &["42", "not-a-number"] {
      let request: DeleteVolumeRequest = proto::DeleteVolumeRequest {
        volume_id: (*id).to_owned(),
        ..Default::default()
      }
      .try_into()
      .unwrap();

      controller.delete_volume(request).await.unwrap();
    }
  }

  #[tokio::test]
  async fn readonly_publish_never_reaches_provider() {
    let controller = controller();

    let err: tonic::Status = controller
      .controller_publish_volume(publish_request("1", "7", true))
      .await
      .unwrap_err()
      .into();

    assert_eq!(err.code(), tonic::Code::InvalidArgument);
    assert!(controller.gateway().calls().is_empty());
  }

  #[tokio::test]
  async fn publish_and_unpublish() {
    let controller = controller();
    let volume = create(&controller, create_request("pvc-1", 0, 0))
      .await
      .unwrap();

    for _ in 0..2 {
      let response = controller
        .controller_publish_volume(publish_request(volume.volume_id(), "7", false))
        .await
        .unwrap();

      let device = response.publish_context().get(DEVICE_PATH_KEY).unwrap();
      assert!(device.ends_with(volume.volume_id()));
    }

    let listed = controller
      .list_volumes(proto::ListVolumesRequest::default().try_into().unwrap())
      .await
      .unwrap();
    assert_eq!(listed.entries().len(), 1);
    assert_eq!(listed.entries()[0].published_node_ids(), &["7".to_owned()]);

    for _ in 0..2 {
      controller
        .controller_unpublish_volume(unpublish_request(volume.volume_id(), "7"))
        .await
        .unwrap();
    }

    controller
      .controller_unpublish_volume(unpublish_request("999", "7"))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn publish_errors() {
    let controller = controller();
    let volume = create(&controller, create_request("pvc-1", 0, 0))
      .await
      .unwrap();

    let code = |err: ControllerPublishVolumeError| tonic::Status::from(err).code();

    let err = controller
      .controller_publish_volume(publish_request("999", "7", false))
      .await
      .unwrap_err();
    assert_eq!(code(err), tonic::Code::NotFound);

    let err = controller
      .controller_publish_volume(publish_request(volume.volume_id(), "8", false))
      .await
      .unwrap_err();
    assert_eq!(code(err), tonic::Code::NotFound);

    controller.gateway().add_server(ServerId(8));
    controller
      .controller_publish_volume(publish_request(volume.volume_id(), "7", false))
      .await
      .unwrap();
    let err = controller
      .controller_publish_volume(publish_request(volume.volume_id(), "8", false))
      .await
      .unwrap_err();
    assert_eq!(code(err), tonic::Code::FailedPrecondition);

    controller
      .gateway()
      .fail_next(GatewayOp::Attach, VolumeError::LockedServer);
    controller
      .gateway()
      .fail_next(GatewayOp::GetById, VolumeError::LockedServer);
    let err = controller
      .controller_publish_volume(publish_request(volume.volume_id(), "8", false))
      .await
      .unwrap_err();
    assert_eq!(code(err), tonic::Code::Unavailable);
  }

  #[tokio::test]
  async fn delete_attached_volume_detaches_first() {
    let controller = controller();
    let volume = create(&controller, create_request("pvc-1", 0, 0))
      .await
      .unwrap();
    controller
      .controller_publish_volume(publish_request(volume.volume_id(), "7", false))
      .await
      .unwrap();

    let request: DeleteVolumeRequest = proto::DeleteVolumeRequest {
      volume_id: volume.volume_id().to_owned(),
      ..Default::default()
    }
    .try_into()
    .unwrap();
    controller.delete_volume(request).await.unwrap();

    assert!(controller.gateway().all().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn delete_volume_still_attached() {
    let controller = controller();
    let volume = create(&controller, create_request("pvc-1", 0, 0))
      .await
      .unwrap();
    controller
      .gateway()
      .fail_next(GatewayOp::Delete, VolumeError::Attached);

    let request: DeleteVolumeRequest = proto::DeleteVolumeRequest {
      volume_id: volume.volume_id().to_owned(),
      ..Default::default()
    }
    .try_into()
    .unwrap();
    let err = controller.delete_volume(request).await.unwrap_err();

    assert_eq!(
      tonic::Status::from(err).code(),
      tonic::Code::FailedPrecondition
    );
    assert_eq!(controller.gateway().all().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn publish_beyond_attach_limit() {
    let gateway = InMemoryGateway::new().with_max_attachments(1);
    gateway.add_server(ServerId(7));
    let controller = ControllerServer::new(
      gateway,
      "fsn1",
      HashMap::new(),
      Arc::new(Readiness::new()),
    );

    let first = create(&controller, create_request("pvc-1", 0, 0))
      .await
      .unwrap();
    let second = create(&controller, create_request("pvc-2", 0, 0))
      .await
      .unwrap();
    controller
      .controller_publish_volume(publish_request(first.volume_id(), "7", false))
      .await
      .unwrap();

    let err = controller
      .controller_publish_volume(publish_request(second.volume_id(), "7", false))
      .await
      .unwrap_err();
    assert_eq!(
      tonic::Status::from(err).code(),
      tonic::Code::ResourceExhausted
    );
  }

  #[tokio::test]
  async fn unpublish_from_locked_server() {
    let controller = controller();
    let volume = create(&controller, create_request("pvc-1", 0, 0))
      .await
      .unwrap();
    controller
      .controller_publish_volume(publish_request(volume.volume_id(), "7", false))
      .await
      .unwrap();
    controller
      .gateway()
      .fail_next(GatewayOp::Detach, VolumeError::LockedServer);

    let err = controller
      .controller_unpublish_volume(unpublish_request(volume.volume_id(), "7"))
      .await
      .unwrap_err();
    assert_eq!(tonic::Status::from(err).code(), tonic::Code::Unavailable);

    // the volume stays attached until a retry succeeds
    controller
      .controller_unpublish_volume(unpublish_request(volume.volume_id(), "7"))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn list_rejects_starting_token() {
    let controller = controller();
    let request = proto::ListVolumesRequest {
      starting_token: "abc".to_owned(),
      ..Default::default()
    };

    let err = controller
      .list_volumes(request.try_into().unwrap())
      .await
      .unwrap_err();
    assert_eq!(tonic::Status::from(err).code(), tonic::Code::Aborted);
  }

  #[tokio::test]
  async fn validate_capabilities() {
    let controller = controller();
    let volume = create(&controller, create_request("pvc-1", 0, 0))
      .await
      .unwrap();

    let request = |id: &str, mode| -> ValidateVolumeCapabilitiesRequest {
      proto::ValidateVolumeCapabilitiesRequest {
        volume_id: id.to_owned(),
        volume_capabilities: vec![capability(mode)],
        ..Default::default()
      }
      .try_into()
      .unwrap()
    };

    let response = controller
      .validate_volume_capabilities(request(volume.volume_id(), AccessMode::SingleNodeWriter))
      .await
      .unwrap();
    assert!(response.is_confirmed());

    let response = controller
      .validate_volume_capabilities(request(volume.volume_id(), AccessMode::MultiNodeReaderOnly))
      .await
      .unwrap();
    assert!(!response.is_confirmed());

    let err = controller
      .validate_volume_capabilities(request("999", AccessMode::SingleNodeWriter))
      .await
      .unwrap_err();
    assert_eq!(tonic::Status::from(err).code(), tonic::Code::NotFound);
  }

  #[tokio::test]
  async fn expand_volume() {
    let controller = controller();
    let g = GIB as i64;
    let volume = create(&controller, create_request("pvc-1", 0, 0))
      .await
      .unwrap();

    let response = controller
      .controller_expand_volume(expand_request(volume.volume_id(), 20 * g))
      .await
      .unwrap();
    assert_eq!(response.capacity_bytes(), 20 * GIB);
    assert!(response.node_expansion_required());

    let response = controller
      .controller_expand_volume(expand_request(volume.volume_id(), 15 * g))
      .await
      .unwrap();
    assert_eq!(response.capacity_bytes(), 20 * GIB);

    let err = controller
      .controller_expand_volume(expand_request("999", 20 * g))
      .await
      .unwrap_err();
    assert_eq!(tonic::Status::from(err).code(), tonic::Code::NotFound);
  }
}
