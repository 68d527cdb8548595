use crate::{proto, utils::Record, IdentityService, VolumeExpansionSupport};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use proto::plugin_capability::{service, volume_expansion, Service, Type, VolumeExpansion};

pub(crate) struct Identity<T: IdentityService> {
  inner: Arc<T>,
  controller_service: bool,
}

impl<T: IdentityService> Identity<T> {
  /// `controller_service` is set when the same process also serves the
  /// controller RPCs.
  pub(crate) fn new(inner: Arc<T>, controller_service: bool) -> Self {
    Identity {
      inner,
      controller_service,
    }
  }
}

fn service(ty: service::Type) -> proto::PluginCapability {
  proto::PluginCapability {
    r#type: Some(Type::Service(Service { r#type: ty as i32 })),
  }
}

fn volume_expansion(ty: volume_expansion::Type) -> proto::PluginCapability {
  proto::PluginCapability {
    r#type: Some(Type::VolumeExpansion(VolumeExpansion { r#type: ty as i32 })),
  }
}

pub(crate) fn plugin_capabilities(
  s: &impl IdentityService,
  controller_service: bool,
) -> proto::GetPluginCapabilitiesResponse {
  let mut capabilities = Vec::new();

  if controller_service {
    capabilities.push(service(service::Type::ControllerService));
  }

  if s.volume_accessibility_constraints_support() {
    capabilities.push(service(service::Type::VolumeAccessibilityConstraints));
  }

  match s.volume_expansion_support() {
    VolumeExpansionSupport::None => (),
    VolumeExpansionSupport::Offline => {
      capabilities.push(volume_expansion(volume_expansion::Type::Offline))
    }
    VolumeExpansionSupport::Online => {
      capabilities.push(volume_expansion(volume_expansion::Type::Online))
    }
  }

  proto::GetPluginCapabilitiesResponse { capabilities }
}

#[async_trait]
impl<T: IdentityService> proto::identity_server::Identity for Identity<T> {
  #[instrument(name = "identity.get_plugin_info", skip(self, _request), fields(response))]
  async fn get_plugin_info(
    &self,
    _request: tonic::Request<proto::GetPluginInfoRequest>,
  ) -> Result<tonic::Response<proto::GetPluginInfoResponse>, tonic::Status> {
    let response = proto::GetPluginInfoResponse {
      name: self.inner.name().into(),
      vendor_version: self.inner.version().into(),
      manifest: self.inner.manifest().clone(),
    }
    .record_response();

    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "identity.get_plugin_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn get_plugin_capabilities(
    &self,
    _request: tonic::Request<proto::GetPluginCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::GetPluginCapabilitiesResponse>, tonic::Status> {
    let response = plugin_capabilities(&*self.inner, self.controller_service).record_response();

    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "identity.probe", skip(self, _request), fields(response))]
  async fn probe(
    &self,
    _request: tonic::Request<proto::ProbeRequest>,
  ) -> Result<tonic::Response<proto::ProbeResponse>, tonic::Status> {
    let response = proto::ProbeResponse {
      ready: Some(self.inner.ready()),
    }
    .record_response();

    Ok(tonic::Response::new(response))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proto::identity_server::Identity as _;

  struct Plugin {
    ready: bool,
  }

  impl IdentityService for Plugin {
    fn name(&self) -> &str {
      "csi.example.com"
    }

    fn version(&self) -> &str {
      "1.2.3"
    }

    fn volume_accessibility_constraints_support(&self) -> bool {
      true
    }

    fn volume_expansion_support(&self) -> VolumeExpansionSupport {
      VolumeExpansionSupport::Online
    }

    fn ready(&self) -> bool {
      self.ready
    }
  }

  fn types(response: proto::GetPluginCapabilitiesResponse) -> Vec<Type> {
    response
      .capabilities
      .into_iter()
      .filter_map(|c| c.r#type)
      .collect()
  }

  #[test]
  fn controller_mode_advertises_controller_service() {
    let plugin = Plugin { ready: true };

    let node = types(plugin_capabilities(&plugin, false));
    let controller = types(plugin_capabilities(&plugin, true));

    assert_eq!(node.len(), 2);
    assert_eq!(controller.len(), 3);
    assert_eq!(
      controller[0],
      Type::Service(Service {
        r#type: service::Type::ControllerService as i32
      })
    );
    assert!(node.contains(&Type::VolumeExpansion(VolumeExpansion {
      r#type: volume_expansion::Type::Online as i32
    })));
  }

  #[tokio::test]
  async fn probe_reports_readiness() {
    let identity = Identity::new(Arc::new(Plugin { ready: false }), false);

    let response = identity
      .probe(tonic::Request::new(proto::ProbeRequest {}))
      .await
      .expect("probe");
    assert_eq!(response.into_inner().ready, Some(false));

    let response = identity
      .get_plugin_info(tonic::Request::new(proto::GetPluginInfoRequest {}))
      .await
      .expect("plugin info")
      .into_inner();
    assert_eq!(response.name, "csi.example.com");
    assert_eq!(response.vendor_version, "1.2.3");
  }
}
