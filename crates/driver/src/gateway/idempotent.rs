use super::VolumeGateway;
use crate::volume::{CreateOpts, Result, ServerId, Volume, VolumeError, VolumeId};
use async_trait::async_trait;
use tracing::{debug, info};

/// Makes create, delete, attach and detach safe to repeat.
///
/// CSI calls are delivered at least once, and a retry cannot tell whether
/// the previous attempt took effect. Outcomes that prove the desired state
/// is already reached are turned into success; every other error is passed
/// on unchanged. Nothing is retried here.
pub struct IdempotentGateway<G> {
  inner: G,
}

impl<G: VolumeGateway> IdempotentGateway<G> {
  pub fn new(inner: G) -> Self {
    IdempotentGateway { inner }
  }

  #[inline]
  pub fn inner(&self) -> &G {
    &self.inner
  }
}

#[async_trait]
impl<G: VolumeGateway> VolumeGateway for IdempotentGateway<G> {
  async fn create(&self, opts: CreateOpts) -> Result<Volume> {
    match self.inner.create(opts.clone()).await {
      Err(VolumeError::VolumeAlreadyExists) => (),
      result => return result,
    }

    let existing = match self.inner.get_by_name(&opts.name).await {
      Ok(volume) => volume,
      // deleted concurrently, let the caller retry
      Err(VolumeError::VolumeNotFound) => return Err(VolumeError::VolumeAlreadyExists),
      Err(e) => return Err(e),
    };

    if !opts.accepts(&existing) {
      info!(
        name = %opts.name,
        size_gib = existing.size_gib,
        location = %existing.location,
        "volume with the same name does not match the request"
      );
      return Err(VolumeError::VolumeAlreadyExists);
    }

    debug!(name = %opts.name, volume_id = %existing.id, "volume already created");
    Ok(existing)
  }

  #[inline]
  async fn get_by_id(&self, id: VolumeId) -> Result<Volume> {
    self.inner.get_by_id(id).await
  }

  #[inline]
  async fn get_by_name(&self, name: &str) -> Result<Volume> {
    self.inner.get_by_name(name).await
  }

  async fn delete(&self, id: VolumeId) -> Result<()> {
    match self.inner.detach(id, None).await {
      Ok(()) | Err(VolumeError::VolumeNotFound) | Err(VolumeError::NotAttached) => (),
      Err(e) => return Err(e),
    }

    match self.inner.delete(id).await {
      Err(VolumeError::VolumeNotFound) => {
        debug!(volume_id = %id, "volume already deleted");
        Ok(())
      }
      result => result,
    }
  }

  async fn attach(&self, id: VolumeId, server: ServerId) -> Result<()> {
    let err = match self.inner.attach(id, server).await {
      Ok(()) => return Ok(()),
      Err(e) => e,
    };

    match self.inner.get_by_id(id).await {
      Ok(volume) if volume.attached_server == Some(server) => {
        debug!(volume_id = %id, server_id = %server, "volume already attached");
        Ok(())
      }
      _ => Err(err),
    }
  }

  async fn detach(&self, id: VolumeId, server: Option<ServerId>) -> Result<()> {
    match self.inner.detach(id, server).await {
      // attached to another server: not attached to the requested one
      Err(VolumeError::NotAttached) | Err(VolumeError::Attached) => {
        debug!(volume_id = %id, "volume already detached");
        Ok(())
      }
      result => result,
    }
  }

  #[inline]
  async fn resize(&self, id: VolumeId, size_gib: u64) -> Result<()> {
    self.inner.resize(id, size_gib).await
  }

  #[inline]
  async fn all(&self) -> Result<Vec<Volume>> {
    self.inner.all().await
  }
}
