mod idempotent;
mod memory;
mod provider;

use crate::volume::{CreateOpts, Result, ServerId, Volume, VolumeId};
use async_trait::async_trait;

pub use idempotent::IdempotentGateway;
pub use memory::{GatewayOp, InMemoryGateway};
pub use provider::{
  Action, ActionId, ActionStatus, CreateVolumeRequest, ProviderClient, ProviderError,
  ProviderErrorCode, ProviderGateway, ProviderGatewayConfig,
};

/// Volume operations of the cloud provider.
///
/// Mutating calls return once the action they trigger on the provider has
/// finished. Provider failures are translated to [`VolumeError`] sentinels.
/// Dropping a returned future stops waiting, but does not undo what the
/// provider has already done.
///
/// [`VolumeError`]: crate::VolumeError
#[async_trait]
pub trait VolumeGateway: Send + Sync + 'static {
  async fn create(&self, opts: CreateOpts) -> Result<Volume>;

  async fn get_by_id(&self, id: VolumeId) -> Result<Volume>;

  async fn get_by_name(&self, name: &str) -> Result<Volume>;

  async fn delete(&self, id: VolumeId) -> Result<()>;

  async fn attach(&self, id: VolumeId, server: ServerId) -> Result<()>;

  /// Detach from `server`, or from whichever server holds the volume when
  /// `server` is `None`.
  async fn detach(&self, id: VolumeId, server: Option<ServerId>) -> Result<()>;

  async fn resize(&self, id: VolumeId, size_gib: u64) -> Result<()>;

  async fn all(&self) -> Result<Vec<Volume>>;
}
