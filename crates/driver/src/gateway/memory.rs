use super::VolumeGateway;
use crate::volume::{CreateOpts, Result, ServerId, Volume, VolumeError, VolumeId};
use async_trait::async_trait;
use std::{
  collections::{BTreeMap, HashMap, HashSet, VecDeque},
  sync::{Mutex, MutexGuard},
};

/// Operations of [`InMemoryGateway`], for error injection and call logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
  Create,
  GetById,
  GetByName,
  Delete,
  Attach,
  Detach,
  Resize,
  All,
}

#[derive(Default)]
struct State {
  next_id: u64,
  volumes: BTreeMap<VolumeId, Volume>,
  servers: HashSet<ServerId>,
  labels: HashMap<VolumeId, HashMap<String, String>>,
  failures: HashMap<GatewayOp, VecDeque<VolumeError>>,
  calls: Vec<GatewayOp>,
}

impl State {
  fn volume_mut(&mut self, id: VolumeId) -> Result<&mut Volume> {
    self.volumes.get_mut(&id).ok_or(VolumeError::VolumeNotFound)
  }
}

/// Gateway that keeps volumes in memory.
///
/// It behaves like the provider, not like [`IdempotentGateway`]: a second
/// create with the same name fails, attaching an attached volume fails, and
/// so on. Servers must be registered with [`InMemoryGateway::add_server`]
/// before volumes can be attached to them.
///
/// [`IdempotentGateway`]: super::IdempotentGateway
pub struct InMemoryGateway {
  state: Mutex<State>,
  max_attachments: usize,
}

impl Default for InMemoryGateway {
  fn default() -> Self {
    InMemoryGateway::new()
  }
}

impl InMemoryGateway {
  pub fn new() -> Self {
    InMemoryGateway {
      state: Mutex::new(State {
        next_id: 1,
        ..State::default()
      }),
      max_attachments: 16,
    }
  }

  /// Limit of volumes attached to one server.
  pub fn with_max_attachments(mut self, max: usize) -> Self {
    self.max_attachments = max;
    self
  }

  fn state(&self) -> MutexGuard<'_, State> {
    match self.state.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  pub fn add_server(&self, id: ServerId) {
    self.state().servers.insert(id);
  }

  /// Adds a volume as if it had been created through the provider.
  pub fn insert(&self, volume: Volume) {
    let mut state = self.state();
    state.next_id = state.next_id.max(volume.id.0 + 1);
    state.volumes.insert(volume.id, volume);
  }

  /// Labels a volume was created with.
  pub fn labels(&self, id: VolumeId) -> Option<HashMap<String, String>> {
    self.state().labels.get(&id).cloned()
  }

  /// Makes the next call of `op` fail with `error`. Queued failures are
  /// consumed in order.
  pub fn fail_next(&self, op: GatewayOp, error: VolumeError) {
    self.state().failures.entry(op).or_default().push_back(error);
  }

  /// Number of create calls, failed ones included.
  pub fn create_calls(&self) -> usize {
    self.calls_of(GatewayOp::Create)
  }

  pub fn calls_of(&self, op: GatewayOp) -> usize {
    self.state().calls.iter().filter(|c| **c == op).count()
  }

  /// Every call made so far, in order.
  pub fn calls(&self) -> Vec<GatewayOp> {
    self.state().calls.clone()
  }

  fn begin(&self, op: GatewayOp) -> Result<MutexGuard<'_, State>> {
    let mut state = self.state();
    state.calls.push(op);

    let failure = state.failures.get_mut(&op).and_then(|f| f.pop_front());
    match failure {
      Some(error) => Err(error),
      None => Ok(state),
    }
  }
}

fn device_path(id: VolumeId) -> String {
  format!("/dev/disk/by-id/scsi-0CloudVol_Volume_{}", id)
}

#[async_trait]
impl VolumeGateway for InMemoryGateway {
  async fn create(&self, opts: CreateOpts) -> Result<Volume> {
    let mut state = self.begin(GatewayOp::Create)?;
    if state.volumes.values().any(|v| v.name == opts.name) {
      return Err(VolumeError::VolumeAlreadyExists);
    }

    let id = VolumeId(state.next_id);
    state.next_id += 1;

    let volume = Volume {
      id,
      name: opts.name,
      size_gib: opts.min_size_gib,
      location: opts.location,
      linux_device: String::new(),
      attached_server: None,
    };
    state.volumes.insert(id, volume.clone());
    state.labels.insert(id, opts.labels);

    Ok(volume)
  }

  async fn get_by_id(&self, id: VolumeId) -> Result<Volume> {
    let mut state = self.begin(GatewayOp::GetById)?;
    let volume = state.volume_mut(id)?.clone();
    Ok(volume)
  }

  async fn get_by_name(&self, name: &str) -> Result<Volume> {
    let state = self.begin(GatewayOp::GetByName)?;
    let volume = state.volumes.values().find(|v| v.name == name).cloned();
    volume.ok_or(VolumeError::VolumeNotFound)
  }

  async fn delete(&self, id: VolumeId) -> Result<()> {
    let mut state = self.begin(GatewayOp::Delete)?;
    if state.volume_mut(id)?.attached_server.is_some() {
      return Err(VolumeError::Attached);
    }

    state.volumes.remove(&id);
    state.labels.remove(&id);
    Ok(())
  }

  async fn attach(&self, id: VolumeId, server: ServerId) -> Result<()> {
    let mut state = self.begin(GatewayOp::Attach)?;
    let max_attachments = self.max_attachments;

    state.volume_mut(id)?;
    if !state.servers.contains(&server) {
      return Err(VolumeError::ServerNotFound);
    }

    let attached = state
      .volumes
      .values()
      .filter(|v| v.attached_server == Some(server))
      .count();

    let volume = state.volume_mut(id)?;
    if volume.attached_server.is_some() {
      return Err(VolumeError::Attached);
    }

    if attached >= max_attachments {
      return Err(VolumeError::AttachLimitReached);
    }

    volume.attached_server = Some(server);
    volume.linux_device = device_path(id);
    Ok(())
  }

  async fn detach(&self, id: VolumeId, server: Option<ServerId>) -> Result<()> {
    let mut state = self.begin(GatewayOp::Detach)?;
    let volume = state.volume_mut(id)?;

    match (volume.attached_server, server) {
      (None, _) => Err(VolumeError::NotAttached),
      (Some(holder), Some(server)) if holder != server => Err(VolumeError::Attached),
      _ => {
        volume.attached_server = None;
        volume.linux_device.clear();
        Ok(())
      }
    }
  }

  async fn resize(&self, id: VolumeId, size_gib: u64) -> Result<()> {
    let mut state = self.begin(GatewayOp::Resize)?;
    let volume = state.volume_mut(id)?;
    if volume.size_gib >= size_gib {
      return Err(VolumeError::VolumeSizeAlreadyReached);
    }

    volume.size_gib = size_gib;
    Ok(())
  }

  async fn all(&self) -> Result<Vec<Volume>> {
    let state = self.begin(GatewayOp::All)?;
    let volumes = state.volumes.values().cloned().collect();
    Ok(volumes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn opts(name: &str) -> CreateOpts {
    CreateOpts {
      name: name.into(),
      min_size_gib: 10,
      location: "fsn1".into(),
      ..CreateOpts::default()
    }
  }

  #[tokio::test]
  async fn provider_semantics_are_not_idempotent() {
    let gw = InMemoryGateway::new();
    gw.add_server(ServerId(1));

    let volume = gw.create(opts("pvc-1")).await.expect("create");
    assert_eq!(
      gw.create(opts("pvc-1")).await,
      Err(VolumeError::VolumeAlreadyExists)
    );

    gw.attach(volume.id, ServerId(1)).await.expect("attach");
    assert_eq!(
      gw.attach(volume.id, ServerId(1)).await,
      Err(VolumeError::Attached)
    );
    assert_eq!(gw.delete(volume.id).await, Err(VolumeError::Attached));

    let attached = gw.get_by_id(volume.id).await.expect("get");
    assert_eq!(attached.linux_device, device_path(volume.id));

    gw.detach(volume.id, None).await.expect("detach");
    assert_eq!(
      gw.detach(volume.id, None).await,
      Err(VolumeError::NotAttached)
    );

    gw.delete(volume.id).await.expect("delete");
    assert_eq!(gw.delete(volume.id).await, Err(VolumeError::VolumeNotFound));
  }

  #[tokio::test]
  async fn attach_checks() {
    let gw = InMemoryGateway::new().with_max_attachments(1);
    gw.add_server(ServerId(1));

    let first = gw.create(opts("pvc-1")).await.expect("create");
    let second = gw.create(opts("pvc-2")).await.expect("create");

    assert_eq!(
      gw.attach(first.id, ServerId(9)).await,
      Err(VolumeError::ServerNotFound)
    );
    assert_eq!(
      gw.attach(VolumeId(99), ServerId(1)).await,
      Err(VolumeError::VolumeNotFound)
    );

    gw.attach(first.id, ServerId(1)).await.expect("attach");
    assert_eq!(
      gw.attach(second.id, ServerId(1)).await,
      Err(VolumeError::AttachLimitReached)
    );
  }

  #[tokio::test]
  async fn resize_only_grows() {
    let gw = InMemoryGateway::new();
    let volume = gw.create(opts("pvc-1")).await.expect("create");

    assert_eq!(
      gw.resize(volume.id, 10).await,
      Err(VolumeError::VolumeSizeAlreadyReached)
    );
    gw.resize(volume.id, 20).await.expect("resize");
    assert_eq!(gw.get_by_id(volume.id).await.expect("get").size_gib, 20);
  }

  #[tokio::test]
  async fn injected_failures_are_consumed_in_order() {
    let gw = InMemoryGateway::new();
    gw.fail_next(GatewayOp::All, VolumeError::Other("first".into()));
    gw.fail_next(GatewayOp::All, VolumeError::LockedServer);

    assert_eq!(gw.all().await, Err(VolumeError::Other("first".into())));
    assert_eq!(gw.all().await, Err(VolumeError::LockedServer));
    assert_eq!(gw.all().await, Ok(Vec::new()));
    assert_eq!(gw.calls_of(GatewayOp::All), 3);
  }
}
