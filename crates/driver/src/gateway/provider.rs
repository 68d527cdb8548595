use super::VolumeGateway;
use crate::volume::{CreateOpts, Result, ServerId, Volume, VolumeError, VolumeId};
use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff};
use std::{collections::HashMap, fmt, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
  NotFound,
  /// A resource with the same unique attribute (the volume name) exists.
  UniquenessError,
  /// The resource is busy with another action.
  Locked,
  /// The server has no free volume slot.
  VolumeLimitReached,
  Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code:?})")]
pub struct ProviderError {
  pub code: ProviderErrorCode,
  pub message: String,
}

impl ProviderError {
  pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
    ProviderError {
      code,
      message: message.into(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
  Running,
  Success,
  Error(ProviderError),
}

/// Asynchronous unit of work started by a mutating provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
  pub id: ActionId,
  pub status: ActionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVolumeRequest {
  pub name: String,
  pub size_gib: u64,
  pub location: String,
  pub labels: HashMap<String, String>,
}

/// Raw provider API. Calls are not idempotent, and mutating calls return
/// as soon as the provider has accepted them.
#[async_trait]
pub trait ProviderClient: Send + Sync + 'static {
  async fn create_volume(
    &self,
    request: CreateVolumeRequest,
  ) -> std::result::Result<(Volume, Action), ProviderError>;

  async fn get_volume(&self, id: VolumeId) -> std::result::Result<Option<Volume>, ProviderError>;

  async fn get_volume_by_name(
    &self,
    name: &str,
  ) -> std::result::Result<Option<Volume>, ProviderError>;

  async fn list_volumes(&self) -> std::result::Result<Vec<Volume>, ProviderError>;

  async fn delete_volume(&self, id: VolumeId) -> std::result::Result<(), ProviderError>;

  async fn server_exists(&self, id: ServerId) -> std::result::Result<bool, ProviderError>;

  async fn attach_volume(
    &self,
    id: VolumeId,
    server: ServerId,
  ) -> std::result::Result<Action, ProviderError>;

  async fn detach_volume(&self, id: VolumeId) -> std::result::Result<Action, ProviderError>;

  async fn resize_volume(
    &self,
    id: VolumeId,
    size_gib: u64,
  ) -> std::result::Result<Action, ProviderError>;

  async fn get_action(&self, id: ActionId) -> std::result::Result<Action, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct ProviderGatewayConfig {
  /// Wait before the first poll of an attach action, which is known to be
  /// slow.
  pub attach_delay: Duration,
  pub initial_interval: Duration,
  pub max_interval: Duration,
  /// Give up waiting for an action after this long. `None` waits until the
  /// caller goes away.
  pub max_wait: Option<Duration>,
}

impl Default for ProviderGatewayConfig {
  fn default() -> Self {
    ProviderGatewayConfig {
      attach_delay: Duration::from_secs(1),
      initial_interval: Duration::from_secs(1),
      max_interval: Duration::from_secs(10),
      max_wait: None,
    }
  }
}

impl ProviderGatewayConfig {
  fn policy(&self) -> ExponentialBackoff {
    ExponentialBackoff {
      current_interval: self.initial_interval,
      initial_interval: self.initial_interval,
      multiplier: 2.0,
      max_interval: self.max_interval,
      max_elapsed_time: self.max_wait,
      ..ExponentialBackoff::default()
    }
  }
}

/// [`VolumeGateway`] on top of the provider API.
pub struct ProviderGateway<C> {
  client: C,
  config: ProviderGatewayConfig,
}

/// Maps a provider error to the domain sentinels. `not_found` is what a
/// missing resource means for the call at hand.
fn translate(err: ProviderError, not_found: Option<VolumeError>) -> VolumeError {
  match (err.code, not_found) {
    (ProviderErrorCode::NotFound, Some(not_found)) => not_found,
    (ProviderErrorCode::UniquenessError, _) => VolumeError::VolumeAlreadyExists,
    (ProviderErrorCode::Locked, _) => VolumeError::LockedServer,
    (ProviderErrorCode::VolumeLimitReached, _) => VolumeError::AttachLimitReached,
    _ => VolumeError::Other(err.to_string()),
  }
}

#[inline]
fn other(err: ProviderError) -> VolumeError {
  translate(err, None)
}

#[inline]
fn volume_not_found(err: ProviderError) -> VolumeError {
  translate(err, Some(VolumeError::VolumeNotFound))
}

impl<C: ProviderClient> ProviderGateway<C> {
  pub fn new(client: C, config: ProviderGatewayConfig) -> Self {
    ProviderGateway { client, config }
  }

  #[inline]
  pub fn client(&self) -> &C {
    &self.client
  }

  /// Polls `action` until it succeeds or fails.
  async fn watch(&self, action: Action) -> std::result::Result<(), ProviderError> {
    let id = action.id;
    match action.status {
      ActionStatus::Success => return Ok(()),
      ActionStatus::Error(e) => return Err(e),
      ActionStatus::Running => (),
    }

    let client = &self.client;
    retry_notify(
      self.config.policy(),
      || async move {
        let action = match client.get_action(id).await {
          Ok(action) => action,
          Err(e) => return Err(backoff::Error::permanent(e)),
        };

        match action.status {
          ActionStatus::Success => Ok(()),
          ActionStatus::Error(e) => Err(backoff::Error::permanent(e)),
          ActionStatus::Running => Err(backoff::Error::transient(ProviderError::new(
            ProviderErrorCode::Other,
            format!("action {} did not finish in time", id),
          ))),
        }
      },
      |_, wait: Duration| debug!(action_id = %id, ?wait, "action still running"),
    )
    .await
  }
}

#[async_trait]
impl<C: ProviderClient> VolumeGateway for ProviderGateway<C> {
  async fn create(&self, opts: CreateOpts) -> Result<Volume> {
    let request = CreateVolumeRequest {
      name: opts.name,
      size_gib: opts.min_size_gib,
      location: opts.location,
      labels: opts.labels,
    };

    debug!(name = %request.name, size_gib = request.size_gib, "creating volume");
    let (volume, action) = self.client.create_volume(request).await.map_err(other)?;

    if let Err(e) = self.watch(action).await {
      error!(volume_id = %volume.id, error = %e, "volume creation failed");
      // best effort, the error of the create is what the caller needs
      if let Err(delete_err) = self.client.delete_volume(volume.id).await {
        warn!(
          volume_id = %volume.id,
          error = %delete_err,
          "failed to delete volume after failed creation"
        );
      }

      return Err(other(e));
    }

    info!(volume_id = %volume.id, name = %volume.name, "volume created");
    Ok(volume)
  }

  async fn get_by_id(&self, id: VolumeId) -> Result<Volume> {
    self
      .client
      .get_volume(id)
      .await
      .map_err(volume_not_found)?
      .ok_or(VolumeError::VolumeNotFound)
  }

  async fn get_by_name(&self, name: &str) -> Result<Volume> {
    self
      .client
      .get_volume_by_name(name)
      .await
      .map_err(volume_not_found)?
      .ok_or(VolumeError::VolumeNotFound)
  }

  async fn delete(&self, id: VolumeId) -> Result<()> {
    let volume = self.get_by_id(id).await?;
    if volume.attached_server.is_some() {
      return Err(VolumeError::Attached);
    }

    self
      .client
      .delete_volume(id)
      .await
      .map_err(volume_not_found)?;

    info!(volume_id = %id, "volume deleted");
    Ok(())
  }

  async fn attach(&self, id: VolumeId, server: ServerId) -> Result<()> {
    let volume = self.get_by_id(id).await?;
    if !self.client.server_exists(server).await.map_err(other)? {
      return Err(VolumeError::ServerNotFound);
    }

    if volume.attached_server.is_some() {
      return Err(VolumeError::Attached);
    }

    let action = self
      .client
      .attach_volume(id, server)
      .await
      .map_err(volume_not_found)?;

    tokio::time::sleep(self.config.attach_delay).await;
    self.watch(action).await.map_err(volume_not_found)?;

    info!(volume_id = %id, server_id = %server, "volume attached");
    Ok(())
  }

  async fn detach(&self, id: VolumeId, server: Option<ServerId>) -> Result<()> {
    let volume = self.get_by_id(id).await?;
    match (volume.attached_server, server) {
      (None, _) => return Err(VolumeError::NotAttached),
      (Some(holder), Some(server)) if holder != server => return Err(VolumeError::Attached),
      _ => (),
    }

    let action = self
      .client
      .detach_volume(id)
      .await
      .map_err(volume_not_found)?;
    self.watch(action).await.map_err(volume_not_found)?;

    info!(volume_id = %id, "volume detached");
    Ok(())
  }

  async fn resize(&self, id: VolumeId, size_gib: u64) -> Result<()> {
    let volume = self.get_by_id(id).await?;
    if volume.size_gib >= size_gib {
      return Err(VolumeError::VolumeSizeAlreadyReached);
    }

    let action = self
      .client
      .resize_volume(id, size_gib)
      .await
      .map_err(volume_not_found)?;
    self.watch(action).await.map_err(volume_not_found)?;

    info!(volume_id = %id, size_gib, "volume resized");
    Ok(())
  }

  async fn all(&self) -> Result<Vec<Volume>> {
    self.client.list_volumes().await.map_err(other)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::{Mutex, MutexGuard},
  };
  use tokio::time::Instant;

  type ClientResult<T> = std::result::Result<T, ProviderError>;

  #[derive(Default)]
  struct State {
    next_id: u64,
    volumes: BTreeMap<VolumeId, Volume>,
    servers: HashSet<ServerId>,
    actions: HashMap<ActionId, VecDeque<ActionStatus>>,
    /// Statuses reported by polls of the next action, the last one sticks.
    script: VecDeque<ActionStatus>,
    errors: HashMap<&'static str, ProviderError>,
    calls: Vec<&'static str>,
  }

  /// Applies every call at once and reports scripted action progress.
  #[derive(Default)]
  struct ScriptedClient(Mutex<State>);

  impl ScriptedClient {
    fn state(&self) -> MutexGuard<'_, State> {
      self.0.lock().expect("lock")
    }

    fn enter(&self, call: &'static str) -> ClientResult<MutexGuard<'_, State>> {
      let mut state = self.state();
      state.calls.push(call);
      let error = state.errors.remove(call);
      match error {
        Some(e) => Err(e),
        None => Ok(state),
      }
    }

    fn script(&self, statuses: Vec<ActionStatus>) {
      self.state().script = statuses.into();
    }

    fn fail(&self, call: &'static str, code: ProviderErrorCode) {
      self
        .state()
        .errors
        .insert(call, ProviderError::new(code, format!("{} failed", call)));
    }

    fn calls(&self, call: &str) -> usize {
      self.state().calls.iter().filter(|c| **c == call).count()
    }

    fn volume(&self, id: u64, size_gib: u64, server: Option<u64>) {
      self.state().volumes.insert(
        VolumeId(id),
        Volume {
          id: VolumeId(id),
          name: format!("pvc-{}", id),
          size_gib,
          location: "fsn1".into(),
          linux_device: server.map(|_| format!("/dev/sd{}", id)).unwrap_or_default(),
          attached_server: server.map(ServerId),
        },
      );
    }
  }

  fn start_action(state: &mut State) -> Action {
    state.next_id += 1;
    let id = ActionId(state.next_id);

    let mut statuses: VecDeque<_> = state.script.drain(..).collect();
    if statuses.is_empty() {
      statuses.push_back(ActionStatus::Success);
    }
    state.actions.insert(id, statuses);

    Action {
      id,
      status: ActionStatus::Running,
    }
  }

  #[async_trait]
  impl ProviderClient for ScriptedClient {
    async fn create_volume(&self, request: CreateVolumeRequest) -> ClientResult<(Volume, Action)> {
      let mut state = self.enter("create_volume")?;
      if state.volumes.values().any(|v| v.name == request.name) {
        return Err(ProviderError::new(
          ProviderErrorCode::UniquenessError,
          "name is already used",
        ));
      }

      state.next_id += 1;
      let volume = Volume {
        id: VolumeId(state.next_id),
        name: request.name,
        size_gib: request.size_gib,
        location: request.location,
        linux_device: String::new(),
        attached_server: None,
      };
      state.volumes.insert(volume.id, volume.clone());
      let action = start_action(&mut state);

      Ok((volume, action))
    }

    async fn get_volume(&self, id: VolumeId) -> ClientResult<Option<Volume>> {
      let state = self.enter("get_volume")?;
      let volume = state.volumes.get(&id).cloned();
      Ok(volume)
    }

    async fn get_volume_by_name(&self, name: &str) -> ClientResult<Option<Volume>> {
      let state = self.enter("get_volume_by_name")?;
      let volume = state.volumes.values().find(|v| v.name == name).cloned();
      Ok(volume)
    }

    async fn list_volumes(&self) -> ClientResult<Vec<Volume>> {
      let state = self.enter("list_volumes")?;
      let volumes = state.volumes.values().cloned().collect();
      Ok(volumes)
    }

    async fn delete_volume(&self, id: VolumeId) -> ClientResult<()> {
      let mut state = self.enter("delete_volume")?;
      match state.volumes.remove(&id) {
        Some(_) => Ok(()),
        None => Err(ProviderError::new(ProviderErrorCode::NotFound, "no volume")),
      }
    }

    async fn server_exists(&self, id: ServerId) -> ClientResult<bool> {
      let state = self.enter("server_exists")?;
      Ok(state.servers.contains(&id))
    }

    async fn attach_volume(&self, id: VolumeId, server: ServerId) -> ClientResult<Action> {
      let mut state = self.enter("attach_volume")?;
      if let Some(volume) = state.volumes.get_mut(&id) {
        volume.attached_server = Some(server);
        volume.linux_device = format!("/dev/sd{}", id);
      }

      Ok(start_action(&mut state))
    }

    async fn detach_volume(&self, id: VolumeId) -> ClientResult<Action> {
      let mut state = self.enter("detach_volume")?;
      if let Some(volume) = state.volumes.get_mut(&id) {
        volume.attached_server = None;
        volume.linux_device.clear();
      }

      Ok(start_action(&mut state))
    }

    async fn resize_volume(&self, id: VolumeId, size_gib: u64) -> ClientResult<Action> {
      let mut state = self.enter("resize_volume")?;
      if let Some(volume) = state.volumes.get_mut(&id) {
        volume.size_gib = size_gib;
      }

      Ok(start_action(&mut state))
    }

    async fn get_action(&self, id: ActionId) -> ClientResult<Action> {
      let mut state = self.enter("get_action")?;
      let statuses = state
        .actions
        .get_mut(&id)
        .ok_or_else(|| ProviderError::new(ProviderErrorCode::NotFound, "no action"))?;

      let status = if statuses.len() > 1 {
        statuses.pop_front().unwrap_or(ActionStatus::Success)
      } else {
        statuses.front().cloned().unwrap_or(ActionStatus::Success)
      };

      Ok(Action { id, status })
    }
  }

  fn gateway() -> ProviderGateway<ScriptedClient> {
    let client = ScriptedClient::default();
    client.state().servers.insert(ServerId(1));
    client.state().servers.insert(ServerId(2));
    ProviderGateway::new(client, ProviderGatewayConfig::default())
  }

  fn opts(name: &str) -> CreateOpts {
    CreateOpts {
      name: name.into(),
      min_size_gib: 10,
      location: "fsn1".into(),
      ..CreateOpts::default()
    }
  }

  fn action_failed() -> ActionStatus {
    ActionStatus::Error(ProviderError::new(
      ProviderErrorCode::Other,
      "action failed",
    ))
  }

  #[tokio::test(start_paused = true)]
  async fn create_polls_action_until_done() {
    let gw = gateway();
    gw.client().script(vec![
      ActionStatus::Running,
      ActionStatus::Running,
      ActionStatus::Success,
    ]);

    let volume = gw.create(opts("pvc-1")).await.expect("create");
    assert_eq!(volume.size_gib, 10);
    assert_eq!(gw.client().calls("get_action"), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn failed_create_deletes_volume() {
    let gw = gateway();
    gw.client().script(vec![action_failed()]);

    let err = gw.create(opts("pvc-1")).await.unwrap_err();
    assert!(matches!(err, VolumeError::Other(msg) if msg.contains("action failed")));
    assert_eq!(gw.client().calls("delete_volume"), 1);
    assert!(gw.all().await.expect("all").is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn failed_compensation_is_discarded() {
    let gw = gateway();
    gw.client().script(vec![action_failed()]);
    gw.client()
      .fail("delete_volume", ProviderErrorCode::Locked);

    let err = gw.create(opts("pvc-1")).await.unwrap_err();
    assert!(matches!(err, VolumeError::Other(msg) if msg.contains("action failed")));
    assert_eq!(gw.all().await.expect("all").len(), 1);
  }

  #[tokio::test]
  async fn uniqueness_error_is_already_exists() {
    let gw = gateway();
    gw.create(opts("pvc-1")).await.expect("create");

    assert_eq!(
      gw.create(opts("pvc-1")).await,
      Err(VolumeError::VolumeAlreadyExists)
    );
  }

  #[tokio::test(start_paused = true)]
  async fn attach_waits_before_polling() {
    let gw = gateway();
    gw.client().volume(5, 10, None);

    let start = Instant::now();
    gw.attach(VolumeId(5), ServerId(1)).await.expect("attach");

    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(
      gw.get_by_id(VolumeId(5)).await.expect("get").attached_server,
      Some(ServerId(1))
    );
  }

  #[tokio::test]
  async fn attach_prechecks() {
    let gw = gateway();
    gw.client().volume(5, 10, Some(2));

    assert_eq!(
      gw.attach(VolumeId(9), ServerId(1)).await,
      Err(VolumeError::VolumeNotFound)
    );
    assert_eq!(
      gw.attach(VolumeId(5), ServerId(9)).await,
      Err(VolumeError::ServerNotFound)
    );
    assert_eq!(
      gw.attach(VolumeId(5), ServerId(1)).await,
      Err(VolumeError::Attached)
    );
    assert_eq!(gw.client().calls("attach_volume"), 0);
  }

  #[tokio::test]
  async fn attach_error_codes() {
    let gw = gateway();
    gw.client().volume(5, 10, None);

    gw.client()
      .fail("attach_volume", ProviderErrorCode::Locked);
    assert_eq!(
      gw.attach(VolumeId(5), ServerId(1)).await,
      Err(VolumeError::LockedServer)
    );

    gw.client()
      .fail("attach_volume", ProviderErrorCode::VolumeLimitReached);
    assert_eq!(
      gw.attach(VolumeId(5), ServerId(1)).await,
      Err(VolumeError::AttachLimitReached)
    );
  }

  #[tokio::test]
  async fn detach_prechecks() {
    let gw = gateway();
    gw.client().volume(5, 10, None);
    gw.client().volume(6, 10, Some(2));

    assert_eq!(
      gw.detach(VolumeId(5), None).await,
      Err(VolumeError::NotAttached)
    );
    assert_eq!(
      gw.detach(VolumeId(6), Some(ServerId(1))).await,
      Err(VolumeError::Attached)
    );

    gw.detach(VolumeId(6), None).await.expect("detach");
    assert_eq!(gw.client().calls("detach_volume"), 1);
  }

  #[tokio::test]
  async fn delete_attached_volume() {
    let gw = gateway();
    gw.client().volume(5, 10, Some(1));

    assert_eq!(gw.delete(VolumeId(5)).await, Err(VolumeError::Attached));
    assert_eq!(gw.delete(VolumeId(9)).await, Err(VolumeError::VolumeNotFound));
  }

  #[tokio::test]
  async fn resize_must_grow() {
    let gw = gateway();
    gw.client().volume(5, 20, None);

    assert_eq!(
      gw.resize(VolumeId(5), 20).await,
      Err(VolumeError::VolumeSizeAlreadyReached)
    );
    gw.resize(VolumeId(5), 30).await.expect("resize");
    assert_eq!(gw.get_by_id(VolumeId(5)).await.expect("get").size_gib, 30);
  }

  #[tokio::test(start_paused = true)]
  async fn cancelled_wait_stops_polling() {
    let gw = gateway();
    gw.client().volume(5, 10, None);
    gw.client().script(vec![ActionStatus::Running]);

    let result = tokio::time::timeout(Duration::from_secs(5), gw.resize(VolumeId(5), 20)).await;
    assert!(result.is_err());

    let polls = gw.client().calls("get_action");
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(gw.client().calls("get_action"), polls);

    // the provider did the work, only the wait was abandoned
    assert_eq!(gw.get_by_id(VolumeId(5)).await.expect("get").size_gib, 20);
  }

  #[test]
  fn backoff_policy_from_config() {
    let config = ProviderGatewayConfig {
      max_wait: Some(Duration::from_secs(60)),
      ..ProviderGatewayConfig::default()
    };
    let policy = config.policy();

    assert_eq!(policy.initial_interval, Duration::from_secs(1));
    assert_eq!(policy.max_interval, Duration::from_secs(10));
    assert_eq!(policy.max_elapsed_time, Some(Duration::from_secs(60)));
    assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
  }
}
