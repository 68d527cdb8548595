use crate::{
  controller::{parse_labels, LabelParseError},
  node::DEFAULT_MAX_VOLUMES_PER_NODE,
};
use clap::Parser;
use csi_proto::Endpoint;
use std::collections::HashMap;

const DEFAULT_ENDPOINT: &str = "unix:///run/csi/socket";

/// Node plugin settings. Every flag can also be set from the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "cloudvol-csi-node", version, about = "CloudVol CSI node plugin")]
pub struct NodeConfig {
  /// CSI endpoint to serve on (`unix:///path` or `tcp://host:port`).
  #[arg(long, env = "CSI_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
  pub endpoint: Endpoint,

  /// Server ID of this node, reported to the controller through NodeGetInfo.
  #[arg(long, env = "CLOUDVOL_NODE_ID")]
  pub node_id: String,

  /// Location of this node, used as its topology segment.
  #[arg(long, env = "CLOUDVOL_LOCATION")]
  pub location: String,

  #[arg(long, env = "CLOUDVOL_MAX_VOLUMES_PER_NODE", default_value_t = DEFAULT_MAX_VOLUMES_PER_NODE)]
  pub max_volumes_per_node: u32,
}

/// Controller plugin settings.
///
/// No controller binary ships with this crate; an embedder parses this
/// next to its own `ProviderClient` credentials and hands the result to
/// [`ControllerServer::new`] and [`run_controller`].
///
/// [`ControllerServer::new`]: crate::ControllerServer::new
/// [`run_controller`]: crate::server::run_controller
#[derive(Debug, Clone, Parser)]
#[command(name = "cloudvol-csi-controller", about = "CloudVol CSI controller plugin")]
pub struct ControllerConfig {
  #[arg(long, env = "CSI_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
  pub endpoint: Endpoint,

  /// Location of volumes whose request carries no topology.
  #[arg(long, env = "CLOUDVOL_LOCATION")]
  pub location: String,

  /// Labels added to every new volume, as `key=value,...`.
  #[arg(long, env = "CLOUDVOL_VOLUME_EXTRA_LABELS", default_value = "")]
  pub extra_volume_labels: String,
}

impl ControllerConfig {
  pub fn extra_labels(&self) -> Result<HashMap<String, String>, LabelParseError> {
    parse_labels(&self.extra_volume_labels)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;
  use test_case::test_case;

  #[test]
  fn node_defaults() {
    let config = NodeConfig::try_parse_from(vec![
      "cloudvol-csi-node",
      "--node-id",
      "42",
      "--location",
      "fsn1",
    ])
    .unwrap();

    assert_eq!(config.node_id, "42");
    assert_eq!(config.location, "fsn1");
    assert_eq!(config.max_volumes_per_node, 16);
    assert_eq!(
      config.endpoint,
      Endpoint::Unix(PathBuf::from("/run/csi/socket"))
    );
  }

  #[test_case(&["--node-id", "42"] ; "missing location")]
  #[test_case(&["--location", "fsn1"] ; "missing node id")]
  #[test_case(&["--node-id", "42", "--location", "fsn1", "--endpoint", "/tmp/csi.sock"] ; "endpoint without scheme")]
  #[test_case(&["--node-id", "42", "--location", "fsn1", "--max-volumes-per-node", "-1"] ; "negative volume limit")]
  fn node_rejects(args: &[&str]) {
    let argv = std::iter::once("cloudvol-csi-node").chain(args.iter().copied());
    assert!(NodeConfig::try_parse_from(argv).is_err());
  }

  #[test]
  fn controller_labels() {
    let config = ControllerConfig::try_parse_from(vec![
      "cloudvol-csi-controller",
      "--location",
      "nbg1",
      "--endpoint",
      "tcp://127.0.0.1:10000",
      "--extra-volume-labels",
      "cluster=prod,team=storage",
    ])
    .unwrap();

    let labels = config.extra_labels().unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.get("cluster"), Some(&"prod".to_owned()));
    assert_eq!(
      config.endpoint,
      Endpoint::Tcp(([127, 0, 0, 1], 10000).into())
    );
  }

  #[test]
  fn controller_without_extra_labels() {
    let config =
      ControllerConfig::try_parse_from(vec!["cloudvol-csi-controller", "--location", "nbg1"])
        .unwrap();

    assert!(config.extra_labels().unwrap().is_empty());
  }
}
