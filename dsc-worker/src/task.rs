//! Payloads exchanged with the launcher: the task, its inputs and the
//! outputs reported back.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use common::{Error, Label, Result, LABEL_ALL};

/// The stage a worker invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Stage {
    Map,
    MapShuffle,
    ReduceShuffle,
    /// The terminal stage: reduce, or passthrough without a reduce function.
    Reduce,
}

impl From<String> for Stage {
    fn from(stage: String) -> Self {
        match stage.as_str() {
            "map" => Stage::Map,
            "map_shuffle" => Stage::MapShuffle,
            "reduce_shuffle" => Stage::ReduceShuffle,
            _ => Stage::Reduce,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Map => "map",
            Stage::MapShuffle => "map_shuffle",
            Stage::ReduceShuffle => "reduce_shuffle",
            Stage::Reduce => "reduce",
        };
        f.write_str(name)
    }
}

/// The assignment handed to this worker by the launcher.
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    pub host: String,
    pub master: String,
    pub jobname: String,
    pub taskid: u64,
    pub stage: Stage,
    #[serde(default)]
    pub grouping: String,
    #[serde(default)]
    pub group: Value,
    pub disco_port: u16,
    pub put_port: u16,
    pub disco_data: PathBuf,
    pub ddfs_data: PathBuf,
    pub jobfile: PathBuf,
}

/// Per-run configuration derived from the [`Task`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// This worker's host name, as the cluster knows it.
    pub host: String,
    pub master_host: String,
    pub port: u16,
    pub put_port: u16,
    pub disco_data: PathBuf,
    pub ddfs_data: PathBuf,
}

impl Settings {
    /// Fails when the port in the master address disagrees with the port
    /// the task was given.
    pub fn from_task(task: &Task) -> Result<Self> {
        let (master_host, port) = host_and_port(&task.master)?;
        if port != task.disco_port {
            return Err(Error::protocol(format!(
                "port mismatch: master `{}` is on {port}, task says {}",
                task.master, task.disco_port
            )));
        }

        Ok(Self {
            host: task.host.clone(),
            master_host,
            port,
            put_port: task.put_port,
            disco_data: task.disco_data.clone(),
            ddfs_data: task.ddfs_data.clone(),
        })
    }

    /// The `disco://` location under which `path` is served by this host.
    ///
    /// `path` must live under `disco_data`; symlinks are resolved on both.
    pub async fn disco_location(&self, path: &Path) -> Result<String> {
        let root = tokio::fs::canonicalize(&self.disco_data).await?;
        let path = tokio::fs::canonicalize(path).await?;
        let relative = path.strip_prefix(&root).map_err(|_| {
            Error::protocol(format!(
                "output {} is outside of disco_data {}",
                path.display(),
                root.display()
            ))
        })?;

        Ok(format!("disco://{}/disco/{}", self.host, relative.display()))
    }
}

/// Split a master address, with or without scheme, into host and port.
pub fn host_and_port(master: &str) -> Result<(String, u16)> {
    let url = if master.contains("://") {
        Url::parse(master)?
    } else {
        Url::parse(&format!("http://{master}"))?
    };

    let host = url
        .host_str()
        .ok_or_else(|| Error::decode(format!("master address `{master}` has no host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::decode(format!("master address `{master}` has no port")))?;

    Ok((host.to_string(), port))
}

/////////////////////////////////////////////////////////////////////////////
// Inputs
/////////////////////////////////////////////////////////////////////////////

/// One assigned input. Only the first replica is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub id: i64,
    pub status: String,
    pub label: Label,
    pub replica_id: i64,
    pub replica_location: String,
}

#[derive(Deserialize)]
struct RawInput(i64, String, RawLabel, Vec<(i64, String)>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLabel {
    Index(Label),
    Named(IgnoredAny),
}

/// Decode the reply to `INPUT`:
/// `["done", [[id, status, label, [[replica_id, url], ...]], ...]]`.
///
/// A string label (`"all"`) becomes [`LABEL_ALL`].
pub fn decode_inputs(payload: &[u8]) -> Result<Vec<Input>> {
    let (flag, inputs): (String, Value) = serde_json::from_slice(payload)
        .map_err(|e| Error::decode(format!("input reply: {e}")))?;
    if flag != "done" {
        return Err(Error::protocol(format!(
            "input flag `{flag}`: only a single complete input pass is supported"
        )));
    }

    let inputs: Vec<RawInput> =
        serde_json::from_value(inputs).map_err(|e| Error::decode(format!("input list: {e}")))?;

    inputs
        .into_iter()
        .map(|RawInput(id, status, label, replicas)| {
            let (replica_id, replica_location) = replicas
                .into_iter()
                .next()
                .ok_or_else(|| Error::decode(format!("input {id} has no replicas")))?;
            let label = match label {
                RawLabel::Index(label) => label,
                RawLabel::Named(_) => LABEL_ALL,
            };

            Ok(Input {
                id,
                status,
                label,
                replica_id,
                replica_location,
            })
        })
        .collect()
}

/////////////////////////////////////////////////////////////////////////////
// Outputs
/////////////////////////////////////////////////////////////////////////////

/// One result produced by this worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub label: Label,
    pub location: String,

    /// Size in bytes, 0 when unknown.
    pub size: u64,
}

impl Output {
    /// Report an input as an output of its own.
    pub fn passthrough(input: &Input) -> Self {
        Self {
            label: input.label,
            location: input.replica_location.clone(),
            size: 0,
        }
    }

    /// The `OUTPUT` payload: `[label, location, size]`.
    pub fn message(&self) -> (Label, &str, u64) {
        (self.label, &self.location, self.size)
    }
}
