//! Shared pieces of the disco client and worker.
//!
//! Users write map and reduce functions against the types in this crate,
//! package them into a [`jobpack::JobPack`] and submit them to a disco
//! master. Worker processes launched by the master read their job metadata
//! back out of the same pack.

use std::hash::Hasher;
use std::io::{Read, Write};

use anyhow::anyhow;
use bytes::Bytes;
use tokio::sync::mpsc;

pub mod error;
pub mod home;
pub mod job;
pub mod jobpack;
pub mod stream;

pub use error::{Error, Result};

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// Partition key attached to map output and to task inputs.
///
/// [`LABEL_ALL`] marks an input that is not bound to a single partition.
pub type Label = i64;

/// Label of an input that applies to every partition.
pub const LABEL_ALL: Label = -1;

/// User parameters shipped in the `params` entry of the job dict.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// A map function reads the concatenated task input and emits
/// `(value, label)` records through the [`Emitter`].
///
/// It runs on a blocking thread, so plain [`Read`] is fine here.
pub type MapFn = fn(input: &mut dyn Read, emit: &mut Emitter, params: &Params) -> anyhow::Result<()>;

/// A reduce function reads the (optionally sorted) task input and writes
/// the single task output.
pub type ReduceFn =
    fn(input: &mut dyn Read, output: &mut dyn Write, params: &Params) -> anyhow::Result<()>;

/// Replacement for the default sort step run before reduce.
pub type SortFn = fn(input: &mut dyn Read, output: &mut dyn Write) -> anyhow::Result<()>;

/// Hook run on the finalised reduce output, e.g. to upload it somewhere.
pub type OutputFn = fn(output: &mut dyn Read, params: &Params) -> anyhow::Result<()>;

/// A map reduce application.
#[derive(Copy, Clone)]
pub struct Workload {
    pub map_fn: MapFn,

    /// `None` turns the terminal stage into a passthrough.
    pub reduce_fn: Option<ReduceFn>,

    /// Whether reduce input is sorted first.
    pub sort: bool,
}

/////////////////////////////////////////////////////////////////////////////
// Map output
/////////////////////////////////////////////////////////////////////////////

/// A single record emitted by a map function.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct MapOut {
    /// The record, written to the label's output followed by a newline.
    pub value: Bytes,

    /// The partition the record belongs to.
    pub label: Label,
}

impl MapOut {
    pub fn new(value: impl Into<Bytes>, label: Label) -> Self {
        Self {
            value: value.into(),
            label,
        }
    }
}

/// Sending half of the map output channel handed to [`MapFn`]s.
///
/// Sends block while the channel is full, which throttles the map function
/// to the speed of the partitioning consumer.
#[derive(Debug, Clone)]
pub struct Emitter {
    sender: mpsc::Sender<MapOut>,
}

impl Emitter {
    pub fn new(sender: mpsc::Sender<MapOut>) -> Self {
        Self { sender }
    }

    /// Emit one record under `label`.
    ///
    /// Must not be called from async context.
    pub fn emit(&mut self, value: impl Into<Bytes>, label: Label) -> anyhow::Result<()> {
        self.sender
            .blocking_send(MapOut::new(value, label))
            .map_err(|_| anyhow!("map output consumer went away"))
    }
}

/// Hashes an intermediate key.
pub fn ihash(key: &[u8]) -> u32 {
    let mut hasher = fnv::FnvHasher::with_key(0);
    hasher.write(key);
    (hasher.finish() & 0x7fffffff) as u32
}

/// The label a key is routed to when there are `n_partitions` reduces.
pub fn partition(key: &[u8], n_partitions: u32) -> Label {
    Label::from(ihash(key) % n_partitions.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_bounded() {
        for key in [&b"alpha"[..], b"beta", b"", b"gamma delta"] {
            let label = partition(key, 3);
            assert!((0..3).contains(&label));
            assert_eq!(label, partition(key, 3));
        }
        assert_eq!(partition(b"anything", 0), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn emitter_feeds_channel_from_blocking_code() {
        let (tx, mut rx) = mpsc::channel(1);
        let producer = tokio::task::spawn_blocking(move || {
            let mut emitter = Emitter::new(tx);
            emitter.emit("a", 0)?;
            emitter.emit("b", 1)
        });

        assert_eq!(rx.recv().await, Some(MapOut::new("a", 0)));
        assert_eq!(rx.recv().await, Some(MapOut::new("b", 1)));
        assert_eq!(rx.recv().await, None);
        producer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn emit_fails_once_consumer_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result = tokio::task::spawn_blocking(move || Emitter::new(tx).emit("a", 0))
            .await
            .unwrap();
        assert!(result.is_err());
    }
}
