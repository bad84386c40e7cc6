//! Worker side runtime for disco jobs.
//!
//! A worker process is launched by a disco node for exactly one stage of one
//! task. It talks to its launcher over stdin/stdout, runs the user supplied
//! map or reduce function and reports where its outputs live.
//!
//! ```no_run
//! # fn map(_: &mut dyn std::io::Read, _: &mut common::Emitter, _: &common::Params) -> anyhow::Result<()> { Ok(()) }
//! # async fn run() -> common::Result<()> {
//! dsc_worker::Worker::new(map).sort(true).run().await
//! # }
//! ```

use common::{Error, Result};

pub mod core;
pub mod inputs;
pub mod map;
pub mod protocol;
pub mod reduce;
pub mod task;

pub use crate::core::Worker;
pub use crate::reduce::SortStep;

/// Run a user callback on the blocking pool, tagging failures with `stage`.
pub(crate) async fn blocking<T, F>(stage: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::callback(stage, e))?
        .map_err(|e| Error::callback(stage, e))
}
