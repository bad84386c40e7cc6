//! The map stage: run the user map function and partition what it emits
//! into one output file per label.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info};

use common::stream::MultiReader;
use common::{Emitter, Error, Label, MapFn, MapOut, Params, Result};

use crate::task::{Output, Settings};

/// Records buffered between the map function and the partitioner.
pub const CHANNEL_CAPACITY: usize = 10;

/// Default bound on simultaneously open label files.
pub const DEFAULT_MAX_OPEN: usize = 64;

/// Run `map_fn` over `input` and write its records into
/// `map_out_<taskid>_<label>` files under `work_dir`.
///
/// Returns one output per label, ordered by label.
pub async fn run(
    map_fn: MapFn,
    params: &Params,
    input: MultiReader,
    settings: &Settings,
    work_dir: &Path,
    taskid: u64,
    max_open: usize,
) -> Result<Vec<Output>> {
    let (tx, mut rx) = mpsc::channel::<MapOut>(CHANNEL_CAPACITY);

    // The bridge must be built on the runtime, before moving to the blocking pool.
    let mut reader = SyncIoBridge::new(input);
    let params = params.clone();
    let producer = tokio::task::spawn_blocking(move || {
        let mut emitter = Emitter::new(tx);
        map_fn(&mut reader, &mut emitter, &params)
    });

    let mut sinks = LabelSinks::new(work_dir, taskid, max_open);
    let consumed = async {
        while let Some(out) = rx.recv().await {
            sinks.write(&out).await?;
        }
        sinks.finish().await
    }
    .await;
    // Unblocks the producer if we bailed out early.
    drop(rx);

    let produced = producer.await.map_err(|e| Error::callback("map", e))?;
    let files = consumed?;
    produced.map_err(|e| Error::callback("map", e))?;

    let mut outputs = Vec::with_capacity(files.len());
    for (label, path) in files {
        let size = tokio::fs::metadata(&path).await?.len();
        outputs.push(Output {
            label,
            location: settings.disco_location(&path).await?,
            size,
        });
    }

    info!("map produced {} partitions", outputs.len());
    Ok(outputs)
}

/// Per-label output files with a bound on open handles.
///
/// When the bound is hit the least recently opened file is flushed and
/// closed; it is reopened in append mode on its next record.
struct LabelSinks {
    dir: PathBuf,
    taskid: u64,
    max_open: usize,
    open: HashMap<Label, BufWriter<File>>,
    opened: VecDeque<Label>,
    paths: BTreeMap<Label, PathBuf>,
}

impl LabelSinks {
    fn new(dir: &Path, taskid: u64, max_open: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            taskid,
            max_open: max_open.max(1),
            open: HashMap::new(),
            opened: VecDeque::new(),
            paths: BTreeMap::new(),
        }
    }

    async fn write(&mut self, out: &MapOut) -> Result<()> {
        if !self.open.contains_key(&out.label) {
            let sink = self.open_sink(out.label).await?;
            self.open.insert(out.label, sink);
            self.opened.push_back(out.label);
        }

        if let Some(sink) = self.open.get_mut(&out.label) {
            sink.write_all(&out.value).await?;
            sink.write_all(b"\n").await?;
        }
        Ok(())
    }

    async fn open_sink(&mut self, label: Label) -> Result<BufWriter<File>> {
        while self.open.len() >= self.max_open {
            let Some(oldest) = self.opened.pop_front() else { break };
            if let Some(mut sink) = self.open.remove(&oldest) {
                debug!("closing sink for label {oldest}");
                sink.flush().await?;
            }
        }

        let file = match self.paths.get(&label) {
            Some(path) => OpenOptions::new().append(true).open(path).await?,
            None => {
                let path = self.dir.join(format!("map_out_{}_{label}", self.taskid));
                let file = File::create(&path).await?;
                self.paths.insert(label, path);
                file
            }
        };

        Ok(BufWriter::new(file))
    }

    /// Flush and close every sink, returning the files by label.
    async fn finish(&mut self) -> Result<BTreeMap<Label, PathBuf>> {
        for (_, mut sink) in self.open.drain() {
            sink.flush().await?;
            sink.into_inner().sync_all().await?;
        }
        self.opened.clear();

        Ok(std::mem::take(&mut self.paths))
    }
}
