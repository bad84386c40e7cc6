//! Shuffle and reduce stages.

use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use bytesize::MB;
use ext_sort::{buffer::mem::MemoryLimitedBufferBuilder, ExternalSorter, ExternalSorterBuilder};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info};

use common::stream::MultiReader;
use common::{Error, OutputFn, Params, ReduceFn, Result, SortFn};

use crate::blocking;
use crate::task::{Output, Settings};

/// How reduce input is sorted when sorting is enabled.
#[derive(Debug, Clone, Copy, Default)]
pub enum SortStep {
    /// Pipe through `sort(1)`, keyed on the first field, in the C locale.
    #[default]
    Utility,

    /// Sort lines in process, spilling sorted runs to the work directory
    /// once `buffer_bytes` are held in memory. Input must be UTF-8.
    Spill { buffer_bytes: u64 },

    /// A user supplied sort.
    Custom(SortFn),
}

impl SortStep {
    pub fn spill() -> Self {
        SortStep::Spill {
            buffer_bytes: 100 * MB,
        }
    }
}

/// Concatenate all inputs into `reduce_shuffle_<taskid>`.
pub async fn shuffle(mut input: MultiReader, settings: &Settings, work_dir: &Path, taskid: u64) -> Result<Output> {
    let path = work_dir.join(format!("reduce_shuffle_{taskid}"));
    let mut file = tokio::fs::File::create(&path).await?;
    let size = tokio::io::copy(&mut input, &mut file).await?;
    file.sync_all().await?;
    input.close();

    debug!("shuffled {size} bytes into {}", path.display());
    Ok(Output {
        label: 0,
        location: settings.disco_location(&path).await?,
        size,
    })
}

/// Everything the terminal reduce needs besides its input.
pub struct Reduce<'a> {
    pub reduce_fn: ReduceFn,
    pub sort: Option<SortStep>,
    pub on_output: Option<OutputFn>,
    pub params: &'a Params,
    pub work_dir: &'a Path,
    pub taskid: u64,
}

impl Reduce<'_> {
    /// Sort if asked to, reduce into `reduce_out_<taskid>`, then run the
    /// output hook over the finished file.
    pub async fn run(&self, input: MultiReader, settings: &Settings) -> Result<Output> {
        let out_path = self.work_dir.join(format!("reduce_out_{}", self.taskid));

        match self.sort {
            None => {
                let reader = SyncIoBridge::new(input);
                self.reduce(reader, &out_path).await?;
            }
            Some(SortStep::Utility) => self.reduce_sorted_by_utility(input, &out_path).await?,
            Some(SortStep::Spill { buffer_bytes }) => {
                let sorted = self.spill_sort(input, buffer_bytes).await?;
                self.reduce(fs::File::open(&sorted)?, &out_path).await?;
            }
            Some(SortStep::Custom(sort_fn)) => {
                let sorted = self.custom_sort(input, sort_fn).await?;
                self.reduce(fs::File::open(&sorted)?, &out_path).await?;
            }
        }

        if let Some(hook) = self.on_output {
            let params = self.params.clone();
            let path = out_path.clone();
            blocking("output", move || {
                let mut reader = BufReader::new(fs::File::open(path)?);
                hook(&mut reader, &params)
            })
            .await?;
        }

        let size = tokio::fs::metadata(&out_path).await?.len();
        info!("reduce wrote {size} bytes");
        Ok(Output {
            label: 0,
            location: settings.disco_location(&out_path).await?,
            size,
        })
    }

    async fn reduce<R: Read + Send + 'static>(&self, mut input: R, out_path: &Path) -> Result<()> {
        let reduce_fn = self.reduce_fn;
        let params = self.params.clone();
        let out_path = out_path.to_path_buf();

        blocking("reduce", move || {
            let file = fs::File::create(out_path)?;
            let mut output = BufWriter::new(file);
            reduce_fn(&mut input, &mut output, &params)?;
            output.flush()?;
            output.get_ref().sync_all()?;
            Ok(())
        })
        .await
    }

    async fn reduce_sorted_by_utility(&self, input: MultiReader, out_path: &Path) -> Result<()> {
        let mut child = Command::new("sort")
            .args(["-s", "-k", "1,1", "-T"])
            .arg(self.work_dir)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(Error::Io(io::Error::other("sort started without pipes")));
        };

        let feeder = tokio::spawn(async move {
            let mut input = input;
            let fed = tokio::io::copy(&mut input, &mut stdin).await?;
            stdin.shutdown().await?;
            Ok::<_, io::Error>(fed)
        });

        self.reduce(SyncIoBridge::new(stdout), out_path).await?;

        let fed = feeder.await.map_err(io::Error::other)??;
        let status = child.wait().await?;
        if !status.success() {
            return Err(Error::Io(io::Error::other(format!("sort exited with {status}"))));
        }

        debug!("sort(1) consumed {fed} bytes");
        Ok(())
    }

    async fn spill_sort(&self, input: MultiReader, buffer_bytes: u64) -> Result<PathBuf> {
        let work_dir = self.work_dir.to_path_buf();
        let sorted = work_dir.join(format!("reduce_sorted_{}", self.taskid));
        let out_path = sorted.clone();
        let reader = SyncIoBridge::new(input);

        blocking("sort", move || {
            let sorter: ExternalSorter<String, io::Error, MemoryLimitedBufferBuilder> = ExternalSorterBuilder::new()
                .with_tmp_dir(&work_dir)
                .with_buffer(MemoryLimitedBufferBuilder::new(buffer_bytes))
                .build()
                .map_err(|e| io::Error::other(e.to_string()))?;

            let lines = BufReader::new(reader).lines();
            let sorted = sorter.sort(lines).map_err(|e| io::Error::other(e.to_string()))?;

            let mut output = BufWriter::new(fs::File::create(&out_path)?);
            for line in sorted {
                let line = line.map_err(|e| io::Error::other(e.to_string()))?;
                output.write_all(line.as_bytes())?;
                output.write_all(b"\n")?;
            }
            output.flush()?;
            Ok(())
        })
        .await?;

        Ok(sorted)
    }

    async fn custom_sort(&self, input: MultiReader, sort_fn: SortFn) -> Result<PathBuf> {
        let sorted = self.work_dir.join(format!("reduce_sorted_{}", self.taskid));
        let out_path = sorted.clone();
        let mut reader = SyncIoBridge::new(input);

        blocking("sort", move || {
            let mut output = BufWriter::new(fs::File::create(out_path)?);
            sort_fn(&mut reader, &mut output)?;
            output.flush()?;
            Ok(())
        })
        .await?;

        Ok(sorted)
    }
}
