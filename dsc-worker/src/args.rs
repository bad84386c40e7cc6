use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(version, about = "Run one stage of a disco task", long_about = None)]
pub struct Args {
    /// The workload to run, as named in the job environment.
    #[arg(short, long, env = "DSC_WORKLOAD")]
    pub workload: String,

    /// Where output files are written. Defaults to the current directory.
    #[arg(long, env = "DSC_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// How reduce input is sorted, for workloads that sort.
    #[arg(long, value_enum, default_value_t = SortKind::Utility)]
    pub sort: SortKind,

    /// Upper bound on map output files held open at once.
    #[arg(long, default_value_t = dsc_worker::map::DEFAULT_MAX_OPEN)]
    pub max_open_outputs: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortKind {
    /// The system sort(1) utility.
    Utility,
    /// In process, spilling to disk.
    Spill,
}
