use anyhow::anyhow;
use clap::Parser;
use tracing::info;

use dsc_worker::{SortStep, Worker};

mod args;
use args::{Args, SortKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args = Args::parse();

    let workload = workload::try_named(&args.workload)
        .ok_or_else(|| anyhow!("the workload `{}` is not a known workload", args.workload))?;
    info!("running workload `{}`", args.workload);

    let sort_step = match args.sort {
        SortKind::Utility => SortStep::Utility,
        SortKind::Spill => SortStep::spill(),
    };

    let mut worker = Worker::from_workload(workload)
        .sort_with(sort_step)
        .max_open_outputs(args.max_open_outputs);
    if let Some(dir) = args.work_dir {
        worker = worker.work_dir(dir);
    }

    worker.run().await?;
    Ok(())
}
