//! Client side of disco: submit jobs to a master, wait for them and read
//! their results.
//!
//! ```no_run
//! # use common::{home::WorkerPayload, job::{Job, JobType, NoTags}};
//! # use dsc_ctl::{Master, MasterOptions};
//! # async fn run() -> common::Result<()> {
//! let master = Master::new(MasterOptions::from_env()?)?;
//! let job = Job::new("wordcount", WorkerPayload::Executable("target/release/dsc-worker".into()), vec![
//!     "http://discoproject.org/media/text/chekhov.txt".into(),
//! ]);
//! let handle = master.submit(&job.jobpack(JobType::MapReduce, &NoTags)?).await?;
//! let results = master.wait(&handle, None).await?;
//! let reader = master.open_results(&results).await?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod options;
pub mod results;

pub use crate::core::Master;
pub use crate::options::MasterOptions;
pub use crate::results::{JobResults, Poll, Results};
