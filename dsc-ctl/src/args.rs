use std::path::PathBuf;

use clap::{Parser, Subcommand};

//
// Command line for the control client.
//
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Host name of the disco master.
    #[arg(long, env = "DISCO_MASTER_HOST", default_value = "localhost", global = true)]
    pub master_host: String,

    /// Port of the disco master.
    #[arg(long, env = "DISCO_PORT", default_value_t = dsc_ctl::options::DEFAULT_PORT, global = true)]
    pub port: u16,

    /// Proxy every master request through this URL.
    #[arg(long, env = "DISCO_PROXY", global = true)]
    pub proxy: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a job to the master.
    Submit {
        /// Job name prefix.
        #[arg(short, long, default_value = "")]
        name: String,

        /// Worker executable shipped with the job.
        #[arg(long)]
        worker: PathBuf,

        /// Name of the workload the worker runs.
        #[arg(short, long)]
        workload: String,

        /// Input locations (`http://`, `disco://`, `tag://`, `raw://`, ...).
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<String>,

        /// Job parameters as `key=value`; values are parsed as JSON when possible.
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Submit a pipeline job instead of a map reduce job.
        #[arg(long)]
        pipeline: bool,

        /// Wait for the job and print its result locations.
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Wait for a submitted job and print its result locations.
    Wait {
        jobname: String,

        /// Give up waiting after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print the results of a finished job.
    Results {
        jobname: String,

        /// Print the result contents instead of their locations.
        #[arg(long)]
        cat: bool,
    },
}
