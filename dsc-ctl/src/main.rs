use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use serde_json::Value;
use tracing::info;

use common::home::WorkerPayload;
use common::job::{Job, JobType, NoTags};
use common::Params;
use dsc_ctl::{JobResults, Master, MasterOptions, Poll, Results};

mod args;
use args::{Args, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args = Args::parse();
    let mut options = MasterOptions::new(args.master_host, args.port);
    if let Some(proxy) = args.proxy.filter(|p| !p.is_empty()) {
        options = options.proxy(proxy);
    }
    let master = Master::new(options)?;

    match args.command {
        Commands::Submit {
            name,
            worker,
            workload,
            input,
            params,
            pipeline,
            wait,
            timeout,
        } => {
            let job = Job::new(name, WorkerPayload::Executable(worker), input)
                .env("DSC_WORKLOAD", workload)
                .params(parse_params(&params)?);
            let job_type = if pipeline { JobType::Pipeline } else { JobType::MapReduce };

            let handle = master.submit(&job.jobpack(job_type, &NoTags)?).await?;
            println!("{}", handle.jobname);

            if wait {
                let results = master.wait(&handle, timeout.map(Duration::from_secs)).await?;
                print_locations(&results);
            }
        }
        Commands::Wait { jobname, timeout } => {
            let results = master
                .wait(&JobResults::named(jobname), timeout.map(Duration::from_secs))
                .await?;
            print_locations(&results);
        }
        Commands::Results { jobname, cat } => {
            let results = match master.poll(&JobResults::named(&jobname)).await? {
                Poll::Ready(results) => results,
                Poll::Running => return Err(anyhow!("job `{jobname}` is still running")),
            };

            if cat {
                let mut reader = master.open_results(&results).await?;
                let copied = tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await?;
                info!("read {copied} bytes of results");
            } else {
                print_locations(&results);
            }
        }
    }

    Ok(())
}

fn print_locations(results: &Results) {
    for location in &results.outputs {
        println!("{location}");
    }
}

/// Parse `key=value` pairs, taking values as JSON where they parse and as
/// plain strings otherwise.
fn parse_params(pairs: &[String]) -> anyhow::Result<Params> {
    let mut params = Params::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("parameter `{pair}` is not of the form key=value"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}
