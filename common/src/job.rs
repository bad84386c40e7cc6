use serde_json::{json, Map, Value};
use tracing::debug;

use crate::home::WorkerPayload;
use crate::jobpack::{JobPack, VERSION_1, VERSION_2};
use crate::stream::scheme_split;
use crate::{Error, Params, Result};

/// Name given to jobs submitted without one.
pub const DEFAULT_JOB_NAME: &str = "dscjob";

/// Kind of job to build a pack for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    MapReduce,
    Pipeline,
}

/// Resolves `tag://` inputs into replica URL sets.
///
/// Each inner vector holds the replicas of one blob.
pub trait TagResolver {
    fn urls(&self, tag: &str) -> Result<Vec<Vec<String>>>;
}

/// Resolver for jobs that never reference tags.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTags;

impl TagResolver for NoTags {
    fn urls(&self, tag: &str) -> Result<Vec<Vec<String>>> {
        Err(Error::NotImplemented(format!("resolving tag `{tag}`")))
    }
}

/// A job to be run.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub worker: WorkerPayload,
    pub inputs: Vec<String>,
    pub owner: Option<String>,
    pub env: Map<String, Value>,
    pub params: Option<Params>,
}

impl Job {
    pub fn new(name: impl Into<String>, worker: WorkerPayload, inputs: Vec<String>) -> Self {
        let mut name = name.into();
        if name.is_empty() {
            name = DEFAULT_JOB_NAME.to_string();
        }

        Self {
            name,
            worker,
            inputs,
            owner: None,
            env: Map::new(),
            params: None,
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Export `key` into the worker's environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Build the pack describing this job.
    pub fn jobpack(&self, job_type: JobType, tags: &dyn TagResolver) -> Result<JobPack> {
        let mut pack = JobPack::new(self.worker.clone());
        let owner = self.owner.clone().unwrap_or_else(default_owner);

        pack.set_dict("prefix", self.name.clone());
        pack.set_dict("owner", owner);
        pack.set_dict("scheduler", json!({}));
        pack.set_dict("save_info", "ddfs");
        pack.set_dict("worker", "./job");
        pack.set_dict("nr_reduces", 2);
        pack.set_dict("save_results", false);
        pack.set_dict("input", effective_inputs(&self.inputs, tags)?);

        pack = match job_type {
            JobType::MapReduce => {
                pack.set_dict("map?", true);
                pack.set_dict("reduce?", true);
                pack.with_version(VERSION_1)
            }
            JobType::Pipeline => pack.with_version(VERSION_2),
        };

        if let Some(params) = &self.params {
            pack.set_params(params.clone());
        }
        for (key, value) in &self.env {
            pack.set_env(key.clone(), value.clone());
        }

        Ok(pack)
    }
}

/// Expand `tag://` inputs into concrete URLs, keeping the first replica of
/// every blob. Other inputs pass through untouched.
pub fn effective_inputs(inputs: &[String], tags: &dyn TagResolver) -> Result<Vec<String>> {
    let mut effective = Vec::with_capacity(inputs.len());

    for input in inputs {
        match scheme_split(input) {
            ("tag", rest) => {
                let blobs = tags.urls(rest)?;
                debug!("tag `{rest}` resolved to {} blobs", blobs.len());
                for replicas in blobs {
                    let first = replicas
                        .into_iter()
                        .next()
                        .ok_or_else(|| Error::decode(format!("tag `{rest}` has a blob without replicas")))?;
                    effective.push(first);
                }
            }
            _ => effective.push(input.clone()),
        }
    }

    Ok(effective)
}

fn default_owner() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());

    format!("{user}@{host}")
}
