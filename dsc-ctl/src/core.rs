use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use url::Url;

use common::jobpack::JobPack;
use common::stream::{http_source, loc_str, scheme_split, MultiReader};
use common::{Error, Result};

use crate::options::MasterOptions;
use crate::results::{decode_response, JobResults, Poll, Results};

/// Interval between polls while waiting, also sent to the master as the
/// long-poll timeout.
pub const POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Client for a disco master.
///
/// Cloning is cheap and clones share one connection pool, so a single
/// instance can serve concurrent submissions and polls.
#[derive(Debug, Clone)]
pub struct Master {
    client: reqwest::Client,
    options: MasterOptions,
    url: String,
    poll_interval: Duration,
}

impl Master {
    pub fn new(options: MasterOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = &options.proxy {
            debug!("proxying master requests through {proxy}");
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }

        let url = options.master_url();
        Url::parse(&url)?;

        Ok(Self {
            client: builder.build()?,
            options,
            url,
            poll_interval: POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Encode and submit `pack`.
    pub async fn submit(&self, pack: &JobPack) -> Result<JobResults> {
        self.submit_encoded(pack.encode()?).await
    }

    /// Submit an already encoded job pack.
    pub async fn submit_encoded(&self, pack: Bytes) -> Result<JobResults> {
        let url = format!("{}/disco/job/new", self.url);
        info!("submitting {} byte job pack to {url}", pack.len());

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(pack)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("master rejected job: {status}: {body}");
            return Err(Error::Status { url, status });
        }

        let job = JobResults::decode(&response.bytes().await?)?;
        info!("submitted {} ({})", job.jobname, job.status);
        Ok(job)
    }

    /// Ask the master once whether `job` is done.
    ///
    /// A non-success reply is taken to mean the job is still running.
    pub async fn poll(&self, job: &JobResults) -> Result<Poll> {
        let url = format!("{}/disco/ctrl/get_results", self.url);
        let body = json!([self.poll_interval.as_millis() as u64, [&job.jobname]]);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            warn!("polling {} answered {status}, assuming it is still running", job.jobname);
            return Ok(Poll::Running);
        }

        let (job_status, outputs) = decode_response(&response.bytes().await?)?;
        debug!("{} is {job_status}", job.jobname);
        if job_status == "active" {
            return Ok(Poll::Running);
        }

        Ok(Poll::Ready(Results { outputs }))
    }

    /// Poll until `job` leaves the running state.
    ///
    /// Gives up with [`Error::Timeout`] once `deadline` has passed, including
    /// while a poll is still waiting on the master.
    pub async fn wait(&self, job: &JobResults, deadline: Option<Duration>) -> Result<Results> {
        let started = Instant::now();
        let remaining = |deadline: Duration| {
            let left = deadline.saturating_sub(started.elapsed());
            if left.is_zero() {
                Err(Error::Timeout(deadline))
            } else {
                Ok(left)
            }
        };

        loop {
            let poll = match deadline {
                Some(deadline) => timeout(remaining(deadline)?, self.poll(job))
                    .await
                    .map_err(|_| Error::Timeout(deadline))??,
                None => self.poll(job).await?,
            };

            if let Poll::Ready(results) = poll {
                info!("{} finished with {} results", job.jobname, results.outputs.len());
                return Ok(results);
            }

            let pause = match deadline {
                Some(deadline) => remaining(deadline)?.min(self.poll_interval),
                None => self.poll_interval,
            };
            sleep(pause).await;
        }
    }

    /// Map a `disco://` location on the master host to its HTTP address.
    /// Anything else is returned unchanged.
    pub fn convert_uri(&self, uri: &str) -> String {
        match loc_str(uri) {
            ("disco", host, path) if host == self.options.master_host => {
                format!("http://{host}:{}/{path}", self.options.master_port)
            }
            _ => uri.to_string(),
        }
    }

    /// Open every result location, in order, as one stream.
    pub async fn open_results(&self, results: &Results) -> Result<MultiReader> {
        let mut sources = Vec::with_capacity(results.outputs.len());

        for output in &results.outputs {
            let address = self.convert_uri(output);
            let source = match scheme_split(&address).0 {
                "http" | "https" => http_source(&self.client, &address).await?,
                "disco" | "dir" => return Err(Error::NotImplemented(format!("reading `{address}`"))),
                other => return Err(Error::UnsupportedScheme(other.to_string())),
            };
            sources.push(source);
        }

        Ok(MultiReader::new(sources))
    }
}
