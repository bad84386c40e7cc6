//! Master replies about submitted jobs.

use serde::de::IgnoredAny;
use serde::Deserialize;

use common::{Error, Result};

/// Handle for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResults {
    pub status: String,
    pub jobname: String,
    pub finished: bool,
}

impl JobResults {
    /// Handle for a job submitted elsewhere, known only by name.
    pub fn named(jobname: impl Into<String>) -> Self {
        Self {
            status: String::new(),
            jobname: jobname.into(),
            finished: false,
        }
    }

    /// Decode the `[status, jobname]` reply to a submission.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let (status, jobname): (String, String) = serde_json::from_slice(body)
            .map_err(|e| Error::decode(format!("submission reply: {e}")))?;

        Ok(Self {
            status,
            jobname,
            finished: false,
        })
    }
}

/// Locations of a finished job's results, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Results {
    pub outputs: Vec<String>,
}

/// Outcome of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    Running,
    Ready(Results),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Entry {
    Replica(IgnoredAny, String),
    Url(String),
}

impl Entry {
    fn into_url(self) -> String {
        match self {
            Entry::Replica(_, url) | Entry::Url(url) => url,
        }
    }
}

/// Decode a `get_results` reply:
/// `[[jobname, [status, [[entry, ...], ...]]]]`, where an entry is
/// `[replica_id, url]` or a bare url.
///
/// Only the first group is used. When it is empty, or missing, the result
/// is a single empty location.
pub fn decode_response(body: &[u8]) -> Result<(String, Vec<String>)> {
    type Reply = Vec<(String, (String, Vec<Vec<Entry>>))>;

    let reply: Reply =
        serde_json::from_slice(body).map_err(|e| Error::decode(format!("results reply: {e}")))?;
    let (_jobname, (status, groups)) = reply
        .into_iter()
        .next()
        .ok_or_else(|| Error::decode("results reply names no job"))?;

    let outputs: Vec<String> = groups
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .map(Entry::into_url)
        .collect();

    if outputs.is_empty() {
        return Ok((status, vec![String::new()]));
    }
    Ok((status, outputs))
}
