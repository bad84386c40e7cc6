//! Converts application names to actual application code.
//!
//! # Example
//!
//! ```
//! # use anyhow::Result;
//! # fn main() -> Result<()> {
//! let wc = workload::named("wc")?;
//! assert!(wc.sort);
//! # Ok(())
//! # }
//! ```

use std::io::{BufRead, BufReader, Read, Write};

use anyhow::{anyhow, bail, Result};

use common::{Params, Workload};

pub mod vertex_degree;
pub mod wc;

/// Number of reduce partitions when the job does not set `partitions`.
pub const DEFAULT_PARTITIONS: u32 = 2;

/// Gets the [`Workload`] named `name`.
///
/// Returns [`None`] if no application with the given name was found.
pub fn try_named(name: &str) -> Option<Workload> {
    match name {
        "wc" => Some(Workload {
            map_fn: wc::map,
            reduce_fn: Some(wc::reduce),
            sort: true,
        }),
        "vertex-degree" => Some(Workload {
            map_fn: vertex_degree::map,
            reduce_fn: Some(vertex_degree::reduce),
            sort: true,
        }),
        "wc-map-only" => Some(Workload {
            map_fn: wc::map,
            reduce_fn: None,
            sort: false,
        }),
        _ => None,
    }
}

/// Gets the [`Workload`] named `name`.
///
/// Returns an [`anyhow::Error`] if no application with the given name was found.
pub fn named(name: &str) -> Result<Workload> {
    match try_named(name) {
        Some(app) => Ok(app),
        None => bail!("No app named `{}` found.", name),
    }
}

/// The `partitions` job parameter.
pub fn partitions(params: &Params) -> Result<u32> {
    match params.get("partitions") {
        None => Ok(DEFAULT_PARTITIONS),
        Some(value) => value
            .as_u64()
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| anyhow!("`partitions` must be a positive integer, got {value}")),
    }
}

/// Sum `<key> <count>` lines, sorted by key, writing one line per key
/// through `render`.
pub(crate) fn sum_sorted(
    input: &mut dyn Read,
    output: &mut dyn Write,
    render: fn(&str, u64) -> String,
) -> Result<()> {
    let mut current: Option<(String, u64)> = None;

    for line in BufReader::new(input).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }

        let (key, count) = line
            .rsplit_once(' ')
            .ok_or_else(|| anyhow!("malformed record `{line}`"))?;
        let count: u64 = count.parse()?;

        if let Some((previous, total)) = current.as_mut() {
            if previous.as_str() == key {
                *total += count;
                continue;
            }
        }
        if let Some((previous, total)) = current.replace((key.to_string(), count)) {
            output.write_all(render(&previous, total).as_bytes())?;
        }
    }

    // write the last group to the output
    if let Some((key, total)) = current {
        output.write_all(render(&key, total).as_bytes())?;
    }
    Ok(())
}
