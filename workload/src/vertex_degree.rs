//! Computes the degree of each vertex in a graph, given a list of edges.
//!

use std::io::{BufRead, BufReader, Read, Write};

use anyhow::{anyhow, Result};

use common::{partition, Emitter, Params};

use crate::{partitions, sum_sorted};

fn parse_line(line: &str) -> Result<(u64, u64)> {
    let mut iter = line.split_whitespace().take(2);
    let a = iter
        .next()
        .ok_or_else(|| anyhow!("Invalid input file format"))?
        .parse()?;
    let b = iter
        .next()
        .ok_or_else(|| anyhow!("Invalid input file format"))?
        .parse()?;
    Ok((a, b))
}

pub fn map(input: &mut dyn Read, emit: &mut Emitter, params: &Params) -> Result<()> {
    let n = partitions(params)?;

    for line in BufReader::new(input).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let (a, b) = parse_line(&line)?;
        for vertex in [a, b] {
            let key = vertex.to_string();
            let label = partition(key.as_bytes(), n);
            emit.emit(format!("{key} 1"), label)?;
        }
    }
    Ok(())
}

pub fn reduce(input: &mut dyn Read, output: &mut dyn Write, _params: &Params) -> Result<()> {
    sum_sorted(input, output, |vertex, degree| format!("{vertex}, deg={degree}\n"))
}
