//! Word count.
//!
//! Map emits `<word> 1` for every word, routed to the partition of the
//! word; reduce sums the counts of its sorted input.

use std::io::{BufRead, BufReader, Read, Write};

use anyhow::Result;

use common::{partition, Emitter, Params};

use crate::{partitions, sum_sorted};

pub fn map(input: &mut dyn Read, emit: &mut Emitter, params: &Params) -> Result<()> {
    let n = partitions(params)?;

    for line in BufReader::new(input).lines() {
        let line = line?;
        let words = line
            .split(|c: char| !c.is_alphabetic())
            .filter(|s| !s.is_empty())
            .map(|word| word.to_lowercase());

        for word in words {
            let label = partition(word.as_bytes(), n);
            emit.emit(format!("{word} 1"), label)?;
        }
    }
    Ok(())
}

pub fn reduce(input: &mut dyn Read, output: &mut dyn Write, _params: &Params) -> Result<()> {
    sum_sorted(input, output, |word, count| format!("{word} {count}\n"))
}

#[cfg(test)]
mod tests {
    use common::MapOut;
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn counts_sorted_words() {
        let mut input = "be 1\nbe 1\nnot 1\nor 1\nto 1\nto 1\n".as_bytes();
        let mut out = Vec::new();
        reduce(&mut input, &mut out, &Params::new()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "be 2\nnot 1\nor 1\nto 2\n");
    }

    #[test]
    fn emits_lowercased_words() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut emitter = Emitter::new(tx);
        let mut input = "To be, or NOT".as_bytes();
        map(&mut input, &mut emitter, &Params::new()).unwrap();
        drop(emitter);

        let mut seen = Vec::new();
        while let Some(MapOut { value, label }) = rx.blocking_recv() {
            assert_eq!(label, partition(&value[..value.len() - 2], 2));
            seen.push(String::from_utf8(value.to_vec()).unwrap());
        }
        assert_eq!(seen, vec!["to 1", "be 1", "or 1", "not 1"]);
    }
}
