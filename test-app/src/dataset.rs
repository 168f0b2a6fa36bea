// Sample datasets: one sample per line, comma-delimited, no header.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;

use ekglink::{Sample, read_rows};

/// Every row of a dataset, parsed in full.
pub struct Dataset {
    pub label: String,
    pub samples: Vec<Vec<f32>>,
}

impl Dataset {
    pub fn load(path: &Path, label: &str) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        Self::from_reader(BufReader::new(file), label)
            .with_context(|| format!("cannot load {}", path.display()))
    }

    pub fn from_reader<R: BufRead>(reader: R, label: &str) -> Result<Self> {
        let mut samples = Vec::new();
        for record in read_rows(reader) {
            let record = record?;
            let values = record
                .tokens
                .iter()
                .enumerate()
                .map(|(i, token)| {
                    token.parse::<f32>().with_context(|| {
                        format!("row {} column {}: {:?} is not a number", record.row, i + 1, token)
                    })
                })
                .collect::<Result<Vec<f32>>>()?;
            samples.push(values);
        }
        Ok(Self {
            label: label.to_string(),
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// A uniformly random sample, or `None` for an empty dataset.
    pub fn pick(&self) -> Option<Result<Sample>> {
        self.samples
            .choose(&mut rand::thread_rng())
            .map(|values| Sample::new(values.clone()).map_err(Into::into))
    }
}
