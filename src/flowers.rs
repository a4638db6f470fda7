use crate::types::FlowerRecord;
use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct FlowerTable {
    pub headers: Vec<String>,
    pub records: Vec<FlowerRecord>,
}

impl FlowerTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn by_state(&self, state: &str) -> Vec<&FlowerRecord> {
        self.records.iter().filter(|r| r.state == state).collect()
    }

    pub fn by_common_name(&self, common_name: &str) -> Vec<&FlowerRecord> {
        self.records
            .iter()
            .filter(|r| r.common_name == common_name)
            .collect()
    }
}

pub fn load_flowers(
    path: &Path,
    delimiter: char,
    join_column: &str,
    common_name_column: &str,
) -> Result<FlowerTable> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open flower table: {:?}", path))?;
    let table = read_flowers(file, delimiter, join_column, common_name_column)
        .with_context(|| format!("Failed to read flower table: {:?}", path))?;
    info!("Loaded {} flower rows from {:?}", table.len(), path);
    Ok(table)
}

pub fn read_flowers<R: Read>(
    reader: R,
    delimiter: char,
    join_column: &str,
    common_name_column: &str,
) -> Result<FlowerTable> {
    if !delimiter.is_ascii() {
        return Err(anyhow!("Delimiter must be a single ASCII character, got {:?}", delimiter));
    }

    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .trim(Trim::All)
        .from_reader(reader);
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();

    let join_idx = headers.iter().position(|h| h == join_column)
        .ok_or_else(|| anyhow!("Join column '{}' not found in flower table", join_column))?;
    let name_idx = headers.iter().position(|h| h == common_name_column)
        .ok_or_else(|| anyhow!("Column '{}' not found in flower table", common_name_column))?;

    let mut records = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let state = record.get(join_idx).unwrap_or("");
        if state.is_empty() {
            debug!("Skipping flower row without a state: {:?}", record);
            continue;
        }

        records.push(FlowerRecord {
            state: state.to_string(),
            common_name: record.get(name_idx).unwrap_or("").to_string(),
            columns: headers
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect(),
        });
    }

    Ok(FlowerTable { headers, records })
}
