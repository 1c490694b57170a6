use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};

/// Read every all-digit cell of a delimited file, first-seen order, duplicates dropped.
pub fn read_project_ids(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(file);

    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to parse row {} of {}", index + 1, path.display()))?;
        for cell in record.iter() {
            let token = cell.trim();
            if is_numeric(token) && seen.insert(token.to_string()) {
                ids.push(token.to_string());
            }
        }
    }

    Ok(ids)
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

/// Write one value per row, truncating any existing file.
pub fn write_column<I, S>(path: &Path, values: I) -> Result<usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut count = 0;
    for value in values {
        writer.write_record([value.as_ref()])?;
        count += 1;
    }
    writer.flush()?;

    Ok(count)
}
