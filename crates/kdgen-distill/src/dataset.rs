//! Instruction dataset loading and seeded subsampling.
//!
//! Rows come either from a Hub dataset split (parquet) or from local
//! `*.jsonl` / `*.json` files with one object per line:
//!
//! ```json
//! {"instruction": "Give three tips for staying healthy.", "input": "", "output": "1. Eat ..."}
//! ```

use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use kdgen_hub::{HubClient, TOKEN_ENV};

pub const ALPACA_REPO: &str = "tatsu-lab/alpaca";

/// One source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub instruction: String,
    #[serde(default)]
    pub input: String,
    pub output: String,
}

/// Where rows are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    /// A split of a Hub dataset, downloaded as parquet.
    Hub { repo: String, split: String },
    /// A directory of JSON-lines files.
    Local(PathBuf),
}

impl Default for DatasetSource {
    fn default() -> Self {
        Self::Hub { repo: ALPACA_REPO.to_string(), split: "train".to_string() }
    }
}

/// Load every row of `source`, then keep a seeded subsample of
/// `sample_size` rows (see [`subsample`]).
///
/// Hub access sends `HF_TOKEN` when it is set; public datasets work without it.
pub async fn load_dataset(
    source: &DatasetSource,
    cache_dir: Option<&Path>,
    sample_size: usize,
    seed: u64,
) -> Result<Vec<Sample>> {
    let rows = match source {
        DatasetSource::Hub { repo, split } => {
            let token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty());
            let hub = HubClient::new(token, cache_dir, true)?;
            let files = hub
                .fetch_dataset_split(repo, split)
                .await
                .with_context(|| format!("Failed to download dataset '{repo}' split '{split}'"))?;
            let mut rows = Vec::new();
            for path in &files {
                rows.extend(read_parquet(path)?);
            }
            rows
        }
        DatasetSource::Local(dir) => read_jsonl_dir(dir)?,
    };
    anyhow::ensure!(!rows.is_empty(), "Dataset {source:?} contains no rows");
    info!(total = rows.len(), "Dataset loaded");

    let rows = subsample(rows, sample_size, seed);
    info!(selected = rows.len(), seed, "Dataset subsampled");
    Ok(rows)
}

/// Deterministic subsample: shuffle with `StdRng::seed_from_u64(seed)` and
/// keep the first `sample_size` rows. A request for at least as many rows as
/// exist returns `rows` unchanged.
pub fn subsample(mut rows: Vec<Sample>, sample_size: usize, seed: u64) -> Vec<Sample> {
    if sample_size >= rows.len() {
        warn!(
            requested = sample_size,
            available = rows.len(),
            "Sample size covers the whole dataset, using every row"
        );
        return rows;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    rows.shuffle(&mut rng);
    rows.truncate(sample_size);
    rows
}

/// Read `instruction` / `input` / `output` string columns from a parquet file.
pub fn read_parquet(path: &Path) -> Result<Vec<Sample>> {
    let file = fs::File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let reader = SerializedFileReader::new(file)
        .with_context(|| format!("Not a parquet file: {}", path.display()))?;

    let mut rows = Vec::new();
    for (row_no, row) in reader.get_row_iter(None)?.enumerate() {
        let row = row.with_context(|| format!("Bad row {row_no} in {}", path.display()))?;
        let (mut instruction, mut input, mut output) = (None, String::new(), None);
        for (name, field) in row.get_column_iter() {
            let value = match field {
                Field::Str(s) => s.clone(),
                Field::Null => String::new(),
                _ => continue,
            };
            match name.as_str() {
                "instruction" => instruction = Some(value),
                "input" => input = value,
                "output" => output = Some(value),
                _ => {}
            }
        }
        let (Some(instruction), Some(output)) = (instruction, output) else {
            anyhow::bail!(
                "Row {row_no} in {} lacks an instruction or output column",
                path.display()
            );
        };
        rows.push(Sample { instruction, input, output });
    }
    info!(path = %path.display(), count = rows.len(), "Read parquet file");
    Ok(rows)
}

/// Concatenate every `*.jsonl` / `*.json` file in `dir`, alphabetically.
pub fn read_jsonl_dir(dir: &Path) -> Result<Vec<Sample>> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Cannot read dataset directory: {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("jsonl" | "json")))
        .collect();
    entries.sort();

    anyhow::ensure!(!entries.is_empty(), "No .jsonl or .json files found in {}", dir.display());

    let mut rows = Vec::new();
    for path in &entries {
        rows.extend(read_jsonl_file(path)?);
    }
    Ok(rows)
}

/// Rows of one JSON-lines file; blank lines are skipped.
pub fn read_jsonl_file(path: &Path) -> Result<Vec<Sample>> {
    let file = fs::File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut rows = Vec::new();
    for (line_no, line) in io::BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("IO error reading {}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let sample: Sample = serde_json::from_str(trimmed).with_context(|| {
            format!(
                "JSON parse error at {}:{}, expected {{\"instruction\":…,\"output\":…}}",
                path.display(),
                line_no + 1
            )
        })?;
        rows.push(sample);
    }
    info!(path = %path.display(), count = rows.len(), "Loaded dataset file");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    use parquet::data_type::{ByteArray, ByteArrayType};
    use parquet::file::properties::WriterProperties;
    use parquet::file::writer::SerializedFileWriter;
    use parquet::schema::parser::parse_message_type;
    use tempfile::TempDir;

    fn rows(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample {
                instruction: format!("instruction {i}"),
                input: String::new(),
                output: format!("output {i}"),
            })
            .collect()
    }

    fn make_jsonl(lines: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        let mut f = fs::File::create(dir.path().join("data.jsonl")).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        dir
    }

    #[test]
    fn same_seed_same_subsample() {
        let a = subsample(rows(100), 10, 42);
        let b = subsample(rows(100), 10, 42);
        assert_eq!(a.len(), 10);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seed_different_subsample() {
        let a = subsample(rows(100), 10, 42);
        let b = subsample(rows(100), 10, 7);
        assert_ne!(a, b);
    }

    #[test]
    fn subsample_has_no_duplicates() {
        let mut picked: Vec<String> = subsample(rows(50), 20, 1).into_iter().map(|s| s.instruction).collect();
        picked.sort();
        picked.dedup();
        assert_eq!(picked.len(), 20);
    }

    #[test]
    fn oversized_request_returns_everything_in_order() {
        assert_eq!(subsample(rows(5), 8000, 42), rows(5));
        assert_eq!(subsample(rows(5), 5, 42), rows(5));
    }

    #[test]
    fn loads_jsonl_with_optional_input() {
        let dir = make_jsonl(&[
            r#"{"instruction":"Say hi","output":"Hi"}"#,
            "",
            r#"{"instruction":"Translate","input":"Olá","output":"Hello"}"#,
        ]);
        let rows = read_jsonl_dir(dir.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].input, "");
        assert_eq!(rows[1].input, "Olá");
    }

    #[test]
    fn jsonl_files_read_alphabetically() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.jsonl"), r#"{"instruction":"second","output":"2"}"#).unwrap();
        fs::write(dir.path().join("a.jsonl"), r#"{"instruction":"first","output":"1"}"#).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let rows = read_jsonl_dir(dir.path()).unwrap();
        assert_eq!(rows[0].instruction, "first");
        assert_eq!(rows[1].instruction, "second");
    }

    #[test]
    fn per_file_rows_are_counted_separately() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a.jsonl"),
            "{\"instruction\":\"a1\",\"output\":\"1\"}\n{\"instruction\":\"a2\",\"output\":\"2\"}\n",
        )
        .unwrap();
        fs::write(dir.path().join("b.jsonl"), "{\"instruction\":\"b1\",\"output\":\"3\"}\n").unwrap();

        let second = read_jsonl_file(&dir.path().join("b.jsonl")).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].instruction, "b1");
        assert_eq!(read_jsonl_dir(dir.path()).unwrap().len(), 3);
    }

    #[test]
    fn empty_dir_and_malformed_rows_error() {
        let dir = TempDir::new().unwrap();
        assert!(read_jsonl_dir(dir.path()).is_err());
        let dir = make_jsonl(&[r#"{"instruction":"no output"}"#]);
        assert!(read_jsonl_dir(dir.path()).is_err());
    }

    fn write_parquet(path: &Path, data: &[[&str; 3]]) {
        let schema = Arc::new(
            parse_message_type(
                "message alpaca {
                    REQUIRED BINARY instruction (UTF8);
                    REQUIRED BINARY input (UTF8);
                    REQUIRED BINARY output (UTF8);
                }",
            )
            .unwrap(),
        );
        let props = Arc::new(WriterProperties::builder().build());
        let file = fs::File::create(path).unwrap();
        let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();
        let mut row_group = writer.next_row_group().unwrap();
        let mut column = 0;
        while let Some(mut col) = row_group.next_column().unwrap() {
            let values: Vec<ByteArray> = data.iter().map(|row| ByteArray::from(row[column])).collect();
            col.typed::<ByteArrayType>().write_batch(&values, None, None).unwrap();
            col.close().unwrap();
            column += 1;
        }
        row_group.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn reads_alpaca_parquet_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("train-00000-of-00001.parquet");
        write_parquet(
            &path,
            &[
                ["Give three tips for staying healthy.", "", "1. Eat well."],
                ["Translate to English", "Bonjour", "Hello"],
            ],
        );
        let rows = read_parquet(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].instruction, "Give three tips for staying healthy.");
        assert_eq!(rows[0].input, "");
        assert_eq!(rows[1].input, "Bonjour");
        assert_eq!(rows[1].output, "Hello");
    }

    #[test]
    fn non_parquet_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.parquet");
        fs::write(&path, b"not parquet").unwrap();
        assert!(read_parquet(&path).is_err());
    }

    #[tokio::test]
    async fn local_source_loads_and_subsamples() {
        let dir = make_jsonl(&[
            r#"{"instruction":"a","output":"1"}"#,
            r#"{"instruction":"b","output":"2"}"#,
            r#"{"instruction":"c","output":"3"}"#,
        ]);
        let source = DatasetSource::Local(dir.path().to_path_buf());
        let rows = load_dataset(&source, None, 2, 42).await.unwrap();
        assert_eq!(rows.len(), 2);
        let again = load_dataset(&source, None, 2, 42).await.unwrap();
        assert_eq!(rows, again);
    }

    #[test]
    fn default_source_is_alpaca_train() {
        assert_eq!(
            DatasetSource::default(),
            DatasetSource::Hub { repo: "tatsu-lab/alpaca".to_string(), split: "train".to_string() }
        );
    }
}
