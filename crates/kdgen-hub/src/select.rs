//! Pure filename selection over a repository listing.

use std::collections::BTreeSet;

use crate::error::{HubError, HubResult};

/// Pick the GGUF file for `quant_tag` (case-insensitive substring match).
///
/// A single complete file is preferred over `-NNNNN-of-MMMMM` shards; a
/// quantization only available as shards is rejected. Without a tag the repo
/// must hold exactly one GGUF file. Errors list the available quantizations.
pub fn select_gguf(repo_id: &str, files: &[String], quant_tag: Option<&str>) -> HubResult<String> {
    let mut all: Vec<&String> = files.iter().filter(|f| f.ends_with(".gguf")).collect();
    all.sort();
    if all.is_empty() {
        return Err(HubError::NotFound { repo: repo_id.to_string(), what: "*.gguf".to_string() });
    }

    let candidates: Vec<&String> = match quant_tag {
        Some(tag) => {
            let tag = tag.to_lowercase();
            all.iter().copied().filter(|f| f.to_lowercase().contains(&tag)).collect()
        }
        None => all.clone(),
    };

    let singles: Vec<&String> = candidates.iter().copied().filter(|f| !is_shard(f)).collect();
    match (singles.as_slice(), quant_tag) {
        ([only], _) => Ok((*only).clone()),
        ([first, ..], Some(_)) => Ok((*first).clone()),
        _ => {
            let available = unique_quant_labels(&all);
            let what = match quant_tag {
                Some(tag) if !candidates.is_empty() => {
                    format!("a single-file '{tag}' GGUF (only shards exist)")
                }
                Some(tag) => format!("'{tag}'"),
                None => "a single GGUF file (specify a quantization)".to_string(),
            };
            Err(HubError::NotFound {
                repo: repo_id.to_string(),
                what: format!("{what}; available: {}", available.join(", ")),
            })
        }
    }
}

/// `true` for `name-00001-of-00003.gguf` style shard names.
pub fn is_shard(filename: &str) -> bool {
    let stem = filename.strip_suffix(".gguf").unwrap_or(filename);
    stem.contains("-of-")
        && stem
            .split('-')
            .any(|part| part.len() == 5 && part.chars().all(|c| c.is_ascii_digit()))
}

/// Quantization labels (`Q4_K_M`, `Q8_0`, ...) derived from GGUF filenames.
pub fn unique_quant_labels(filenames: &[&String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    for name in filenames {
        let name = name.rsplit('/').next().unwrap_or(name);
        let stem = name.strip_suffix(".gguf").unwrap_or(name);
        let label = match stem.find("-0000") {
            Some(idx) => &stem[..idx],
            None => stem,
        };
        let tag = label.rsplit('-').next().unwrap_or(label);
        seen.insert(tag.to_uppercase());
    }
    seen.into_iter().collect()
}

/// Parquet files for `split` in a dataset listing, sorted.
///
/// The native `data/{split}-00000-of-00001-*.parquet` layout wins; the
/// converted `{config}/{split}/0000.parquet` layout is used only when the
/// repo has no native files for the split. Both hold the same rows.
pub fn split_parquet_files(files: &[String], split: &str) -> Vec<String> {
    let prefix = format!("{split}-");
    let dir = format!("/{split}/");
    let parquet = || files.iter().filter(|f| f.ends_with(".parquet"));

    let mut out: Vec<String> = parquet()
        .filter(|f| f.rsplit('/').next().unwrap_or(f).starts_with(&prefix))
        .cloned()
        .collect();
    if out.is_empty() {
        out = parquet().filter(|f| f.contains(&dir)).cloned().collect();
    }
    out.sort();
    out
}

/// Whether `name` appears in a listing.
pub fn has_file(files: &[String], name: &str) -> bool {
    files.iter().any(|f| f == name)
}
