//! Line-delimited JSON persistence for record collections, plus the two
//! whole-file formats (pretty JSON array, plain text).

use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub(crate) enum StoreError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record at {}:{line}: {source}", path.display())]
    Decode {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode record for {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn create(path: &Path) -> Result<BufWriter<fs::File>, StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(path))?;
    }
    Ok(BufWriter::new(fs::File::create(path).map_err(io_err(path))?))
}

/// Overwrites `path` with one JSON object per line.
pub(crate) fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<(), StoreError> {
    let mut out = create(path)?;
    for record in records {
        serde_json::to_writer(&mut out, record).map_err(|source| StoreError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        out.write_all(b"\n").map_err(io_err(path))?;
    }
    out.flush().map_err(io_err(path))
}

/// Reads every record in `path`. A missing file is an empty collection and
/// blank lines are skipped.
pub(crate) fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(path)(e)),
    };

    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_err(path))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Overwrites `path` with `value` as 2-space indented JSON. Non-ASCII text is
/// written as is.
pub(crate) fn write_json_pretty<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let mut out = create(path)?;
    serde_json::to_writer_pretty(&mut out, value).map_err(|source| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    out.flush().map_err(io_err(path))
}

pub(crate) fn write_text(path: &Path, text: &str) -> Result<(), StoreError> {
    let mut out = create(path)?;
    out.write_all(text.as_bytes()).map_err(io_err(path))?;
    out.flush().map_err(io_err(path))
}
