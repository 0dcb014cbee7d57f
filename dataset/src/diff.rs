use crate::error::DatasetError;
use std::path::PathBuf;

/// One line of `zfs diff -H` between a snapshot and the live dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffEntry {
    Added(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

/// Parses a tab-separated `zfs diff -H` line: a change marker (`+`, `M`,
/// `-`, `R`) followed by one path, or two for renames.
pub(crate) fn parse_diff_line(line: &str) -> Result<DiffEntry, DatasetError> {
    let mut fields = line.split('\t');
    let kind = fields.next().unwrap_or("");
    let path = fields
        .next()
        .ok_or_else(|| DatasetError::Parse(line.to_string()))?;

    match kind {
        "+" => Ok(DiffEntry::Added(PathBuf::from(path))),
        "M" => Ok(DiffEntry::Modified(PathBuf::from(path))),
        "-" => Ok(DiffEntry::Removed(PathBuf::from(path))),
        "R" => {
            let to = fields
                .next()
                .ok_or_else(|| DatasetError::Parse(line.to_string()))?;
            Ok(DiffEntry::Renamed {
                from: PathBuf::from(path),
                to: PathBuf::from(to),
            })
        }
        _ => Err(DatasetError::Parse(line.to_string())),
    }
}
