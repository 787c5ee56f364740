//! Output files and export history on disk.

use crate::model::{ExportFile, ExportRecord};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

const FALLBACK_FILENAME: &str = "export.xlsx";

/// Reduce a server-supplied name to a bare file name safe to join onto a directory.
pub fn sanitize_filename(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let trimmed = last.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Candidate paths for `name` in `dir`: `name`, `name (1)`, `name (2)`, ...
fn candidate_paths<'a>(dir: &'a Path, name: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    std::iter::once(dir.join(name)).chain((1u32..).map(move |n| match ext {
        Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
        None => dir.join(format!("{stem} ({n})")),
    }))
}

/// Write a downloaded export into `dir` without overwriting existing files.
/// Each candidate is created with `create_new`, so a file that appears
/// concurrently is skipped rather than replaced.
pub fn save_export_file(dir: &Path, file: &ExportFile) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let name = sanitize_filename(&file.filename);
    for path in candidate_paths(dir, &name) {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut out) => {
                out.write_all(&file.bytes)?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free file name for {name}"),
    ))
}

fn base_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .context("cannot determine a data directory")?;
    Ok(base.join("bulk-export"))
}

pub fn history_dir() -> Result<PathBuf> {
    Ok(base_dir()?.join("history"))
}

fn record_filename(record: &ExportRecord) -> String {
    format!(
        "export-{}-{}.json",
        record.timestamp_utc.replace(':', "-"),
        record.request_id
    )
}

pub fn save_record(record: &ExportRecord) -> Result<PathBuf> {
    save_record_in(&history_dir()?, record)
}

pub fn save_record_in(dir: &Path, record: &ExportRecord) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).context("create history dir")?;
    let path = dir.join(record_filename(record));
    let data = serde_json::to_vec_pretty(record)?;
    std::fs::write(&path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

pub fn load_recent(limit: usize) -> Result<Vec<ExportRecord>> {
    load_recent_in(&history_dir()?, limit)
}

/// Most recent records first. Unreadable files are skipped.
pub fn load_recent_in(dir: &Path, limit: usize) -> Result<Vec<ExportRecord>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).context("read history dir")? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(data) = std::fs::read(&path) else { continue };
        if let Ok(record) = serde_json::from_slice::<ExportRecord>(&data) {
            out.push(record);
        }
    }
    out.sort_by(|a, b| b.timestamp_utc.cmp(&a.timestamp_utc));
    out.truncate(limit);
    Ok(out)
}

pub fn delete_record(record: &ExportRecord) -> Result<()> {
    delete_record_in(&history_dir()?, record)
}

pub fn delete_record_in(dir: &Path, record: &ExportRecord) -> Result<()> {
    let path = dir.join(record_filename(record));
    std::fs::remove_file(&path).with_context(|| format!("delete {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExportFilters, ExportOutcome, ExportStrategy};

    fn record(ts: &str, id: &str) -> ExportRecord {
        ExportRecord {
            timestamp_utc: ts.into(),
            request_id: id.into(),
            base_url: "http://svc".into(),
            filters: ExportFilters::default(),
            total_records: 10,
            strategy: ExportStrategy::Direct,
            job_id: None,
            outcome: ExportOutcome::Cancelled,
            poll: None,
            duration_ms: 5,
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.xlsx"), "report.xlsx");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\tmp\\a.xlsx"), "a.xlsx");
        assert_eq!(sanitize_filename(".."), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("  "), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("a\nb.xlsx"), "ab.xlsx");
    }

    #[test]
    fn test_save_export_file_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let file = ExportFile {
            filename: "f.xlsx".into(),
            bytes: bytes::Bytes::from_static(b"one"),
        };
        let first = save_export_file(dir.path(), &file).unwrap();
        let second = save_export_file(dir.path(), &file).unwrap();
        assert_eq!(first, dir.path().join("f.xlsx"));
        assert_eq!(second, dir.path().join("f (1).xlsx"));
        assert_eq!(std::fs::read(&second).unwrap(), b"one");
    }

    #[test]
    fn test_save_export_file_skips_taken_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.xlsx"), b"mine").unwrap();
        std::fs::write(dir.path().join("f (1).xlsx"), b"also mine").unwrap();
        std::fs::write(dir.path().join("notes"), b"keep").unwrap();
        let file = ExportFile {
            filename: "f.xlsx".into(),
            bytes: bytes::Bytes::from_static(b"new"),
        };

        let saved = save_export_file(dir.path(), &file).unwrap();
        assert_eq!(saved, dir.path().join("f (2).xlsx"));
        assert_eq!(std::fs::read(&saved).unwrap(), b"new");
        assert_eq!(std::fs::read(dir.path().join("f.xlsx")).unwrap(), b"mine");
        assert_eq!(
            std::fs::read(dir.path().join("f (1).xlsx")).unwrap(),
            b"also mine"
        );

        let bare = ExportFile {
            filename: "notes".into(),
            bytes: bytes::Bytes::from_static(b"new"),
        };
        let saved = save_export_file(dir.path(), &bare).unwrap();
        assert_eq!(saved, dir.path().join("notes (1)"));
        assert_eq!(std::fs::read(dir.path().join("notes")).unwrap(), b"keep");
    }

    #[test]
    fn test_history_round_trip_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let older = record("2026-01-01T10:00:00Z", "aaa");
        let newer = record("2026-01-02T10:00:00Z", "bbb");
        save_record_in(dir.path(), &older).unwrap();
        save_record_in(dir.path(), &newer).unwrap();
        std::fs::write(dir.path().join("junk.json"), b"not json").unwrap();

        let loaded = load_recent_in(dir.path(), 10).unwrap();
        let ids: Vec<_> = loaded.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["bbb", "aaa"]);

        let limited = load_recent_in(dir.path(), 1).unwrap();
        assert_eq!(limited.len(), 1);

        delete_record_in(dir.path(), &newer).unwrap();
        let loaded = load_recent_in(dir.path(), 10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].request_id, "aaa");
    }

    #[test]
    fn test_missing_history_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_recent_in(&dir.path().join("nope"), 5).unwrap();
        assert!(loaded.is_empty());
    }
}
