//! File registration, listing, and administrative reset.
//!
//! `ingest files add` stands in for an upload handler: it copies files into
//! the object store and registers them as `pending`. [`register_file`] is
//! the same step for programmatic callers.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;
use crate::extract::DocumentFormat;
use crate::models::FileRecord;
use crate::object_store::{FsObjectStore, ObjectStore};
use crate::store::{FileStore, SqliteStore};

/// Extensions picked up when no `--include` globs are given.
pub const DEFAULT_INCLUDES: &[&str] = &[
    "**/*.txt",
    "**/*.md",
    "**/*.markdown",
    "**/*.pdf",
    "**/*.xml",
];

/// Store `bytes` and register a `pending` file record.
///
/// The object key is `<project>/<file id>/<filename>`. `mime_type` falls
/// back to a guess from the filename.
pub async fn register_file(
    files: &dyn FileStore,
    objects: &dyn ObjectStore,
    project_id: &str,
    filename: &str,
    bytes: &[u8],
    mime_type: Option<&str>,
) -> Result<FileRecord> {
    let id = uuid::Uuid::new_v4().to_string();
    let key = format!("{}/{}/{}", project_id, id, filename);
    let mime = mime_type
        .map(str::to_string)
        .unwrap_or_else(|| DocumentFormat::mime_for_filename(filename).to_string());

    objects.put_bytes(&key, bytes).await?;
    let record = FileRecord::new_pending(id, project_id, key, filename, mime);
    files.register(&record).await?;
    Ok(record)
}

/// Files under `path` matching `include` (relative to `path`). A plain
/// file path is returned as-is.
pub fn scan_paths(path: &Path, include: &[String]) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        bail!("path does not exist: {}", path.display());
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let patterns: Vec<String> = if include.is_empty() {
        DEFAULT_INCLUDES.iter().map(|s| s.to_string()).collect()
    } else {
        include.to_vec()
    };
    let include_set = build_globset(&patterns)?;
    let exclude_set = build_globset(&["**/.git/**".to_string(), "**/node_modules/**".to_string()])?;

    let mut found = Vec::new();
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        found.push(entry.path().to_path_buf());
    }

    // Sort for deterministic ordering
    found.sort();
    Ok(found)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// `ingest files add`
pub async fn run_add(
    config: &Config,
    path: &Path,
    project_id: &str,
    include: &[String],
) -> Result<()> {
    let paths = scan_paths(path, include)?;
    if paths.is_empty() {
        println!("No matching files under {}", path.display());
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let objects = FsObjectStore::new(&config.storage.root);

    for p in &paths {
        let bytes = tokio::fs::read(p).await?;
        let filename = p
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| p.display().to_string());
        let record = register_file(&store, &objects, project_id, &filename, &bytes, None).await?;
        println!("{}  {}  ({})", record.id, record.filename, record.mime_type);
    }
    println!("Registered {} file(s) in project {}", paths.len(), project_id);

    pool.close().await;
    Ok(())
}

/// `ingest files list`
pub async fn run_list(config: &Config, project_id: &str, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let files = store.list_by_project(project_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
    } else if files.is_empty() {
        println!("No files in project {}", project_id);
    } else {
        println!(
            "{:<36}  {:<28} {:<10} {:>6}  {}",
            "ID", "FILENAME", "STATUS", "CHUNKS", "ERROR"
        );
        for f in &files {
            println!(
                "{:<36}  {:<28} {:<10} {:>6}  {}",
                f.id,
                truncate(&f.filename, 28),
                f.embedding_status.as_str(),
                f.chunk_count,
                f.last_error.as_deref().unwrap_or("")
            );
        }
    }

    pool.close().await;
    Ok(())
}

/// `ingest files reset`
pub async fn run_reset(config: &Config, file_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    if store.reset_to_pending(file_id).await? {
        println!("Reset {} to pending", file_id);
    } else {
        println!("File {} is not processing; nothing to reset", file_id);
    }

    pool.close().await;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmbeddingStatus;
    use crate::object_store::MemoryObjectStore;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    #[test]
    fn scan_uses_default_includes() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.md"), "# a").unwrap();
        std::fs::write(tmp.path().join("b.bin"), [0u8, 1]).unwrap();
        std::fs::create_dir_all(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/c.txt"), "c").unwrap();

        let found = scan_paths(tmp.path(), &[]).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.md", "c.txt"]);
    }

    #[test]
    fn scan_honors_custom_globs() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.md"), "# a").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "b").unwrap();
        let found = scan_paths(tmp.path(), &["*.txt".to_string()]).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("b.txt"));
    }

    #[tokio::test]
    async fn register_stores_bytes_and_pending_record() {
        let files = MemoryStore::new();
        let objects = MemoryObjectStore::new();
        let record = register_file(&files, &objects, "p1", "notes.md", b"# hi", None)
            .await
            .unwrap();

        assert_eq!(record.mime_type, "text/markdown");
        assert_eq!(record.embedding_status, EmbeddingStatus::Pending);
        assert!(record.storage_path.starts_with("p1/"));
        assert_eq!(objects.get_bytes(&record.storage_path).await.unwrap(), b"# hi");
        assert!(files.get(&record.id).await.unwrap().is_some());
    }

    #[test]
    fn truncate_long_names() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
