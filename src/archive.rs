//! ZIP archives of report bundles.
//!
//! `hub process --archive reports.zip` unpacks into a scratch directory and
//! then runs the ordinary directory discovery on it. Entry names are
//! resolved with `enclosed_name`, so `../` and absolute paths are rejected,
//! and every entry is read through a size bound.
//!
//! Discovered bundles are then copied into the configured bundles directory
//! with [`keep_bundles`]; documents record that copy, so reprocessing works
//! after the scratch directory is gone.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

/// Maximum decompressed bytes for one entry.
const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;
/// Maximum decompressed bytes for the whole archive.
const MAX_TOTAL_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Unpacks `archive` into `dest` and returns the directory that holds the
/// bundle folders. An archive with a single top-level folder that itself
/// contains folders is unwrapped one level.
pub fn unpack(archive: &Path, dest: &Path) -> Result<PathBuf> {
    unpack_bounded(archive, dest, MAX_ENTRY_BYTES, MAX_TOTAL_BYTES)
}

fn unpack_bounded(archive: &Path, dest: &Path, max_entry: u64, max_total: u64) -> Result<PathBuf> {
    let file = std::fs::File::open(archive)
        .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("Not a ZIP archive: {}", archive.display()))?;

    let mut total: u64 = 0;
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        let Some(rel) = entry.enclosed_name() else {
            bail!("Archive entry escapes the target directory: {}", entry.name());
        };
        let out = dest.join(rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let name = entry.name().to_string();
        let mut buf = Vec::new();
        entry.take(max_entry + 1).read_to_end(&mut buf)?;
        if buf.len() as u64 > max_entry {
            bail!("Archive entry {} exceeds size limit ({} bytes)", name, max_entry);
        }
        total += buf.len() as u64;
        if total > max_total {
            bail!("Archive exceeds total size limit ({} bytes)", max_total);
        }
        std::fs::write(&out, &buf)
            .with_context(|| format!("Failed to write {}", out.display()))?;
    }

    Ok(bundle_root(dest))
}

fn bundle_root(dest: &Path) -> PathBuf {
    let dirs: Vec<PathBuf> = match std::fs::read_dir(dest) {
        Ok(rd) => rd
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() && !is_hidden(p))
            .collect(),
        Err(_) => return dest.to_path_buf(),
    };
    let has_files = std::fs::read_dir(dest)
        .map(|rd| rd.filter_map(|e| e.ok()).any(|e| e.path().is_file()))
        .unwrap_or(false);

    if let [only] = dirs.as_slice() {
        let entries: Vec<PathBuf> = std::fs::read_dir(only)
            .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default();
        // A folder with its own markdown is a bundle, not a wrapper.
        let is_bundle = entries
            .iter()
            .any(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"));
        let nested = entries.iter().any(|p| p.is_dir());
        if nested && !is_bundle && !has_files {
            return only.clone();
        }
    }
    dest.to_path_buf()
}

/// Copies each bundle directory into `dest`, replacing an earlier copy of
/// the same name, and returns the new paths in the same order.
pub fn keep_bundles(bundles: &[PathBuf], dest: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create bundles directory: {}", dest.display()))?;

    let mut kept = Vec::with_capacity(bundles.len());
    for src in bundles {
        let Some(name) = src.file_name() else {
            bail!("Bundle path has no directory name: {}", src.display());
        };
        let target = dest.join(name);
        if target.exists() {
            std::fs::remove_dir_all(&target)
                .with_context(|| format!("Failed to replace {}", target.display()))?;
        }

        for entry in WalkDir::new(src) {
            let entry = entry?;
            let rel = entry.path().strip_prefix(src)?;
            let out = target.join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&out)?;
            } else {
                std::fs::copy(entry.path(), &out)
                    .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
            }
        }
        kept.push(target);
    }
    Ok(kept)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') || n == "__MACOSX")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn unwraps_single_top_level_folder() {
        let tmp = tempfile::TempDir::new().unwrap();
        let archive = tmp.path().join("reports.zip");
        write_zip(
            &archive,
            &[
                ("reports/bcg_ai_2024/bcg_ai_2024.md", "# BCG AI"),
                ("reports/oecd_policy/oecd_policy.md", "# OECD"),
            ],
        );
        let dest = tmp.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();

        let root = unpack(&archive, &dest).unwrap();
        assert_eq!(root, dest.join("reports"));
        assert!(root.join("bcg_ai_2024/bcg_ai_2024.md").is_file());
    }

    #[test]
    fn keeps_root_when_bundles_are_top_level() {
        let tmp = tempfile::TempDir::new().unwrap();
        let archive = tmp.path().join("reports.zip");
        write_zip(&archive, &[("one/one.md", "# One"), ("two/two.md", "# Two")]);
        let dest = tmp.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();

        assert_eq!(unpack(&archive, &dest).unwrap(), dest);
    }

    #[test]
    fn rejects_path_traversal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let archive = tmp.path().join("evil.zip");
        write_zip(&archive, &[("../escape.md", "# nope")]);
        let dest = tmp.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();

        let err = unpack(&archive, &dest).unwrap_err();
        assert!(err.to_string().contains("escapes"));
        assert!(!tmp.path().join("escape.md").exists());
    }

    #[test]
    fn single_bundle_with_subfolders_is_not_unwrapped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let archive = tmp.path().join("one.zip");
        write_zip(
            &archive,
            &[
                ("gulf_outlook/gulf_outlook.md", "# Gulf Outlook"),
                ("gulf_outlook/images/fig1.png", "png"),
            ],
        );
        let dest = tmp.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();

        let root = unpack(&archive, &dest).unwrap();
        assert_eq!(root, dest);
        assert!(root.join("gulf_outlook/gulf_outlook.md").is_file());
    }

    #[test]
    fn entry_at_the_size_limit_is_accepted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let archive = tmp.path().join("sized.zip");
        write_zip(&archive, &[("r/r.md", "12345678")]);
        let dest = tmp.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();

        unpack_bounded(&archive, &dest, 8, 1024).unwrap();
        assert_eq!(std::fs::read_to_string(dest.join("r/r.md")).unwrap(), "12345678");

        let err = unpack_bounded(&archive, &dest, 7, 1024).unwrap_err();
        assert!(err.to_string().contains("exceeds size limit"));
    }

    #[test]
    fn kept_bundles_outlive_the_scratch_dir() {
        let scratch = tempfile::TempDir::new().unwrap();
        let bundle = scratch.path().join("oecd_policy");
        std::fs::create_dir_all(bundle.join("vlm")).unwrap();
        std::fs::write(bundle.join("oecd_policy.md"), "# OECD").unwrap();
        std::fs::write(bundle.join("vlm/oecd_policy.md"), "# OECD (vlm)").unwrap();

        let home = tempfile::TempDir::new().unwrap();
        let dest = home.path().join("bundles");
        std::fs::create_dir_all(dest.join("oecd_policy")).unwrap();
        std::fs::write(dest.join("oecd_policy/stale.md"), "old").unwrap();

        let kept = keep_bundles(&[bundle], &dest).unwrap();
        drop(scratch);

        assert_eq!(kept, vec![dest.join("oecd_policy")]);
        assert!(kept[0].join("oecd_policy.md").is_file());
        assert!(kept[0].join("vlm/oecd_policy.md").is_file());
        assert!(!kept[0].join("stale.md").exists());
    }
}
