use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Regular files under `dir`, sorted. Symlinks are not followed or archived.
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {:?}", dir))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        } else if entry.path_is_symlink() {
            debug!("Not archiving symlink {}", entry.path().display());
        }
    }
    Ok(files)
}

fn entry_name(root: &Path, file: &Path) -> Result<String> {
    let relative = file
        .strip_prefix(root)
        .with_context(|| format!("{:?} is outside {:?}", file, root))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Zips every file under `dir` into `zip_path`, storing paths relative to
/// `dir`. Returns the number of entries written.
pub fn compress_dir(dir: &Path, zip_path: &Path) -> Result<usize> {
    let files = collect_files(dir)?;

    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let out = File::create(zip_path).with_context(|| format!("Failed to create {:?}", zip_path))?;
    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut written = 0;
    for file in &files {
        if file == zip_path {
            continue;
        }
        let name = entry_name(dir, file)?;
        zip.start_file(name, options)?;
        let mut input = File::open(file).with_context(|| format!("Failed to open {:?}", file))?;
        io::copy(&mut input, &mut zip)?;
        written += 1;
    }
    zip.finish()?;

    info!("Compressed {} files into {}", written, zip_path.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::io::Read;
    use zip::ZipArchive;

    fn entries(zip_path: &Path) -> BTreeSet<String> {
        let archive = ZipArchive::new(File::open(zip_path).unwrap()).unwrap();
        archive.file_names().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_entries_are_relative() {
        let root = tempfile::tempdir().unwrap();
        let month = root.path().join("March 2024");
        fs::create_dir(&month).unwrap();
        fs::write(month.join("x.xlsx"), b"x").unwrap();
        fs::write(month.join("y.xlsx"), b"y").unwrap();

        let zip_path = root.path().join("March 2024.zip");
        assert_eq!(compress_dir(&month, &zip_path).unwrap(), 2);

        let expected: BTreeSet<String> = ["x.xlsx", "y.xlsx"].iter().map(|s| s.to_string()).collect();
        assert_eq!(entries(&zip_path), expected);
    }

    #[test]
    fn test_nested_files_and_contents() {
        let root = tempfile::tempdir().unwrap();
        let month = root.path().join("month");
        fs::create_dir_all(month.join("extra")).unwrap();
        fs::write(month.join("extra").join("z.xlsx"), b"zzz").unwrap();

        let zip_path = root.path().join("month.zip");
        compress_dir(&month, &zip_path).unwrap();

        let mut archive = ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let mut entry = archive.by_name("extra/z.xlsx").unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "zzz");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_not_followed() {
        let root = tempfile::tempdir().unwrap();
        let month = root.path().join("month");
        fs::create_dir(&month).unwrap();
        fs::write(month.join("x.xlsx"), b"x").unwrap();
        std::os::unix::fs::symlink(".", month.join("loop")).unwrap();

        let zip_path = root.path().join("month.zip");
        assert_eq!(compress_dir(&month, &zip_path).unwrap(), 1);

        let expected: BTreeSet<String> = ["x.xlsx"].iter().map(|s| s.to_string()).collect();
        assert_eq!(entries(&zip_path), expected);
    }
}
