use std::fs::{self, File};
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Extension of sealed batch archives.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Compress every file in `root/base_dir` into a zip at `output`, stored
/// under `base_dir/` inside the archive. Entries are added in name order.
/// Returns the number of files archived.
pub fn compress_dir(root: &Path, base_dir: &str, output: &Path) -> Result<usize> {
    let source = root.join(base_dir);
    let mut names: Vec<String> = fs::read_dir(&source)
        .with_context(|| format!("reading staging dir {}", source.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating archive dir {}", parent.display()))?;
    }
    let file = File::create(output)
        .with_context(|| format!("creating archive {}", output.display()))?;
    let mut zip = ZipWriter::new(file);

    for name in &names {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);
        zip.start_file(format!("{}/{}", base_dir, name), options)
            .with_context(|| format!("adding {} to {}", name, output.display()))?;
        let mut input = File::open(source.join(name))
            .with_context(|| format!("opening staged file {}", name))?;
        io::copy(&mut input, &mut zip)
            .with_context(|| format!("compressing staged file {}", name))?;
    }

    zip.finish()
        .with_context(|| format!("finalizing archive {}", output.display()))?;
    Ok(names.len())
}

/// Unpack `archive` into `dest`. Entries with unsafe paths are rejected by
/// the zip reader.
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("opening archive {}", archive.display()))?;
    let mut zip = ZipArchive::new(file)
        .with_context(|| format!("reading archive {}", archive.display()))?;
    zip.extract(dest)
        .with_context(|| format!("extracting {} into {}", archive.display(), dest.display()))?;
    Ok(())
}
