//! Temp directories and archive fixtures.

use ferry_zip::{CompressionMethod, ZipEntry, ZipWriter};
use tempfile::TempDir;

/// Create a temp dir whose name starts with `prefix`.
///
/// # Errors
///
/// Returns an error when the directory cannot be created.
pub fn temp_dir(prefix: &str) -> anyhow::Result<TempDir> {
    Ok(tempfile::Builder::new().prefix(prefix).tempdir()?)
}

/// Build an in-memory archive with one deflated member per `(name, data)` pair.
///
/// Names ending in `/` become directory entries.
///
/// # Errors
///
/// Returns an error when the archive cannot be encoded.
pub fn zip_archive(members: &[(&str, &[u8])]) -> anyhow::Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Vec::new());
    writer.set_default_method(CompressionMethod::Deflated);
    for (name, data) in members {
        writer.put_entry(ZipEntry::new(*name))?;
        if !name.ends_with('/') {
            writer.write_entry(data)?;
        }
    }
    Ok(writer.into_inner()?)
}
