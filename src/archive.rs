use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use crate::error::HerdError;

/// Largest entry a workflow archive may hold. Workflow documents are a few
/// kilobytes; anything near this is a broken or hostile archive.
pub const MAX_ENTRY_SIZE: u64 = 16 * 1024 * 1024;

/// One file inside a workflow archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive, `/`-separated.
    pub name: String,
    pub data: Vec<u8>,
}

/// Opens a local archive and yields its file entries in archive order.
///
/// Malformed archives must be reported as [`HerdError::ArchiveCorrupt`].
pub trait ArchiveReader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Vec<ArchiveEntry>, HerdError>;
}

/// Reads zip archives. Directory entries are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipReader;

impl ArchiveReader for ZipReader {
    fn open(&self, path: &Path) -> Result<Vec<ArchiveEntry>, HerdError> {
        let file = File::open(path).map_err(|e| HerdError::Io {
            context: format!("opening workflow archive {}", path.display()),
            source: e,
        })?;

        let mut archive = zip::ZipArchive::new(file).map_err(corrupt)?;
        read_entries(&mut archive, MAX_ENTRY_SIZE)
    }
}

/// Entries are read through `take(limit + 1)`, so neither the size a header
/// claims nor the size a stream actually yields can exceed `limit`.
fn read_entries<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    limit: u64,
) -> Result<Vec<ArchiveEntry>, HerdError> {
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index(i).map_err(corrupt)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        if file.size() > limit {
            return Err(HerdError::ArchiveCorrupt {
                message: format!("'{name}' claims {} bytes, more than {limit}", file.size()),
            });
        }

        let mut data = Vec::with_capacity(file.size() as usize);
        file.take(limit + 1)
            .read_to_end(&mut data)
            .map_err(|e| HerdError::ArchiveCorrupt {
                message: format!("reading '{name}': {e}"),
            })?;
        if data.len() as u64 > limit {
            return Err(HerdError::ArchiveCorrupt {
                message: format!("'{name}' is larger than {limit} bytes"),
            });
        }
        entries.push(ArchiveEntry { name, data });
    }

    Ok(entries)
}

fn corrupt(e: zip::result::ZipError) -> HerdError {
    HerdError::ArchiveCorrupt {
        message: e.to_string(),
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    /// Write a zip archive with the given `(name, contents)` files.
    pub fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, contents) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn reads_entries_in_archive_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.zip");
        write_zip(
            &path,
            &[
                ("repo/README.md", "# workflows"),
                ("repo/v1/b.yaml", "description: b"),
                ("repo/v1/a.yaml", "description: a"),
            ],
        );

        let entries = ZipReader.open(&path).unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["repo/README.md", "repo/v1/b.yaml", "repo/v1/a.yaml"]);
        assert_eq!(entries[1].data, b"description: b");
    }

    #[test]
    fn skips_directory_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.zip");
        let file = File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.add_directory("repo/v1/", SimpleFileOptions::default())
            .unwrap();
        zip.start_file("repo/v1/a.yaml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"description: a").unwrap();
        zip.finish().unwrap();

        let entries = ZipReader.open(&path).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "repo/v1/a.yaml");
    }

    #[test]
    fn garbage_is_archive_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.zip");
        std::fs::write(&path, b"this is not a zip file").unwrap();

        let err = ZipReader.open(&path).unwrap_err();

        assert!(matches!(err, HerdError::ArchiveCorrupt { .. }), "got {err:?}");
    }

    /// Write a single stored entry, then rewrite the uncompressed size its
    /// central directory record claims.
    fn write_zip_claiming_size(path: &Path, contents: &[u8], claimed: u32) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("repo/v1/big.yaml", options).unwrap();
        zip.write_all(contents).unwrap();
        zip.finish().unwrap();

        let mut bytes = std::fs::read(path).unwrap();
        let header = bytes
            .windows(4)
            .position(|w| w == [0x50, 0x4b, 0x01, 0x02])
            .unwrap();
        bytes[header + 24..header + 28].copy_from_slice(&claimed.to_le_bytes());
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn huge_size_claim_is_archive_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.zip");
        write_zip_claiming_size(&path, b"description: d", 0xffff_ff00);

        let err = ZipReader.open(&path).unwrap_err();

        assert!(matches!(err, HerdError::ArchiveCorrupt { .. }), "got {err:?}");
    }

    #[test]
    fn entry_longer_than_its_claim_is_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.zip");
        write_zip_claiming_size(&path, &[b'x'; 2048], 10);

        let file = File::open(&path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let err = read_entries(&mut archive, 10).unwrap_err();

        assert!(matches!(err, HerdError::ArchiveCorrupt { .. }), "got {err:?}");
    }

    #[test]
    fn entry_over_limit_is_archive_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.zip");
        let big = "x".repeat(2048);
        write_zip(&path, &[("repo/v1/big.yaml", big.as_str())]);

        let file = File::open(&path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let err = read_entries(&mut archive, 1024).unwrap_err();

        assert!(err.to_string().contains("more than 1024"), "{err}");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = ZipReader.open(&dir.path().join("none.zip")).unwrap_err();

        assert!(matches!(err, HerdError::Io { .. }), "got {err:?}");
    }
}
