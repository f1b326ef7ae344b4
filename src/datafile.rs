//! A single append-only data file, identified by a monotonically increasing numeric id.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// File extension used for data files.
const DATA_EXT: &str = "data";

/// Builds the path of the data file with the given id inside `dir`.
pub fn datafile_path(dir: impl AsRef<Path>, id: u64) -> PathBuf {
    dir.as_ref().join(format!("{id:020}.{DATA_EXT}"))
}

/// Parses a data file's numeric id out of a filename produced by [`datafile_path`].
pub fn parse_fileid(filename: &str) -> Option<u64> {
    filename.strip_suffix(&format!(".{DATA_EXT}"))?.parse().ok()
}

/// Scans `dir` for data files and returns their ids in ascending order.
pub fn sorted_fileids(dir: impl AsRef<Path>) -> io::Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(id) = parse_fileid(name) {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// A single append-only log file. The active file is appended to and read from by the writer;
/// stale files are opened read-only and shared across reader threads.
#[derive(Debug)]
pub struct DataFile {
    id: u64,
    file: File,
    len: u64,
}

impl DataFile {
    /// Opens (creating if necessary) the data file with the given id in `dir`.
    pub fn open(dir: impl AsRef<Path>, id: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(datafile_path(dir, id))?;
        let len = file.metadata()?.len();
        Ok(Self { id, file, len })
    }

    /// Opens an existing data file read-only.
    pub fn open_readonly(dir: impl AsRef<Path>, id: u64) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(datafile_path(dir, id))?;
        let len = file.metadata()?.len();
        Ok(Self { id, file, len })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.len
    }

    /// Appends `bytes` to the end of the file and returns the offset at which it begins.
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<u64> {
        let offset = self.len;
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(offset)
    }

    /// Reads exactly `length` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; length as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Flushes buffered writes to the underlying storage.
    pub fn sync_all(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let mut df = DataFile::open(dir.path(), 0).unwrap();

        let off1 = df.append(b"hello").unwrap();
        let off2 = df.append(b"world!").unwrap();
        assert_eq!(off1, 0);
        assert_eq!(off2, 5);
        assert_eq!(df.size(), 11);

        assert_eq!(df.read_at(off1, 5).unwrap(), b"hello");
        assert_eq!(df.read_at(off2, 6).unwrap(), b"world!");
    }

    #[test]
    fn short_read_is_an_error() {
        let dir = tempdir().unwrap();
        let mut df = DataFile::open(dir.path(), 0).unwrap();
        df.append(b"hi").unwrap();
        assert!(df.read_at(0, 100).is_err());
    }

    #[test]
    fn fileids_sort_ascending() {
        let dir = tempdir().unwrap();
        for id in [3, 1, 2] {
            DataFile::open(dir.path(), id).unwrap();
        }
        assert_eq!(sorted_fileids(dir.path()).unwrap(), vec![1, 2, 3]);
    }
}
