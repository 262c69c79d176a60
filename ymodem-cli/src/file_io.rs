//! Filesystem-backed [`FileSource`]/[`FileSink`] implementations.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use ymodem::{FileSink, FileSource};

/// Reads a single file from disk for the sender.
pub struct FsFileSource {
    path: PathBuf,
    file: Option<File>,
}

impl FsFileSource {
    /// Create a source that will read `path` once opened.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// The filename component, as it should be announced in packet 0.
    #[must_use]
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

impl FileSource for FsFileSource {
    fn open(&mut self) -> ymodem::Result<()> {
        self.file = Some(File::open(&self.path).map_err(ymodem::Error::Io)?);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> ymodem::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ymodem::Error::FileError("read before open".into()))?;
        file.read(buf).map_err(ymodem::Error::Io)
    }

    fn size(&self) -> ymodem::Result<u64> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| ymodem::Error::FileError("size queried before open".into()))?;
        Ok(file.metadata().map_err(ymodem::Error::Io)?.len())
    }

    fn close(&mut self) -> ymodem::Result<()> {
        self.file = None;
        Ok(())
    }
}

/// Writes a received file into a destination directory.
pub struct FsFileSink {
    dir: PathBuf,
    file: Option<File>,
}

impl FsFileSink {
    /// Create a sink that writes into `dir`, which must already exist.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file: None,
        }
    }
}

impl FileSink for FsFileSink {
    fn open(&mut self, filename: &str) -> ymodem::Result<()> {
        let name = Path::new(filename)
            .file_name()
            .ok_or_else(|| ymodem::Error::FileError(format!("invalid filename {filename:?}")))?;
        let path = self.dir.join(name);
        self.file = Some(File::create(path).map_err(ymodem::Error::Io)?);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> ymodem::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ymodem::Error::FileError("write before open".into()))?;
        file.write_all(buf).map_err(ymodem::Error::Io)?;
        Ok(buf.len())
    }

    fn close(&mut self) -> ymodem::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
        Ok(())
    }
}
