//! Scratch spool file for paged-out blocks.
//!
//! One append-only file per page context. Offsets are stable for the life
//! of the page; space is reclaimed by deleting the whole file when the
//! display list is erased.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::StoreError;

/// The per-page block spool.
#[derive(Debug)]
pub(crate) struct PageFile {
	path: PathBuf,
	file: Option<File>,
	len: u64,
}

impl PageFile {
	/// Prepares a spool rooted in `dir`; the file is created on first use.
	pub fn new(dir: &Path) -> Self {
		Self {
			path: dir.join(format!("imstore-{}.swap", std::process::id())),
			file: None,
			len: 0,
		}
	}

	fn file(&mut self) -> Result<&mut File, StoreError> {
		if self.file.is_none() {
			let file = OpenOptions::new()
				.create(true)
				.truncate(true)
				.read(true)
				.write(true)
				.open(&self.path)?;
			debug!("image store spool opened at {}", self.path.display());
			self.file = Some(file);
		}
		Ok(self.file.as_mut().expect("spool file just created"))
	}

	/// Appends a payload, returning its offset.
	pub fn append(&mut self, payload: &[u8]) -> Result<u64, StoreError> {
		let offset = self.len;
		let file = self.file()?;
		file.seek(SeekFrom::Start(offset))?;
		file.write_all(payload)?;
		self.len = offset + payload.len() as u64;
		Ok(offset)
	}

	/// Reads a payload back.
	pub fn read(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, StoreError> {
		let file = self.file()?;
		file.seek(SeekFrom::Start(offset))?;
		let mut payload = vec![0u8; len];
		file.read_exact(&mut payload)?;
		Ok(payload)
	}

	/// Closes and deletes the spool.
	pub fn destroy(&mut self) {
		if self.file.take().is_some() {
			if let Err(err) = std::fs::remove_file(&self.path) {
				debug!("spool {} not removed: {err}", self.path.display());
			}
		}
		self.len = 0;
	}
}

impl Drop for PageFile {
	fn drop(&mut self) {
		self.destroy();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_append_read_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let mut spool = PageFile::new(dir.path());

		let a = spool.append(&[1, 2, 3, 4]).unwrap();
		let b = spool.append(&[9, 8, 7]).unwrap();
		assert_eq!(a, 0);
		assert_eq!(b, 4);

		assert_eq!(spool.read(a, 4).unwrap(), vec![1, 2, 3, 4]);
		assert_eq!(spool.read(b, 3).unwrap(), vec![9, 8, 7]);
	}

	#[test]
	fn test_destroy_removes_file() {
		let dir = tempfile::tempdir().unwrap();
		let mut spool = PageFile::new(dir.path());
		spool.append(&[0u8; 16]).unwrap();
		let path = spool.path.clone();
		assert!(path.exists());
		spool.destroy();
		assert!(!path.exists());
	}
}
