//! Storage collaborators.
//!
//! The virtual memory subsystem reads executable images and reads and writes swap files
//! through the [`OpenFile`] and [`FileSystem`] traits. The kernel's file system implements
//! them; [`MemFileSystem`] is an in-memory implementation used by the simulator and tests.

use alloc::{
    boxed::Box,
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};

use spin::Mutex;

use crate::StorageError;

/// A byte-addressable, random-access file.
pub trait OpenFile: Send {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning the number read.
    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> Result<usize, StorageError>;

    /// Writes up to `buf.len()` bytes starting at `offset`, returning the number written.
    fn write_at(&mut self, buf: &[u8], offset: usize) -> Result<usize, StorageError>;

    /// Returns the size of the file in bytes.
    fn len(&self) -> usize;

    /// Returns true if the file is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `buf` completely from `offset`, failing on a short read.
    fn read_exact_at(&mut self, buf: &mut [u8], offset: usize) -> Result<(), StorageError> {
        if self.read_at(buf, offset)? != buf.len() {
            return Err(StorageError::ShortTransfer);
        }
        Ok(())
    }

    /// Writes all of `buf` at `offset`, failing on a short write.
    fn write_all_at(&mut self, buf: &[u8], offset: usize) -> Result<(), StorageError> {
        if self.write_at(buf, offset)? != buf.len() {
            return Err(StorageError::ShortTransfer);
        }
        Ok(())
    }
}

/// File lifecycle operations used to manage swap files.
pub trait FileSystem: Send + Sync {
    /// Creates a zero-filled file of `size` bytes.
    fn create(&self, name: &str, size: usize) -> Result<(), StorageError>;

    /// Opens an existing file.
    fn open(&self, name: &str) -> Option<Box<dyn OpenFile>>;

    /// Removes a file. Handles that are already open stay usable.
    fn remove(&self, name: &str) -> Result<(), StorageError>;
}

/// A fixed-size file held in memory.
///
/// Clones share the same contents, the way two open handles share one file.
#[derive(Clone, Default)]
pub struct MemFile {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemFile {
    /// Creates a zero-filled file of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::from_bytes(vec![0; size])
    }

    /// Creates a file holding `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Returns a copy of the file contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl OpenFile for MemFile {
    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> Result<usize, StorageError> {
        let data = self.data.lock();
        if offset > data.len() {
            return Err(StorageError::OutOfRange {
                offset,
                len: buf.len(),
            });
        }
        let count = buf.len().min(data.len() - offset);
        buf[..count].copy_from_slice(&data[offset..offset + count]);
        Ok(count)
    }

    fn write_at(&mut self, buf: &[u8], offset: usize) -> Result<usize, StorageError> {
        let mut data = self.data.lock();
        if offset > data.len() {
            return Err(StorageError::OutOfRange {
                offset,
                len: buf.len(),
            });
        }
        // Files do not grow: the swap layout is fixed at creation.
        let count = buf.len().min(data.len() - offset);
        data[offset..offset + count].copy_from_slice(&buf[..count]);
        Ok(count)
    }

    fn len(&self) -> usize {
        self.data.lock().len()
    }
}

/// An in-memory flat file system.
#[derive(Default)]
pub struct MemFileSystem {
    files: Mutex<BTreeMap<String, MemFile>>,
}

impl MemFileSystem {
    /// Creates an empty file system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given contents, replacing any existing file of that name.
    pub fn insert(&self, name: &str, bytes: Vec<u8>) -> MemFile {
        let file = MemFile::from_bytes(bytes);
        self.files.lock().insert(name.to_string(), file.clone());
        file
    }

    /// Returns true if a file with this name exists.
    pub fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    /// Returns a shared handle to the named file.
    pub fn file(&self, name: &str) -> Option<MemFile> {
        self.files.lock().get(name).cloned()
    }

    /// Returns the names of all files, in order.
    pub fn names(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }
}

impl FileSystem for MemFileSystem {
    fn create(&self, name: &str, size: usize) -> Result<(), StorageError> {
        let mut files = self.files.lock();
        if files.contains_key(name) {
            return Err(StorageError::AlreadyExists);
        }
        files.insert(name.to_string(), MemFile::new(size));
        Ok(())
    }

    fn open(&self, name: &str) -> Option<Box<dyn OpenFile>> {
        self.file(name)
            .map(|file| Box::new(file) as Box<dyn OpenFile>)
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        self.files
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_stop_at_end_of_file() {
        let mut file = MemFile::from_bytes(vec![1, 2, 3, 4]);
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(&mut buf, 2), Ok(2));
        assert_eq!(&buf[..2], &[3, 4]);
        assert_eq!(
            file.read_exact_at(&mut buf, 0),
            Err(StorageError::ShortTransfer)
        );
    }

    #[test]
    fn writes_do_not_grow_the_file() {
        let mut file = MemFile::new(4);
        assert_eq!(file.write_at(&[9; 6], 1), Ok(3));
        assert_eq!(file.contents(), vec![0, 9, 9, 9]);
        assert!(matches!(
            file.write_at(&[1], 5),
            Err(StorageError::OutOfRange { offset: 5, len: 1 })
        ));
    }

    #[test]
    fn handles_share_contents() {
        let fs = MemFileSystem::new();
        fs.create("SWAP.1", 8).unwrap();
        let mut a = fs.open("SWAP.1").unwrap();
        let mut b = fs.open("SWAP.1").unwrap();
        a.write_all_at(&[7, 7], 4).unwrap();

        let mut buf = [0u8; 2];
        b.read_exact_at(&mut buf, 4).unwrap();
        assert_eq!(buf, [7, 7]);
    }

    #[test]
    fn create_remove_lifecycle() {
        let fs = MemFileSystem::new();
        fs.create("a", 1).unwrap();
        assert_eq!(fs.create("a", 1), Err(StorageError::AlreadyExists));
        assert!(fs.exists("a"));
        fs.remove("a").unwrap();
        assert!(!fs.exists("a"));
        assert!(fs.open("a").is_none());
        assert_eq!(fs.remove("a"), Err(StorageError::NotFound));
    }
}
