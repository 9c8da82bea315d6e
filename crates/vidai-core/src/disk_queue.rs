//! FIFO queue that keeps its head in memory and spills newer items to
//! temporary files.
//!
//! Once the queue holds `cache_after` items, each push first writes the
//! current back item to disk. Spilled items are read back when they are
//! peeked or popped. Spilling is best effort: an item that cannot be written
//! stays in memory and an error is logged.

use crate::io::Tensor;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::Write;
use tempfile::NamedTempFile;

pub const DEFAULT_CACHE_AFTER: usize = 5;

const TENSOR_FORMAT_VERSION: u8 = 1;

/// Items that can be written to and restored from bytes.
pub trait DiskCachable: Sized {
    fn serialize(&self) -> Result<Vec<u8>>;
    fn deserialize(bytes: &[u8]) -> Result<Self>;
}

enum Entry<T> {
    Memory(T),
    /// Removed from disk when dropped.
    Disk(NamedTempFile),
}

impl<T: DiskCachable> Entry<T> {
    fn spill(self) -> Self {
        match self {
            Entry::Memory(item) => match write_entry(&item) {
                Ok(file) => Entry::Disk(file),
                Err(e) => {
                    tracing::error!("Failed to cache queue item to disk: {}", e);
                    Entry::Memory(item)
                }
            },
            disk => disk,
        }
    }

    /// Copy of the item, restoring a spilled entry in place.
    fn load(&mut self) -> Result<T>
    where
        T: Clone,
    {
        match self {
            Entry::Memory(item) => Ok(item.clone()),
            Entry::Disk(file) => {
                let item: T = read_entry(file)?;
                *self = Entry::Memory(item.clone());
                Ok(item)
            }
        }
    }

    fn into_item(self) -> Result<T> {
        match self {
            Entry::Memory(item) => Ok(item),
            Entry::Disk(file) => read_entry(&file),
        }
    }

    fn is_cached(&self) -> bool {
        matches!(self, Entry::Disk(_))
    }
}

fn write_entry<T: DiskCachable>(item: &T) -> Result<NamedTempFile> {
    let bytes = item.serialize()?;
    let mut file = NamedTempFile::new()?;
    file.write_all(&bytes)?;
    file.flush()?;
    Ok(file)
}

fn read_entry<T: DiskCachable>(file: &NamedTempFile) -> Result<T> {
    let bytes = std::fs::read(file.path())?;
    T::deserialize(&bytes)
}

struct State<T> {
    entries: VecDeque<Entry<T>>,
    cache_after: usize,
}

pub struct DiskCachableQueue<T> {
    state: Mutex<State<T>>,
}

impl<T: DiskCachable> DiskCachableQueue<T> {
    pub fn new(cache_after: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: VecDeque::new(),
                cache_after,
            }),
        }
    }

    /// Threshold for later pushes. Items already queued stay where they are.
    pub fn set_cache_after(&self, cache_after: usize) {
        self.state.lock().cache_after = cache_after;
    }

    pub fn cache_after(&self) -> usize {
        self.state.lock().cache_after
    }

    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        if state.entries.len() >= state.cache_after {
            if let Some(back) = state.entries.pop_back() {
                state.entries.push_back(back.spill());
            }
        }
        state.entries.push_back(Entry::Memory(item));
    }

    /// Oldest item, or `None` if the queue is empty.
    pub fn front(&self) -> Result<Option<T>>
    where
        T: Clone,
    {
        self.state.lock().entries.front_mut().map(Entry::load).transpose()
    }

    /// Newest item, or `None` if the queue is empty.
    pub fn back(&self) -> Result<Option<T>>
    where
        T: Clone,
    {
        self.state.lock().entries.back_mut().map(Entry::load).transpose()
    }

    /// Remove the oldest item. A spilled item that cannot be read back is
    /// still removed and the error returned.
    pub fn pop(&self) -> Result<Option<T>> {
        let entry = self.state.lock().entries.pop_front();
        entry.map(Entry::into_item).transpose()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Items currently held on disk.
    pub fn cached_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.is_cached())
            .count()
    }
}

impl<T: DiskCachable> Default for DiskCachableQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_AFTER)
    }
}

fn take<const N: usize>(data: &mut &[u8]) -> Result<[u8; N]> {
    let input: &[u8] = *data;
    let (head, rest) = input
        .split_first_chunk::<N>()
        .ok_or_else(|| Error::InvalidTensor("truncated tensor data".to_string()))?;
    *data = rest;
    Ok(*head)
}

/// `version: u8, rank: u32, dims: u64 * rank, values: f32 * len`, little endian.
impl DiskCachable for Tensor {
    fn serialize(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(5 + self.shape().len() * 8 + self.data().len() * 4);
        data.push(TENSOR_FORMAT_VERSION);
        data.extend_from_slice(&(self.shape().len() as u32).to_le_bytes());
        for &dim in self.shape() {
            data.extend_from_slice(&(dim as u64).to_le_bytes());
        }
        for value in self.data() {
            data.extend_from_slice(&value.to_le_bytes());
        }
        Ok(data)
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut rest = bytes;
        let [version] = take::<1>(&mut rest)?;
        if version != TENSOR_FORMAT_VERSION {
            return Err(Error::InvalidTensor(format!(
                "unknown tensor format version {}",
                version
            )));
        }

        let rank = u32::from_le_bytes(take(&mut rest)?) as usize;
        let mut shape = Vec::new();
        for _ in 0..rank {
            shape.push(u64::from_le_bytes(take(&mut rest)?) as usize);
        }

        let len = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .filter(|&len| len.checked_mul(4) == Some(rest.len()))
            .ok_or_else(|| {
                Error::InvalidTensor(format!(
                    "shape {:?} does not match {} data bytes",
                    shape,
                    rest.len()
                ))
            })?;

        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(f32::from_le_bytes(take(&mut rest)?));
        }
        Tensor::new(shape, values)
    }
}
