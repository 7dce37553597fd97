mod partition;


use {
    super::{
        Chunk,
        ChunkError,
        ChunkResult,
        Config,
        Index,
        Interval,
        RangedList,
        RangedListMut,
        RangedView,
        RangedViewMut,
        view,
    },
    parking_lot::Mutex,
    rayon::ThreadPool,
    serde::{Deserialize, Serialize, Serializer, ser::SerializeStruct},
    std::{
        any::Any,
        collections::BTreeMap,
        fmt,
        panic::{self, AssertUnwindSafe},
    },
    tracing::trace,
};

pub use partition::Partition;

/// Ordered collection of disjoint chunks forming one logical sequence.
///
/// Chunks are keyed by their intervals; no two non-empty intervals overlap.
/// Indexing is done over the union of the chunks' intervals, which does not
/// need to be contiguous.
///
/// The list is not synchronized internally. Parallel traversals hand out
/// disjoint mutable views, everything else requires the usual borrow rules.
#[derive(Debug, Clone)]
pub struct ChunkedList<T> {
    chunks: BTreeMap<Interval, Chunk<T>>,

    /// Total number of elements over all chunks.
    size: usize,

    config: Config,
}

impl<T> Default for ChunkedList<T> {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl<T> ChunkedList<T> {
    /// Creates a new empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty list with the given tunables.
    pub fn with_config(config: Config) -> Self {
        Self {
            chunks: BTreeMap::new(),
            size: 0,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Adds a chunk to the list.
    ///
    /// Only the two neighbours of the new interval in the order are checked
    /// for overlap, since the resident intervals are already disjoint.
    pub fn add(&mut self, chunk: Chunk<T>) -> ChunkResult<()> {
        let range = chunk.range();
        if chunk.len() > self.config.max_chunk_size {
            return Err(ChunkError::InvalidArgument(format!(
                "chunk {range} exceeds maximum chunk size {}",
                self.config.max_chunk_size
            )));
        }
        if let Some(existing) = self.overlapping_neighbour(range) {
            return Err(ChunkError::Overlap {
                existing,
                inserted: range,
            });
        }

        trace!(%range, "add chunk");
        self.size += chunk.len();
        self.chunks.insert(range, chunk);
        Ok(())
    }

    /// Removes the chunk registered under exactly the given interval.
    ///
    /// Intervals which only partially overlap a chunk remove nothing: data is
    /// dropped for an exact key match only.
    pub fn remove(&mut self, range: Interval) -> Option<Chunk<T>> {
        let chunk = self.chunks.remove(&range)?;
        trace!(%range, "remove chunk");
        self.size -= chunk.len();
        Some(chunk)
    }

    /// Removes all chunks.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.size = 0;
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Intervals of the resident chunks, in order.
    pub fn ranges(&self) -> impl Iterator<Item = Interval> + '_ {
        self.chunks.keys().copied()
    }

    /// Resident chunks, in order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk<T>> {
        self.chunks.values()
    }

    pub fn into_chunks(self) -> impl Iterator<Item = Chunk<T>> {
        self.chunks.into_values()
    }

    pub fn contains_index(&self, index: Index) -> bool {
        self.chunk_key(index).is_some()
    }

    /// Checks whether every index of `range` is held by some chunk.
    pub fn contains_range(&self, range: Interval) -> bool {
        let mut covered = range.from();
        for chunk in self.overlapping(range) {
            if chunk.range().from() > covered {
                return false;
            }
            covered = chunk.range().to();
            if covered >= range.to() {
                return true;
            }
        }
        covered >= range.to()
    }

    /// Chunks sharing at least one index with `range`, in order.
    pub fn overlapping(&self, range: Interval) -> impl Iterator<Item = &Chunk<T>> {
        let start = self.floor_key(range.from());
        let tail = match start {
            Some(key) => self.chunks.range(key..),
            None => self.chunks.range(..),
        };
        tail.take_while(move |(key, _)| key.from() < range.to())
            .filter(move |(key, _)| key.overlaps(&range))
            .map(|(_, chunk)| chunk)
    }

    /// Chunk holding the given index.
    pub fn chunk_containing(&self, index: Index) -> Option<&Chunk<T>> {
        self.chunk_key(index).and_then(|key| self.chunks.get(&key))
    }

    /// Returns the element at the given index.
    pub fn get(&self, index: Index) -> ChunkResult<&T> {
        self.chunk_containing(index)
            .ok_or(ChunkError::IndexOutOfRange(index))?
            .get(index)
    }

    pub fn get_mut(&mut self, index: Index) -> ChunkResult<&mut T> {
        let key = self
            .chunk_key(index)
            .ok_or(ChunkError::IndexOutOfRange(index))?;
        self.chunks
            .get_mut(&key)
            .ok_or(ChunkError::IndexOutOfRange(index))?
            .get_mut(index)
    }

    /// Replaces the element at the given index, returning the previous one.
    pub fn set(&mut self, index: Index, value: T) -> ChunkResult<T> {
        Ok(std::mem::replace(self.get_mut(index)?, value))
    }

    /// Iterator over `(index, element)` pairs, in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.chunks.values().flat_map(|chunk| chunk.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Index, &mut T)> {
        self.chunks.values_mut().flat_map(|chunk| chunk.iter_mut())
    }

    pub fn for_each<F: FnMut(&T)>(&self, mut action: F) {
        self.iter().for_each(|(_, value)| action(value));
    }

    pub fn for_each_indexed<F: FnMut(Index, &T)>(&self, mut action: F) {
        self.iter().for_each(|(index, value)| action(index, value));
    }

    pub fn for_each_mut<F: FnMut(Index, &mut T)>(&mut self, mut action: F) {
        self.iter_mut().for_each(|(index, value)| action(index, value));
    }

    /// Maps every element, producing a list with the same intervals.
    pub fn map<U, F: FnMut(&T) -> U>(&self, mut f: F) -> ChunkedList<U> {
        let chunks = self
            .chunks
            .iter()
            .map(|(range, chunk)| (*range, chunk.map(&mut f)))
            .collect();
        ChunkedList {
            chunks,
            size: self.size,
            config: self.config,
        }
    }

    /// Splits the list into `n` partitions of near-equal element count.
    ///
    /// Partition sizes differ by at most one. A chunk crossing a partition
    /// boundary is shared between partitions through views, no elements are
    /// copied.
    pub fn split(&self, n: usize) -> ChunkResult<Vec<Partition<RangedView<'_, T>>>> {
        check_parts(n)?;
        let views = self
            .chunks
            .values()
            .map(|chunk| RangedView::new(chunk.range(), chunk.as_slice()));
        Ok(view::balance(views, self.size, n)
            .into_iter()
            .map(Partition::new)
            .collect())
    }

    /// Mutable counterpart of [`split()`](Self::split).
    pub fn split_mut(&mut self, n: usize) -> ChunkResult<Vec<Partition<RangedViewMut<'_, T>>>> {
        check_parts(n)?;
        let views = self.chunks.values_mut().map(|chunk| {
            let range = chunk.range();
            RangedViewMut::new(range, chunk.as_mut_slice())
        });
        Ok(view::balance(views, self.size, n)
            .into_iter()
            .map(Partition::new)
            .collect())
    }

    /// Applies `action` to every element using `n` tasks on the given pool.
    ///
    /// Blocks until all tasks are done. A task stops at its first failure,
    /// the other tasks keep going; all failures (panics included) are reported
    /// together as [`ChunkError::AggregatedTask`].
    pub fn parallel_for_each<F>(&mut self, pool: &ThreadPool, n: usize, action: F) -> ChunkResult<()>
    where
        T: Send,
        F: Fn(Index, &mut T) -> ChunkResult<()> + Sync,
    {
        let partitions = self.split_mut(n)?;
        let failures = Mutex::new(Vec::new());

        pool.scope(|scope| {
            for partition in partitions {
                let (action, failures) = (&action, &failures);
                scope.spawn(move |_| {
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| partition.try_for_each_mut(action)));
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => failures.lock().push(err),
                        Err(payload) => failures
                            .lock()
                            .push(ChunkError::TaskPanicked(panic_message(payload))),
                    }
                });
            }
        });

        ChunkError::aggregate(failures.into_inner())
    }

    /// Key of the last non-empty chunk starting at or before `index`.
    fn floor_key(&self, index: Index) -> Option<Interval> {
        self.chunks
            .range(..=Interval::probe(index))
            .rev()
            .map(|(key, _)| *key)
            .find(|key| !key.is_empty())
    }

    /// Key of the chunk holding `index`.
    ///
    /// Non-empty intervals are disjoint, so only the floor can hold it.
    fn chunk_key(&self, index: Index) -> Option<Interval> {
        self.floor_key(index).filter(|key| key.contains(index))
    }

    /// Resident interval overlapping `range`, if any.
    fn overlapping_neighbour(&self, range: Interval) -> Option<Interval> {
        if self.chunks.contains_key(&range) {
            return Some(range);
        }
        if range.is_empty() {
            return None;
        }

        let floor = self
            .chunks
            .range(..range)
            .rev()
            .map(|(key, _)| *key)
            .find(|key| !key.is_empty());
        let ceiling = self
            .chunks
            .range(range..)
            .map(|(key, _)| *key)
            .find(|key| !key.is_empty());
        [floor, ceiling]
            .into_iter()
            .flatten()
            .find(|key| key.overlaps(&range))
    }
}

impl<T: Clone> ChunkedList<T> {
    /// Covers `range` with chunks filled with `value`.
    ///
    /// The range is cut into as few chunks as the maximum chunk size allows.
    pub fn add_range(&mut self, range: Interval, value: T) -> ChunkResult<()> {
        if range.is_empty() {
            return Ok(());
        }
        let max = self.config.max_chunk_size.max(1) as u64;
        let parts = range.len().div_ceil(max);
        for part in range.split(usize::try_from(parts).unwrap_or(usize::MAX))? {
            self.add(Chunk::filled(part, value.clone())?)?;
        }
        Ok(())
    }
}

/// Lists are equal when they hold the same intervals and the same element at
/// every index. This walks every element.
impl<T: PartialEq> PartialEq for ChunkedList<T> {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size
            && self.chunks.len() == other.chunks.len()
            && self
                .chunks
                .iter()
                .zip(other.chunks.iter())
                .all(|((a_range, a), (b_range, b))| a_range == b_range && a.as_slice() == b.as_slice())
    }
}

impl<T: Eq> Eq for ChunkedList<T> {}

impl<T: fmt::Debug> fmt::Display for ChunkedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkedList({})", self.size)?;
        let mut budget = self.config.display_limit;
        for chunk in self.chunks.values() {
            if budget == 0 && !chunk.is_empty() {
                return write!(f, " ...");
            }
            write!(f, " {}:", chunk.range())?;
            for (n, (_, value)) in chunk.iter().enumerate() {
                if n > 0 {
                    write!(f, ",")?;
                }
                if budget == 0 {
                    return write!(f, "...");
                }
                write!(f, "{value:?}")?;
                budget -= 1;
            }
        }
        Ok(())
    }
}

impl<T: Serialize> Serialize for ChunkedList<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ChunkedList", 2)?;
        state.serialize_field("config", &self.config)?;
        state.serialize_field("chunks", &self.chunks.values().collect::<Vec<_>>())?;
        state.end()
    }
}

/// Decoded form of a list, checked before it becomes a [`ChunkedList`].
#[derive(Deserialize)]
#[serde(rename = "ChunkedList")]
struct RawList<T> {
    config: Config,
    chunks: Vec<Chunk<T>>,
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for ChunkedList<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawList::<T>::deserialize(deserializer)?;
        Self::try_from_parts(raw.config, raw.chunks).map_err(serde::de::Error::custom)
    }
}

impl<T> ChunkedList<T> {
    /// Builds a list from chunks, checking that they are disjoint.
    pub fn try_from_iter<I: IntoIterator<Item = Chunk<T>>>(chunks: I) -> ChunkResult<Self> {
        Self::try_from_parts(Config::default(), chunks)
    }

    /// Like [`try_from_iter()`](Self::try_from_iter), with the given tunables.
    pub fn try_from_parts<I: IntoIterator<Item = Chunk<T>>>(
        config: Config,
        chunks: I,
    ) -> ChunkResult<Self> {
        let mut list = Self::with_config(config);
        for chunk in chunks {
            list.add(chunk)?;
        }
        Ok(list)
    }
}

fn check_parts(n: usize) -> ChunkResult<()> {
    if n == 0 {
        return Err(ChunkError::InvalidArgument(
            "list cannot be split into zero parts".into(),
        ));
    }
    Ok(())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}
