use {
    super::{ChunkError, ChunkResult, Index, Interval, RangedList, RangedListMut},
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Contiguous storage of elements over a fixed interval.
///
/// Element for index `i` lives in slot `i - range.from()`. The interval never
/// changes once the chunk is created, only element values do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawChunk<T>", bound(deserialize = "T: Deserialize<'de>"))]
pub struct Chunk<T> {
    range: Interval,
    data: Vec<T>,
}

/// Chunk as it comes off the wire, before the length is checked.
#[derive(Deserialize)]
struct RawChunk<T> {
    range: Interval,
    data: Vec<T>,
}

impl<T> TryFrom<RawChunk<T>> for Chunk<T> {
    type Error = ChunkError;

    fn try_from(raw: RawChunk<T>) -> Result<Self, Self::Error> {
        Chunk::from_vec(raw.range, raw.data)
    }
}

impl<T> Chunk<T> {
    /// Creates a chunk over `range` backed by `data`.
    ///
    /// The vector length has to match the length of the interval.
    pub fn from_vec(range: Interval, data: Vec<T>) -> ChunkResult<Self> {
        if range.len() != data.len() as u64 {
            return Err(ChunkError::InvalidArgument(format!(
                "{} elements supplied for range {range}",
                data.len()
            )));
        }
        Ok(Self { range, data })
    }

    /// Creates a chunk with every element computed from its index.
    pub fn from_fn<F>(range: Interval, f: F) -> ChunkResult<Self>
    where
        F: FnMut(Index) -> T,
    {
        capacity_of(range)?;
        Ok(Self {
            range,
            data: (range.from()..range.to()).map(f).collect(),
        })
    }

    /// Skips the length check, callers guarantee it.
    pub(crate) fn from_parts(range: Interval, data: Vec<T>) -> Self {
        debug_assert_eq!(range.len(), data.len() as u64);
        Self { range, data }
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Cuts the chunk into `[from..point)` and `[point..to)` without copying
    /// elements.
    pub fn split_at(mut self, point: Index) -> ChunkResult<(Chunk<T>, Chunk<T>)> {
        let (head, tail) = self.range.split_at(point)?;
        let rest = self.data.split_off(head.len() as usize);
        Ok((
            Self::from_parts(head, self.data),
            Self::from_parts(tail, rest),
        ))
    }

    /// Takes `range` out of the chunk.
    ///
    /// Returns the part below `range` (if any), the part inside `range` and the
    /// part above `range` (if any). The middle part is clamped to the chunk's
    /// own interval, so `range` only needs to overlap it.
    pub fn carve(self, range: Interval) -> ChunkResult<(Option<Chunk<T>>, Chunk<T>, Option<Chunk<T>>)> {
        let Some(common) = self.range.intersect(&range) else {
            return Err(ChunkError::IndexOutOfRange(range.from()));
        };

        let (below, rest) = self.split_at(common.from())?;
        let (inside, above) = rest.split_at(common.to())?;
        let non_empty = |chunk: Chunk<T>| (!chunk.range.is_empty()).then_some(chunk);
        Ok((non_empty(below), inside, non_empty(above)))
    }
}

impl<T: Clone> Chunk<T> {
    /// Creates a chunk with every element set to `value`.
    pub fn filled(range: Interval, value: T) -> ChunkResult<Self> {
        Ok(Self {
            range,
            data: vec![value; capacity_of(range)?],
        })
    }
}

impl<T: Default> Chunk<T> {
    /// Creates a chunk of default values.
    pub fn with_default(range: Interval) -> ChunkResult<Self> {
        Self::from_fn(range, |_| T::default())
    }
}

impl<T> RangedList for Chunk<T> {
    type Item = T;

    fn range(&self) -> Interval {
        self.range
    }

    fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T> RangedListMut for Chunk<T> {
    fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T: fmt::Debug> fmt::Display for Chunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.range)?;
        for (n, value) in self.data.iter().enumerate() {
            if n > 0 {
                write!(f, ",")?;
            }
            write!(f, "{value:?}")?;
        }
        Ok(())
    }
}

/// Number of slots needed to back `range`.
fn capacity_of(range: Interval) -> ChunkResult<usize> {
    usize::try_from(range.len()).map_err(|_| {
        ChunkError::InvalidArgument(format!("range {range} does not fit into memory"))
    })
}
