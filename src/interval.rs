use {
    super::{ChunkError, ChunkResult},
    serde::{Deserialize, Serialize},
    std::{fmt, ops::Range},
};

/// Position of an element in the index space.
pub type Index = i64;

/// A half-open interval of the index space.
///
/// Range bounded inclusively below and exclusively above i.e.
/// `[from..to)`. The interval is empty when `from == to`.
///
/// Intervals are ordered by `from`, then by `to`. For disjoint intervals this
/// is the order of their positions in the index space, which is what the
/// chunked list relies on when it looks up neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "(Index, Index)", into = "(Index, Index)")]
pub struct Interval {
    from: Index,
    to: Index,
}

impl Interval {
    /// Creates a new interval, fails if `from > to`.
    pub fn new(from: Index, to: Index) -> ChunkResult<Self> {
        if from > to {
            return Err(ChunkError::InvalidRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// Interval holding exactly one index.
    ///
    /// For `Index::MAX` the interval is empty, as there is no room above it.
    pub fn singleton(index: Index) -> Self {
        Self {
            from: index,
            to: index.saturating_add(1),
        }
    }

    /// Skips the bounds check, callers guarantee `from <= to`.
    pub(crate) const fn new_unchecked(from: Index, to: Index) -> Self {
        debug_assert!(from <= to);
        Self { from, to }
    }

    /// Greatest interval starting at `index`.
    ///
    /// Every interval starting at or before `index` compares less or equal to
    /// it, which turns it into a floor probe for ordered maps.
    pub(crate) const fn probe(index: Index) -> Self {
        Self {
            from: index,
            to: Index::MAX,
        }
    }

    pub fn from(&self) -> Index {
        self.from
    }

    pub fn to(&self) -> Index {
        self.to
    }

    /// Number of indices in the interval.
    pub fn len(&self) -> u64 {
        self.to.abs_diff(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    /// Checks whether the index falls into the interval.
    pub fn contains(&self, index: Index) -> bool {
        self.from <= index && index < self.to
    }

    /// Checks whether `other` lies within the interval.
    ///
    /// Empty intervals are contained as long as their position is within the
    /// bounds.
    pub fn contains_range(&self, other: &Interval) -> bool {
        self.from <= other.from && other.to <= self.to
    }

    /// Checks whether two intervals share at least one index.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.from.max(other.from) < self.to.min(other.to)
    }

    /// Common part of two intervals, `None` unless they overlap.
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        if self.overlaps(other) {
            Some(Self {
                from: self.from.max(other.from),
                to: self.to.min(other.to),
            })
        } else {
            None
        }
    }

    /// Cuts the interval into `[from..point)` and `[point..to)`.
    pub fn split_at(&self, point: Index) -> ChunkResult<(Interval, Interval)> {
        if point < self.from || point > self.to {
            return Err(ChunkError::IndexOutOfRange(point));
        }
        Ok((
            Self {
                from: self.from,
                to: point,
            },
            Self {
                from: point,
                to: self.to,
            },
        ))
    }

    /// Splits the interval into `n` consecutive intervals of near-equal size.
    ///
    /// The remainder of the division is handed out one index at a time to the
    /// leading intervals, so sizes never differ by more than one. When `n`
    /// exceeds the length, the trailing intervals are empty.
    pub fn split(&self, n: usize) -> ChunkResult<Vec<Interval>> {
        if n == 0 {
            return Err(ChunkError::InvalidArgument(
                "interval cannot be split into zero parts".into(),
            ));
        }

        let n_parts = n as u64;
        let (base, remainder) = (self.len() / n_parts, self.len() % n_parts);
        let mut parts = Vec::with_capacity(n);
        let mut from = self.from;
        for idx in 0..n_parts {
            let step = base + u64::from(idx < remainder);
            // Partial sums never exceed the interval's length.
            let to = from.wrapping_add_unsigned(step);
            parts.push(Self { from, to });
            from = to;
        }

        Ok(parts)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.from, self.to)
    }
}

impl TryFrom<(Index, Index)> for Interval {
    type Error = ChunkError;

    fn try_from((from, to): (Index, Index)) -> Result<Self, Self::Error> {
        Self::new(from, to)
    }
}

impl From<Interval> for (Index, Index) {
    fn from(interval: Interval) -> Self {
        (interval.from, interval.to)
    }
}

impl TryFrom<Range<Index>> for Interval {
    type Error = ChunkError;

    fn try_from(range: Range<Index>) -> Result<Self, Self::Error> {
        Self::new(range.start, range.end)
    }
}

impl From<Interval> for Range<Index> {
    fn from(interval: Interval) -> Self {
        interval.from..interval.to
    }
}
