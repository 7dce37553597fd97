//! Range-indexed chunked collections.
//!
//! Large sequences of elements are addressed by contiguous `i64` intervals and
//! stored as contiguous [`Chunk`]s. A [`ChunkedList`] assembles disjoint chunks
//! into one logical sequence, and a [`DistChunkedList`] spreads such lists over
//! the nodes of a [`Team`], moving index ranges between nodes with a
//! [`CollectiveMoveManager`] (barrier-synchronized) or a
//! [`OneSidedMoveManager`] (point-to-point).

mod chunk;
mod chunked_list;
pub mod codec;
mod config;
mod dist;
mod error;
mod interval;
mod relocation;
pub mod runtime;
mod view;

pub use {
    chunk::Chunk,
    chunked_list::{ChunkedList, Partition},
    config::{Config, ConfigBuilder},
    dist::{Catalog, DistChunkedList},
    error::{ChunkError, ChunkResult},
    interval::{Index, Interval},
    relocation::{CollectiveMoveManager, MoveManager, OneSidedMoveManager, Relocation},
    runtime::{Delivery, Inbox, ListId, LocalCluster, NodeId, Team, Transport},
    view::{RangedIter, RangedIterMut, RangedView, RangedViewMut},
};

/// Read access to elements laid out contiguously over an [`Interval`].
///
/// Implemented by owning [`Chunk`]s and by the non-owning [`RangedView`] and
/// [`RangedViewMut`]. The element for index `i` lives at offset
/// `i - range().from()` of [`as_slice()`](Self::as_slice).
pub trait RangedList {
    type Item;

    /// Interval covered.
    fn range(&self) -> Interval;

    /// Elements in index order.
    fn as_slice(&self) -> &[Self::Item];

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    fn contains_index(&self, index: Index) -> bool {
        self.range().contains(index)
    }

    /// Returns the element at the given index.
    fn get(&self, index: Index) -> ChunkResult<&Self::Item> {
        let offset = offset_of(self.range(), index)?;
        Ok(&self.as_slice()[offset])
    }

    /// Iterator over `(index, element)` pairs.
    fn iter(&self) -> RangedIter<'_, Self::Item> {
        RangedIter::new(self.range().from(), self.as_slice())
    }

    /// Iterator over the part of `range` covered by this list.
    ///
    /// Fails unless `range` lies within the own interval.
    fn iter_range(&self, range: Interval) -> ChunkResult<RangedIter<'_, Self::Item>> {
        check_bounds(self.range(), range)?;
        let slice = &self.as_slice()[offsets(self.range(), range)];
        Ok(RangedIter::new(range.from(), slice))
    }

    /// Zero-copy view restricted to `range`.
    ///
    /// Fails unless `range` lies within the own interval.
    fn view(&self, range: Interval) -> ChunkResult<RangedView<'_, Self::Item>> {
        check_bounds(self.range(), range)?;
        let slice = &self.as_slice()[offsets(self.range(), range)];
        Ok(RangedView::new(range, slice))
    }

    /// Copies the elements of `range` into a new chunk.
    fn materialize(&self, range: Interval) -> ChunkResult<Chunk<Self::Item>>
    where
        Self::Item: Clone,
    {
        let view = self.view(range)?;
        Chunk::from_vec(range, view.as_slice().to_vec())
    }

    /// Maps every element into a new chunk over the same interval.
    fn map<U, F>(&self, f: F) -> Chunk<U>
    where
        F: FnMut(&Self::Item) -> U,
    {
        Chunk::from_parts(self.range(), self.as_slice().iter().map(f).collect())
    }
}

/// Write access on top of [`RangedList`].
pub trait RangedListMut: RangedList {
    fn as_mut_slice(&mut self) -> &mut [Self::Item];

    fn get_mut(&mut self, index: Index) -> ChunkResult<&mut Self::Item> {
        let offset = offset_of(self.range(), index)?;
        Ok(&mut self.as_mut_slice()[offset])
    }

    /// Replaces the element at the given index, returning the previous one.
    fn set(&mut self, index: Index, value: Self::Item) -> ChunkResult<Self::Item> {
        Ok(std::mem::replace(self.get_mut(index)?, value))
    }

    fn iter_mut(&mut self) -> RangedIterMut<'_, Self::Item> {
        let from = self.range().from();
        RangedIterMut::new(from, self.as_mut_slice())
    }

    /// Mutable zero-copy view restricted to `range`.
    fn view_mut(&mut self, range: Interval) -> ChunkResult<RangedViewMut<'_, Self::Item>> {
        check_bounds(self.range(), range)?;
        let bounds = offsets(self.range(), range);
        Ok(RangedViewMut::new(range, &mut self.as_mut_slice()[bounds]))
    }
}

/// Slice offset of `index` within `range`.
pub(crate) fn offset_of(range: Interval, index: Index) -> ChunkResult<usize> {
    if !range.contains(index) {
        return Err(ChunkError::IndexOutOfRange(index));
    }
    // Bounded by the slice length.
    Ok(index.abs_diff(range.from()) as usize)
}

/// Slice bounds of `inner` within `outer`, `inner` must be contained.
fn offsets(outer: Interval, inner: Interval) -> std::ops::Range<usize> {
    let start = inner.from().abs_diff(outer.from()) as usize;
    start..start + inner.len() as usize
}

/// Fails with the first index of `inner` not covered by `outer`.
pub(crate) fn check_bounds(outer: Interval, inner: Interval) -> ChunkResult<()> {
    if outer.contains_range(&inner) {
        return Ok(());
    }
    let index = if inner.from() < outer.from() {
        inner.from()
    } else {
        outer.to().max(inner.from())
    };
    Err(ChunkError::IndexOutOfRange(index))
}
