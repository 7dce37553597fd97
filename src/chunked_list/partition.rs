use crate::{
    Chunk,
    ChunkError,
    ChunkResult,
    ChunkedList,
    Index,
    Interval,
    RangedList,
    RangedListMut,
};

/// One part of a split chunked list.
///
/// Holds views in index order. The partitions produced by one split are
/// pairwise disjoint and together cover the whole list.
#[derive(Debug)]
pub struct Partition<V> {
    views: Vec<V>,
}

impl<V: RangedList> Partition<V> {
    pub(crate) fn new(views: Vec<V>) -> Self {
        Self { views }
    }

    pub fn views(&self) -> &[V] {
        &self.views
    }

    /// Number of elements in the partition.
    pub fn size(&self) -> usize {
        self.views.iter().map(RangedList::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn ranges(&self) -> impl Iterator<Item = Interval> + '_ {
        self.views.iter().map(RangedList::range)
    }

    pub fn get(&self, index: Index) -> ChunkResult<&V::Item> {
        self.view_containing(index)
            .ok_or(ChunkError::IndexOutOfRange(index))
            .and_then(|pos| self.views[pos].get(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Index, &V::Item)> {
        self.views.iter().flat_map(|view| view.iter())
    }

    pub fn for_each<F: FnMut(Index, &V::Item)>(&self, mut action: F) {
        self.iter().for_each(|(index, value)| action(index, value));
    }

    /// Copies the partition into a standalone list.
    pub fn to_list(&self) -> ChunkResult<ChunkedList<V::Item>>
    where
        V::Item: Clone,
    {
        ChunkedList::try_from_iter(
            self.views
                .iter()
                .map(|view| Chunk::from_vec(view.range(), view.as_slice().to_vec()))
                .collect::<ChunkResult<Vec<_>>>()?,
        )
    }

    /// Position of the view holding `index`.
    fn view_containing(&self, index: Index) -> Option<usize> {
        let pos = self
            .views
            .partition_point(|view| view.range().from() <= index);
        pos.checked_sub(1)
            .filter(|&pos| self.views[pos].contains_index(index))
    }
}

impl<V: RangedListMut> Partition<V> {
    pub fn get_mut(&mut self, index: Index) -> ChunkResult<&mut V::Item> {
        let pos = self
            .view_containing(index)
            .ok_or(ChunkError::IndexOutOfRange(index))?;
        self.views[pos].get_mut(index)
    }

    /// Replaces the element at the given index, returning the previous one.
    pub fn set(&mut self, index: Index, value: V::Item) -> ChunkResult<V::Item> {
        Ok(std::mem::replace(self.get_mut(index)?, value))
    }

    pub fn for_each_mut<F: FnMut(Index, &mut V::Item)>(&mut self, mut action: F) {
        for view in &mut self.views {
            view.iter_mut().for_each(|(index, value)| action(index, value));
        }
    }

    /// Applies `action` in index order, stopping at the first failure.
    pub fn try_for_each_mut<F>(mut self, action: F) -> ChunkResult<()>
    where
        F: Fn(Index, &mut V::Item) -> ChunkResult<()>,
    {
        for view in &mut self.views {
            for (index, value) in view.iter_mut() {
                action(index, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::Chunk};

    fn iv(from: Index, to: Index) -> Interval {
        Interval::new(from, to).unwrap()
    }

    fn list() -> ChunkedList<i64> {
        let mut list = ChunkedList::new();
        list.add(Chunk::from_fn(iv(0, 6), |i| i).unwrap()).unwrap();
        list.add(Chunk::from_fn(iv(10, 12), |i| i).unwrap()).unwrap();
        list
    }

    #[test]
    fn lookups_inside_partition() {
        let list = list();
        let parts = list.split(2).unwrap();
        assert_eq!(parts[0].ranges().collect::<Vec<_>>(), vec![iv(0, 4)]);
        assert_eq!(
            parts[1].ranges().collect::<Vec<_>>(),
            vec![iv(4, 6), iv(10, 12)]
        );

        assert_eq!(parts[1].get(11), Ok(&11));
        assert_eq!(parts[1].get(3), Err(ChunkError::IndexOutOfRange(3)));
        assert_eq!(parts[1].get(8), Err(ChunkError::IndexOutOfRange(8)));

        let copy = parts[1].to_list().unwrap();
        assert_eq!(copy.size(), 4);
        assert_eq!(copy.ranges().collect::<Vec<_>>(), vec![iv(4, 6), iv(10, 12)]);
    }

    #[test]
    fn mutation_through_partition() {
        let mut list = list();
        {
            let mut parts = list.split_mut(3).unwrap();
            assert_eq!(parts[2].set(10, -10), Ok(10));
            parts[0].for_each_mut(|_, value| *value *= 100);
        }
        assert_eq!(list.get(10), Ok(&-10));
        assert_eq!(list.get(2), Ok(&200));
        assert_eq!(list.get(3), Ok(&3));
    }
}
