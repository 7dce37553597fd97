use {
    super::{Index, Interval, RangedList, RangedListMut},
    std::{iter::FusedIterator, slice},
};

/// Read-only window onto a contiguous run of elements.
///
/// The view does not own the elements and cannot reach outside of its own
/// interval, even when the underlying chunk extends further.
#[derive(Debug)]
pub struct RangedView<'a, T> {
    range: Interval,
    data: &'a [T],
}

impl<T> Clone for RangedView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RangedView<'_, T> {}

impl<'a, T> RangedView<'a, T> {
    pub(crate) fn new(range: Interval, data: &'a [T]) -> Self {
        debug_assert_eq!(range.len(), data.len() as u64);
        Self { range, data }
    }

    /// Elements with the lifetime of the underlying storage.
    pub fn elements(&self) -> &'a [T] {
        self.data
    }
}

impl<T> RangedList for RangedView<'_, T> {
    type Item = T;

    fn range(&self) -> Interval {
        self.range
    }

    fn as_slice(&self) -> &[T] {
        self.data
    }
}

/// Mutable window onto a contiguous run of elements.
///
/// Views handed out by one split never overlap, so they can be processed
/// from different threads.
#[derive(Debug)]
pub struct RangedViewMut<'a, T> {
    range: Interval,
    data: &'a mut [T],
}

impl<'a, T> RangedViewMut<'a, T> {
    pub(crate) fn new(range: Interval, data: &'a mut [T]) -> Self {
        debug_assert_eq!(range.len(), data.len() as u64);
        Self { range, data }
    }

    /// Consumes the view, keeping the lifetime of the underlying storage.
    pub fn into_iter_mut(self) -> RangedIterMut<'a, T> {
        RangedIterMut::new(self.range.from(), self.data)
    }
}

impl<T> RangedList for RangedViewMut<'_, T> {
    type Item = T;

    fn range(&self) -> Interval {
        self.range
    }

    fn as_slice(&self) -> &[T] {
        &*self.data
    }
}

impl<T> RangedListMut for RangedViewMut<'_, T> {
    fn as_mut_slice(&mut self) -> &mut [T] {
        &mut *self.data
    }
}

/// View that can be cut in two at an index.
pub(crate) trait SplitAt: RangedList + Sized {
    /// `point` must lie within the view's interval.
    fn split_at(self, point: Index) -> (Self, Self);
}

impl<T> SplitAt for RangedView<'_, T> {
    fn split_at(self, point: Index) -> (Self, Self) {
        let mid = point.abs_diff(self.range.from()) as usize;
        let (head, tail) = self.data.split_at(mid);
        (
            Self::new(Interval::new_unchecked(self.range.from(), point), head),
            Self::new(Interval::new_unchecked(point, self.range.to()), tail),
        )
    }
}

impl<T> SplitAt for RangedViewMut<'_, T> {
    fn split_at(self, point: Index) -> (Self, Self) {
        let mid = point.abs_diff(self.range.from()) as usize;
        let (head, tail) = self.data.split_at_mut(mid);
        (
            Self::new(Interval::new_unchecked(self.range.from(), point), head),
            Self::new(Interval::new_unchecked(point, self.range.to()), tail),
        )
    }
}

/// Distributes views over `n` groups holding near-equal element counts.
///
/// Group `k` receives `total / n` elements, plus one while `k < total % n`.
/// Views are taken in order and cut wherever a group boundary falls inside
/// one, so a single large view may end up spread over several groups. Empty
/// views are dropped.
pub(crate) fn balance<V, I>(views: I, total: usize, n: usize) -> Vec<Vec<V>>
where
    V: SplitAt,
    I: IntoIterator<Item = V>,
{
    let mut views = views.into_iter().filter(|view| !view.is_empty());
    let mut carry: Option<V> = None;
    let mut groups = Vec::with_capacity(n);

    for k in 0..n {
        let mut wanted = total / n + usize::from(k < total % n);
        let mut group = Vec::new();
        while wanted > 0 {
            let Some(view) = carry.take().or_else(|| views.next()) else {
                break;
            };
            if view.len() <= wanted {
                wanted -= view.len();
                group.push(view);
            } else {
                let point = view.range().from() + wanted as Index;
                let (head, tail) = view.split_at(point);
                group.push(head);
                carry = Some(tail);
                wanted = 0;
            }
        }
        groups.push(group);
    }

    groups
}

/// Iterator over `(index, &element)` pairs of a contiguous run.
///
/// Created fresh by every call, so traversal can be restarted at will.
#[derive(Debug, Clone)]
pub struct RangedIter<'a, T> {
    next: Index,
    inner: slice::Iter<'a, T>,
}

impl<'a, T> RangedIter<'a, T> {
    pub(crate) fn new(from: Index, data: &'a [T]) -> Self {
        Self {
            next: from,
            inner: data.iter(),
        }
    }
}

impl<'a, T> Iterator for RangedIter<'a, T> {
    type Item = (Index, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.inner.next()?;
        let index = self.next;
        self.next += 1;
        Some((index, value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for RangedIter<'_, T> {}

impl<T> FusedIterator for RangedIter<'_, T> {}

/// Iterator over `(index, &mut element)` pairs of a contiguous run.
#[derive(Debug)]
pub struct RangedIterMut<'a, T> {
    next: Index,
    inner: slice::IterMut<'a, T>,
}

impl<'a, T> RangedIterMut<'a, T> {
    pub(crate) fn new(from: Index, data: &'a mut [T]) -> Self {
        Self {
            next: from,
            inner: data.iter_mut(),
        }
    }
}

impl<'a, T> Iterator for RangedIterMut<'a, T> {
    type Item = (Index, &'a mut T);

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.inner.next()?;
        let index = self.next;
        self.next += 1;
        Some((index, value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for RangedIterMut<'_, T> {}

impl<T> FusedIterator for RangedIterMut<'_, T> {}
