use {
    crate::{ChunkError, ChunkResult, Index, Interval, runtime::NodeId},
    std::collections::BTreeMap,
};

/// Which node holds which range of a distributed list.
///
/// Rebuilt from what every node reports it holds. It is a snapshot: moves done
/// after the rebuild are not reflected until the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    owners: BTreeMap<Interval, NodeId>,
}

impl Catalog {
    /// Builds the catalog from `(node, ranges held)` reports.
    ///
    /// Empty ranges are skipped. Ranges reported twice, or overlapping each
    /// other, are rejected with [`ChunkError::Overlap`].
    pub fn from_reports<I>(reports: I) -> ChunkResult<Self>
    where
        I: IntoIterator<Item = (NodeId, Vec<Interval>)>,
    {
        let mut owners = BTreeMap::new();
        for (node, ranges) in reports {
            for range in ranges.into_iter().filter(|range| !range.is_empty()) {
                if owners.insert(range, node).is_some() {
                    return Err(ChunkError::Overlap {
                        existing: range,
                        inserted: range,
                    });
                }
            }
        }

        // Sorted by start, so any overlap shows up between neighbours.
        let mut keys = owners.keys();
        if let Some(mut prev) = keys.next() {
            for next in keys {
                if prev.overlaps(next) {
                    return Err(ChunkError::Overlap {
                        existing: *prev,
                        inserted: *next,
                    });
                }
                prev = next;
            }
        }
        Ok(Self { owners })
    }

    /// Node holding the given index.
    pub fn owner(&self, index: Index) -> Option<NodeId> {
        self.owners
            .range(..=Interval::probe(index))
            .next_back()
            .filter(|(range, _)| range.contains(index))
            .map(|(_, node)| *node)
    }

    /// Ranges held by `node`, in order.
    pub fn ranges_of(&self, node: NodeId) -> impl Iterator<Item = Interval> + '_ {
        self.owners
            .iter()
            .filter(move |(_, owner)| **owner == node)
            .map(|(range, _)| *range)
    }

    /// Ranges sharing an index with `range`, with their owners.
    pub fn owners_in(&self, range: Interval) -> Vec<(Interval, NodeId)> {
        let start = self
            .owners
            .range(..=Interval::probe(range.from()))
            .next_back()
            .map(|(key, _)| *key);
        let tail = match start {
            Some(key) => self.owners.range(key..),
            None => self.owners.range(..),
        };
        tail.take_while(|(key, _)| key.from() < range.to())
            .filter(|(key, _)| key.overlaps(&range))
            .map(|(key, node)| (*key, *node))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Interval, NodeId)> + '_ {
        self.owners.iter().map(|(range, node)| (*range, *node))
    }

    /// Number of ranges.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(from: Index, to: Index) -> Interval {
        Interval::new(from, to).unwrap()
    }

    #[test]
    fn lookups() {
        let catalog = Catalog::from_reports([
            (0, vec![iv(0, 10), iv(30, 40), iv(50, 50)]),
            (1, vec![iv(10, 20)]),
            (2, vec![]),
        ])
        .unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.owner(0), Some(0));
        assert_eq!(catalog.owner(15), Some(1));
        assert_eq!(catalog.owner(25), None);
        assert_eq!(catalog.owner(-1), None);
        assert_eq!(catalog.owner(50), None);

        assert_eq!(catalog.ranges_of(0).collect::<Vec<_>>(), vec![iv(0, 10), iv(30, 40)]);
        assert_eq!(catalog.ranges_of(2).count(), 0);
        assert_eq!(
            catalog.owners_in(iv(5, 35)),
            vec![(iv(0, 10), 0), (iv(10, 20), 1), (iv(30, 40), 0)]
        );
        assert!(catalog.owners_in(iv(20, 30)).is_empty());
    }

    #[test]
    fn overlapping_reports_are_rejected() {
        assert_eq!(
            Catalog::from_reports([(0, vec![iv(0, 10)]), (1, vec![iv(5, 15)])]),
            Err(ChunkError::Overlap {
                existing: iv(0, 10),
                inserted: iv(5, 15)
            })
        );
        assert!(matches!(
            Catalog::from_reports([(0, vec![iv(0, 10)]), (1, vec![iv(0, 10)])]),
            Err(ChunkError::Overlap { .. })
        ));
        assert!(Catalog::from_reports(Vec::<(NodeId, Vec<Interval>)>::new()).unwrap().is_empty());
    }
}
