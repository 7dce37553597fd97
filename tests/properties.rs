use {
    chunkspace::{Chunk, ChunkError, ChunkedList, Interval, codec},
    proptest::prelude::*,
    std::sync::atomic::{AtomicI64, Ordering},
};

/// Candidate chunks as `(from, len)`; many of them overlap.
fn arb_chunks() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((-100_i64..100, 0_i64..25), 0..30)
}

/// Adds every candidate, keeping those that do not overlap.
fn build(chunks: &[(i64, i64)]) -> ChunkedList<Option<i64>> {
    let mut list = ChunkedList::new();
    for &(from, len) in chunks {
        let range = Interval::new(from, from + len).unwrap();
        let chunk = Chunk::from_fn(range, |i| (i % 3 != 0).then_some(i)).unwrap();
        match list.add(chunk) {
            Ok(()) | Err(ChunkError::Overlap { .. }) => {}
            Err(err) => panic!("unexpected failure: {err}"),
        }
    }
    list
}

proptest! {
    #[test]
    fn resident_ranges_are_disjoint(chunks in arb_chunks()) {
        let list = build(&chunks);
        let ranges: Vec<_> = list.ranges().collect();
        for (n, a) in ranges.iter().enumerate() {
            for b in &ranges[n + 1..] {
                prop_assert!(!a.overlaps(b), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn size_matches_ranges(chunks in arb_chunks(), removals in prop::collection::vec(0_usize..30, 0..10)) {
        let mut list = build(&chunks);
        for pick in removals {
            let ranges: Vec<_> = list.ranges().collect();
            if let Some(&range) = ranges.get(pick) {
                prop_assert!(list.remove(range).is_some());
            }
        }
        let total: u64 = list.ranges().map(|range| range.len()).sum();
        prop_assert_eq!(list.size() as u64, total);
        prop_assert_eq!(list.iter().count(), list.size());
    }

    #[test]
    fn encoding_keeps_every_element(chunks in arb_chunks()) {
        let list = build(&chunks);
        let decoded: ChunkedList<Option<i64>> = codec::decode(&codec::encode(&list).unwrap()).unwrap();
        prop_assert_eq!(&decoded, &list);
        for (index, value) in list.iter() {
            prop_assert_eq!(decoded.get(index), Ok(value));
        }
    }

    #[test]
    fn split_covers_everything(chunks in arb_chunks(), n in 1_usize..12) {
        let list = build(&chunks);
        let parts = list.split(n).unwrap();
        prop_assert_eq!(parts.len(), n);

        let sizes: Vec<_> = parts.iter().map(|part| part.size()).collect();
        prop_assert_eq!(sizes.iter().sum::<usize>(), list.size());
        let (min, max) = (sizes.iter().min().copied(), sizes.iter().max().copied());
        prop_assert!(max.unwrap_or(0) - min.unwrap_or(0) <= 1);

        let joined: Vec<_> = parts.iter().flat_map(|part| part.iter()).collect();
        let original: Vec<_> = list.iter().collect();
        prop_assert_eq!(joined, original);
    }

    #[test]
    fn parallel_sum_matches_sequential(chunks in arb_chunks(), n in 1_usize..8) {
        let mut list = build(&chunks);
        let mut expected = 0;
        list.for_each(|value| expected += value.unwrap_or(1));

        let pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();
        let total = AtomicI64::new(0);
        list.parallel_for_each(&pool, n, |_, value| {
            total.fetch_add(value.unwrap_or(1), Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
        prop_assert_eq!(total.into_inner(), expected);
    }
}
