use {
    chunkspace::{
        Chunk,
        ChunkError,
        CollectiveMoveManager,
        DistChunkedList,
        Interval,
        LocalCluster,
        MoveManager,
        NodeId,
        OneSidedMoveManager,
    },
    rapidhash::RapidBuildHasher,
    std::{
        hash::BuildHasher,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    },
};

fn iv(from: i64, to: i64) -> Interval {
    Interval::new(from, to).unwrap()
}

#[test]
fn collective_move_of_upper_half() {
    let cluster = LocalCluster::new(2).unwrap();
    let results = cluster.run(|team| {
        let here = team.here();
        let list = DistChunkedList::new(Arc::clone(&team));
        let mut manager = CollectiveMoveManager::new(Arc::clone(&team));
        if here == 0 {
            list.add(Chunk::from_fn(iv(0, 100), |i| i * 3).unwrap())
                .unwrap();
            list.move_range_at_sync(iv(50, 100), 1, &mut manager)
                .unwrap();
        }

        let staged = manager.staged();
        let before = list.ranges();
        let synced = manager.sync();
        let after = list.ranges();
        (staged, before, synced, after, list.get(70))
    });

    let (staged, before, synced, after, value) = &results[0];
    assert_eq!(staged, &vec![(1, iv(50, 100))]);
    assert_eq!(before, &vec![iv(0, 50)]);
    assert_eq!(synced, &Ok(()));
    assert_eq!(after, &vec![iv(0, 50)]);
    assert_eq!(value, &Err(ChunkError::IndexOutOfRange(70)));

    let (staged, before, synced, after, value) = &results[1];
    assert!(staged.is_empty());
    assert!(before.is_empty());
    assert_eq!(synced, &Ok(()));
    assert_eq!(after, &vec![iv(50, 100)]);
    assert_eq!(value, &Ok(210));
}

#[test]
fn redistribution_by_hash() {
    const ELEMENTS: i64 = 200;

    let cluster = LocalCluster::new(2).unwrap();
    let hasher = RapidBuildHasher::default();
    let rank_of = |index: i64| (hasher.hash_one(index) % 2) as NodeId;

    let results = cluster.run(|team| {
        let list = DistChunkedList::new(Arc::clone(&team));
        let mut manager = CollectiveMoveManager::new(Arc::clone(&team));
        if team.here() == 0 {
            for index in 0..ELEMENTS {
                list.add(Chunk::filled(Interval::singleton(index), index).unwrap())
                    .unwrap();
            }
            let moves = (0..ELEMENTS).map(|index| (Interval::singleton(index), rank_of(index)));
            list.move_ranges_at_sync(moves, &mut manager).unwrap();
        }

        manager.sync().unwrap();
        list.update_catalog().unwrap();
        let owners: Vec<_> = (0..ELEMENTS).map(|index| list.owner_of(index)).collect();
        (list.ranges(), list.global_size(), owners)
    });

    let mut total = 0;
    for (node, (ranges, global_size, owners)) in results.into_iter().enumerate() {
        let node = node as NodeId;
        assert_eq!(global_size, Ok(ELEMENTS as usize));
        assert!(ranges.iter().all(|range| rank_of(range.from()) == node));
        assert!((50..150).contains(&ranges.len()), "node {node} holds {}", ranges.len());
        total += ranges.len();

        let expected: Vec<_> = (0..ELEMENTS).map(|index| Some(rank_of(index))).collect();
        assert_eq!(owners, expected);
    }
    assert_eq!(total, ELEMENTS as usize);
}

#[test]
fn one_sided_send_without_destination_participating() {
    let cluster = LocalCluster::new(3).unwrap();
    let (source, destination) = (cluster.team(0).unwrap(), cluster.team(2).unwrap());
    let outgoing = DistChunkedList::new(Arc::clone(&source));
    let incoming: DistChunkedList<String> = DistChunkedList::new(Arc::clone(&destination));
    outgoing
        .add(Chunk::from_fn(iv(0, 30), |i| format!("v{i}")).unwrap())
        .unwrap();

    let mut manager = OneSidedMoveManager::new(Arc::clone(&source), 2).unwrap();
    outgoing
        .move_range_at_sync(iv(10, 20), 2, &mut manager)
        .unwrap();
    assert!(incoming.ranges().is_empty());
    manager.send().unwrap();
    assert_eq!(incoming.ranges(), vec![iv(10, 20)]);
    assert_eq!(incoming.get(15), Ok("v15".to_string()));

    outgoing
        .move_range_at_sync(iv(20, 30), 2, &mut manager)
        .unwrap();
    let delivery = manager.async_send().unwrap();
    assert_eq!(delivery.destination(), 2);
    delivery.wait().unwrap();

    assert_eq!(outgoing.ranges(), vec![iv(0, 10)]);
    assert_eq!(incoming.ranges(), vec![iv(10, 20), iv(20, 30)]);
    assert!(manager.is_empty());
}

#[test]
fn one_sided_refuses_other_destinations() {
    let cluster = LocalCluster::new(3).unwrap();
    let team = cluster.team(0).unwrap();
    let list = DistChunkedList::new(Arc::clone(&team));
    list.add(Chunk::filled(iv(0, 10), 1_u64).unwrap()).unwrap();

    let mut manager = OneSidedMoveManager::new(team, 2).unwrap();
    assert_eq!(
        list.move_range_at_sync(iv(0, 5), 1, &mut manager),
        Err(ChunkError::UnauthorizedDestination {
            bound: 2,
            requested: 1
        })
    );
    assert_eq!(list.ranges(), vec![iv(0, 10)]);
    assert!(manager.is_empty());
}

#[test]
fn overlapping_moves_conflict() {
    let cluster = LocalCluster::new(2).unwrap();
    let team = cluster.team(0).unwrap();
    let list = DistChunkedList::new(Arc::clone(&team));
    list.add(Chunk::filled(iv(0, 20), 'x').unwrap()).unwrap();

    let mut manager = OneSidedMoveManager::new(team, 1).unwrap();
    list.move_range_at_sync(iv(0, 10), 1, &mut manager)
        .unwrap();
    assert_eq!(
        list.move_range_at_sync(iv(5, 15), 1, &mut manager),
        Err(ChunkError::Conflict {
            staged: iv(0, 10),
            requested: iv(5, 15)
        })
    );
    // The refused move took nothing away.
    assert_eq!(list.ranges(), vec![iv(10, 20)]);
    assert_eq!(manager.staged(), vec![(1, iv(0, 10))]);
}

#[test]
fn managers_of_one_node_cannot_stage_overlapping_ranges() {
    let cluster = LocalCluster::new(3).unwrap();
    let team = cluster.team(0).unwrap();
    let list = DistChunkedList::new(Arc::clone(&team));
    let _peers: Vec<DistChunkedList<i64>> = (1..3)
        .map(|node| DistChunkedList::new(cluster.team(node).unwrap()))
        .collect();
    list.add(Chunk::from_fn(iv(0, 20), |i| i).unwrap()).unwrap();

    let mut first = OneSidedMoveManager::new(Arc::clone(&team), 1).unwrap();
    let mut second = OneSidedMoveManager::new(Arc::clone(&team), 2).unwrap();
    list.move_range_at_sync(iv(0, 10), 1, &mut first).unwrap();
    assert_eq!(
        list.move_range_at_sync(iv(5, 15), 2, &mut second),
        Err(ChunkError::Conflict {
            staged: iv(0, 10),
            requested: iv(5, 15)
        })
    );
    assert_eq!(list.ranges(), vec![iv(10, 20)]);
    assert!(second.is_empty());

    first.send().unwrap();
    list.move_range_at_sync(iv(5, 15), 2, &mut second).unwrap();
    assert_eq!(list.ranges(), vec![iv(15, 20)]);
    assert_eq!(second.staged(), vec![(2, iv(10, 15))]);
}

#[test]
fn async_send_can_be_polled() {
    let cluster = LocalCluster::new(2).unwrap();
    let source = DistChunkedList::new(cluster.team(0).unwrap());
    let target: DistChunkedList<u8> = DistChunkedList::new(cluster.team(1).unwrap());
    source.add(Chunk::filled(iv(0, 8), 5_u8).unwrap()).unwrap();

    let mut manager = OneSidedMoveManager::new(cluster.team(0).unwrap(), 1).unwrap();
    source.move_range_at_sync(iv(4, 8), 1, &mut manager).unwrap();
    let delivery = manager.async_send().unwrap();
    let outcome = loop {
        match delivery.try_wait() {
            Some(outcome) => break outcome,
            None => std::thread::yield_now(),
        }
    };
    assert_eq!(outcome, Ok(()));
    assert_eq!(target.ranges(), vec![iv(4, 8)]);

    // The outcome is handed out once.
    assert!(matches!(delivery.try_wait(), Some(Err(ChunkError::Transport(_)))));
}

#[test]
fn cluster_wide_traversal_and_reduction() {
    let cluster = LocalCluster::new(3).unwrap();
    let results = cluster.run(|team| {
        let here = i64::from(team.here());
        let list = DistChunkedList::new(Arc::clone(&team));
        list.add(Chunk::from_fn(iv(here * 10, here * 10 + 10), |i| i).unwrap())
            .unwrap();

        let visited = AtomicUsize::new(0);
        let traversed = list.for_each(|_| {
            visited.fetch_add(1, Ordering::Relaxed);
        });
        let doubled = list.for_each_mut(|_, value| *value *= 2);
        let sum = list.reduce(|local| local.iter().map(|(_, v)| *v).sum::<i64>(), |a, b| a + b);
        let max = list.reduce(
            |local| local.iter().map(|(_, v)| *v).max(),
            |a: Option<i64>, b| a.max(b),
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        let failed = list.parallel_for_each(&pool, 2, |index, _| match index {
            15 => Err(ChunkError::IndexOutOfRange(index)),
            _ => Ok(()),
        });

        (traversed, visited.into_inner(), doubled, sum, max, failed)
    });

    for (traversed, visited, doubled, sum, max, failed) in results {
        assert_eq!(traversed, Ok(()));
        assert_eq!(visited, 10);
        assert_eq!(doubled, Ok(()));
        assert_eq!(sum, Ok((0..30).map(|i| i * 2).sum::<i64>()));
        assert_eq!(max, Ok(Some(58)));

        let err = failed.unwrap_err();
        assert_eq!(err.causes(), vec![&ChunkError::IndexOutOfRange(15)]);
    }
}
