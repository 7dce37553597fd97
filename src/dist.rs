mod catalog;

use {
    super::{
        Chunk,
        ChunkError,
        ChunkResult,
        ChunkedList,
        Config,
        Index,
        Interval,
        MoveManager,
        RangedList,
        Relocation,
        codec,
        runtime::{ListId, NodeId, Team},
    },
    parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    rayon::ThreadPool,
    serde::{Serialize, de::DeserializeOwned},
    std::sync::Arc,
    tracing::debug,
};

pub use catalog::Catalog;

/// A chunked list spread over the members of a team.
///
/// Every node holds its own [`ChunkedList`]; element access is always local.
/// Traversals and reductions marked as collective have to be called by every
/// member, in the same order. Ranges move between nodes through a
/// [`MoveManager`].
///
/// Lists have to be created collectively too, as the creation order gives
/// them the same identity on every node.
pub struct DistChunkedList<T> {
    id: ListId,
    team: Arc<Team>,
    local: Arc<RwLock<ChunkedList<T>>>,
    catalog: RwLock<Catalog>,
}

impl<T> DistChunkedList<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(team: Arc<Team>) -> Self {
        Self::with_config(team, Config::default())
    }

    /// Creates the local part of a new list and starts accepting chunks
    /// relocated to this node.
    pub fn with_config(team: Arc<Team>, config: Config) -> Self {
        let id = team.allocate_list_id();
        let local = Arc::new(RwLock::new(ChunkedList::with_config(config)));

        let target = Arc::clone(&local);
        team.inbox().register(
            id,
            Arc::new(move |from: NodeId, relocation: Relocation| -> ChunkResult<()> {
                let chunk: Chunk<T> = codec::decode(relocation.payload())?;
                if chunk.range() != relocation.range() {
                    return Err(ChunkError::InvalidArgument(format!(
                        "payload covers {} instead of {}",
                        chunk.range(),
                        relocation.range()
                    )));
                }
                debug!(list = id, from, range = %chunk.range(), "chunk received");
                target.write().add(chunk)
            }),
        );

        Self {
            id,
            team,
            local,
            catalog: RwLock::new(Catalog::default()),
        }
    }
}

impl<T> DistChunkedList<T> {
    pub fn id(&self) -> ListId {
        self.id
    }

    pub fn team(&self) -> &Arc<Team> {
        &self.team
    }

    /// Read access to the chunks held by this node.
    pub fn local(&self) -> RwLockReadGuard<'_, ChunkedList<T>> {
        self.local.read()
    }

    /// Write access to the chunks held by this node.
    ///
    /// One-sided relocations into this node wait while the guard is held.
    pub fn local_mut(&self) -> RwLockWriteGuard<'_, ChunkedList<T>> {
        self.local.write()
    }

    pub fn add(&self, chunk: Chunk<T>) -> ChunkResult<()> {
        self.local.write().add(chunk)
    }

    /// Removes the local chunk registered under exactly `range`.
    pub fn remove(&self, range: Interval) -> Option<Chunk<T>> {
        self.local.write().remove(range)
    }

    /// Returns a copy of the local element at `index`.
    pub fn get(&self, index: Index) -> ChunkResult<T>
    where
        T: Clone,
    {
        self.local.read().get(index).cloned()
    }

    pub fn set(&self, index: Index, value: T) -> ChunkResult<T> {
        self.local.write().set(index, value)
    }

    /// Number of elements held by this node.
    pub fn size(&self) -> usize {
        self.local.read().size()
    }

    pub fn contains_index(&self, index: Index) -> bool {
        self.local.read().contains_index(index)
    }

    pub fn contains_range(&self, range: Interval) -> bool {
        self.local.read().contains_range(range)
    }

    /// Intervals of the chunks held by this node.
    pub fn ranges(&self) -> Vec<Interval> {
        self.local.read().ranges().collect()
    }

    /// Applies `action` to the elements of every node. Collective.
    pub fn for_each<F: FnMut(&T)>(&self, action: F) -> ChunkResult<()> {
        self.team.broadcast(|| {
            self.local.read().for_each(action);
            Ok(())
        })
    }

    /// Indexed variant of [`for_each()`](Self::for_each). Collective.
    pub fn for_each_indexed<F: FnMut(Index, &T)>(&self, action: F) -> ChunkResult<()> {
        self.team.broadcast(|| {
            self.local.read().for_each_indexed(action);
            Ok(())
        })
    }

    /// Mutates the elements of every node. Collective.
    pub fn for_each_mut<F: FnMut(Index, &mut T)>(&self, action: F) -> ChunkResult<()> {
        self.team.broadcast(|| {
            self.local.write().for_each_mut(action);
            Ok(())
        })
    }

    /// Runs [`ChunkedList::parallel_for_each`] on every node. Collective.
    ///
    /// Failures of all nodes are reported on every node.
    pub fn parallel_for_each<F>(&self, pool: &ThreadPool, n: usize, action: F) -> ChunkResult<()>
    where
        T: Send,
        F: Fn(Index, &mut T) -> ChunkResult<()> + Sync,
    {
        self.team
            .broadcast(|| self.local.write().parallel_for_each(pool, n, action))
    }

    /// Reduces the whole list to one value. Collective.
    ///
    /// Every node computes `local` over its own part, the partial results are
    /// exchanged and folded with `combine` in member order, so every node ends
    /// up with the same value.
    pub fn reduce<R, L, C>(&self, local: L, combine: C) -> ChunkResult<R>
    where
        R: Serialize + DeserializeOwned,
        L: FnOnce(&ChunkedList<T>) -> R,
        C: FnMut(R, R) -> R,
    {
        let partial = local(&*self.local.read());
        let gathered = self.team.all_gather(&codec::encode(&partial)?)?;
        gathered
            .into_iter()
            .map(|(_, bytes)| codec::decode::<R>(&bytes))
            .collect::<ChunkResult<Vec<_>>>()?
            .into_iter()
            .reduce(combine)
            .ok_or_else(|| ChunkError::Transport("team has no members".into()))
    }

    /// Number of elements over all nodes. Collective.
    pub fn global_size(&self) -> ChunkResult<usize> {
        let total = self.reduce(|list| list.size() as u64, |a, b| a + b)?;
        usize::try_from(total)
            .map_err(|_| ChunkError::InvalidArgument(format!("{total} elements do not fit")))
    }

    /// Rebuilds the catalog from what every node holds. Collective.
    ///
    /// The catalog is not maintained by moves; call this once relocations are
    /// flushed before relying on [`owner_of()`](Self::owner_of).
    pub fn update_catalog(&self) -> ChunkResult<()> {
        let held = self.ranges();
        let reports = self
            .team
            .all_gather(&codec::encode(&held)?)?
            .into_iter()
            .map(|(node, bytes)| codec::decode::<Vec<Interval>>(&bytes).map(|held| (node, held)))
            .collect::<ChunkResult<Vec<_>>>()?;

        let catalog = Catalog::from_reports(reports)?;
        debug!(list = self.id, ranges = catalog.len(), "catalog rebuilt");
        *self.catalog.write() = catalog;
        Ok(())
    }

    /// Snapshot of the catalog as of the last [`update_catalog()`](Self::update_catalog).
    pub fn catalog(&self) -> Catalog {
        self.catalog.read().clone()
    }

    /// Node holding `index` according to the catalog.
    pub fn owner_of(&self, index: Index) -> Option<NodeId> {
        self.catalog.read().owner(index)
    }
}

impl<T: Serialize> DistChunkedList<T> {
    /// Stages the move of `range` to `destination`.
    ///
    /// Local chunks within `range` are moved whole, chunks crossing its edges
    /// are cut and only the part inside `range` is moved. Indices of `range`
    /// not held locally are ignored. The data leaves the local list right
    /// away and arrives at `destination` once `manager` is flushed.
    ///
    /// Moving to the calling node changes nothing.
    pub fn move_range_at_sync<M>(
        &self,
        range: Interval,
        destination: NodeId,
        manager: &mut M,
    ) -> ChunkResult<()>
    where
        M: MoveManager + ?Sized,
    {
        // Held from the conflict check until everything is staged.
        let mut local = self.local.write();
        manager.admit(self.id, range, destination)?;
        if destination == self.team.here() {
            return Ok(());
        }

        let keys: Vec<Interval> = local.overlapping(range).map(|chunk| chunk.range()).collect();
        let mut moved = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(chunk) = local.remove(key) else {
                continue;
            };
            let (below, inside, above) = chunk.carve(range)?;
            for kept in below.into_iter().chain(above) {
                local.add(kept)?;
            }
            moved.push(inside);
        }

        for chunk in moved {
            let relocation = Relocation::new(self.id, chunk.range(), codec::encode(&chunk)?);
            manager.stage(destination, relocation)?;
        }
        Ok(())
    }

    /// Stages several moves, see [`move_range_at_sync()`](Self::move_range_at_sync).
    pub fn move_ranges_at_sync<I, M>(&self, moves: I, manager: &mut M) -> ChunkResult<()>
    where
        I: IntoIterator<Item = (Interval, NodeId)>,
        M: MoveManager + ?Sized,
    {
        moves
            .into_iter()
            .try_for_each(|(range, destination)| self.move_range_at_sync(range, destination, manager))
    }
}

impl<T> Drop for DistChunkedList<T> {
    fn drop(&mut self) {
        self.team.inbox().unregister(self.id);
    }
}

impl<T> std::fmt::Debug for DistChunkedList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistChunkedList")
            .field("id", &self.id)
            .field("here", &self.team.here())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}
