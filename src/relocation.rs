//! Moving index ranges between nodes.
//!
//! A move is staged first: the data leaves the local list right away and is
//! handed to a [`MoveManager`] as an encoded [`Relocation`]. It lands at the
//! destination once the manager is flushed, either collectively by every node
//! of the team at once ([`CollectiveMoveManager::sync`]) or point-to-point
//! ([`OneSidedMoveManager::send`]). Until then the range is held by nobody,
//! and no manager of the same node may stage an overlapping range of the
//! same list.

use {
    super::{
        ChunkError,
        ChunkResult,
        Interval,
        codec,
        runtime::{Delivery, ListId, NodeId, Team},
    },
    parking_lot::Mutex,
    serde::{Deserialize, Serialize},
    std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
    },
    tracing::debug,
};

/// Encoded chunk of a distributed list on its way to another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    list: ListId,
    range: Interval,
    payload: Vec<u8>,
}

impl Relocation {
    pub fn new(list: ListId, range: Interval, payload: Vec<u8>) -> Self {
        Self {
            list,
            range,
            payload,
        }
    }

    /// List the chunk belongs to.
    pub fn list(&self) -> ListId {
        self.list
    }

    pub fn range(&self) -> Interval {
        self.range
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Stages relocations until they are flushed to their destinations.
pub trait MoveManager {
    /// Checks that `range` of `list` may be moved to `destination`.
    ///
    /// Called before any data is removed locally, so that a refused move
    /// leaves the source untouched.
    fn admit(&self, list: ListId, range: Interval, destination: NodeId) -> ChunkResult<()>;

    /// Registers an encoded chunk to be shipped to `destination`.
    fn stage(&mut self, destination: NodeId, relocation: Relocation) -> ChunkResult<()>;

    /// Destinations and ranges of everything staged so far, in staging order.
    fn staged(&self) -> Vec<(NodeId, Interval)>;

    fn is_empty(&self) -> bool {
        self.staged().is_empty()
    }
}

/// Ranges staged on one node, by any of its managers.
///
/// A range stays claimed until the manager that staged it is flushed or
/// dropped. Overlapping ranges of the same list cannot be claimed twice.
#[derive(Debug, Default)]
pub(crate) struct StagedRanges {
    claims: Mutex<Vec<Claim>>,
    next_holder: AtomicU64,
}

#[derive(Debug)]
struct Claim {
    holder: u64,
    list: ListId,
    range: Interval,
}

impl StagedRanges {
    /// Hands out a token identifying one manager's claims.
    fn holder(&self) -> u64 {
        self.next_holder.fetch_add(1, Ordering::Relaxed)
    }

    fn check(&self, list: ListId, range: Interval) -> ChunkResult<()> {
        check_claims(&self.claims.lock(), list, range)
    }

    fn claim(&self, holder: u64, list: ListId, range: Interval) -> ChunkResult<()> {
        let mut claims = self.claims.lock();
        check_claims(&claims, list, range)?;
        claims.push(Claim {
            holder,
            list,
            range,
        });
        Ok(())
    }

    fn release(&self, holder: u64) {
        self.claims.lock().retain(|claim| claim.holder != holder);
    }
}

/// Fails if an overlapping range of the same list is already claimed.
fn check_claims(claims: &[Claim], list: ListId, range: Interval) -> ChunkResult<()> {
    match claims
        .iter()
        .find(|claim| claim.list == list && claim.range.overlaps(&range))
    {
        Some(claim) => Err(ChunkError::Conflict {
            staged: claim.range,
            requested: range,
        }),
        None => Ok(()),
    }
}

/// Relocations of one manager waiting for a flush.
#[derive(Debug)]
struct Staging {
    team: Arc<Team>,
    holder: u64,
    entries: Vec<(NodeId, Relocation)>,
}

impl Staging {
    fn new(team: Arc<Team>) -> Self {
        let holder = team.staged_ranges().holder();
        Self {
            team,
            holder,
            entries: Vec::new(),
        }
    }

    /// Fails if an overlapping range of the same list is staged on this node.
    fn check_conflict(&self, list: ListId, range: Interval) -> ChunkResult<()> {
        self.team.staged_ranges().check(list, range)
    }

    fn push(&mut self, destination: NodeId, relocation: Relocation) -> ChunkResult<()> {
        self.team
            .staged_ranges()
            .claim(self.holder, relocation.list, relocation.range)?;
        debug!(destination, list = relocation.list, range = %relocation.range, "relocation staged");
        self.entries.push((destination, relocation));
        Ok(())
    }

    fn ranges(&self) -> Vec<(NodeId, Interval)> {
        self.entries
            .iter()
            .map(|(destination, relocation)| (*destination, relocation.range))
            .collect()
    }

    /// Empties the staging area, grouping relocations by destination.
    fn drain(&mut self) -> HashMap<NodeId, Vec<Relocation>> {
        self.team.staged_ranges().release(self.holder);
        let mut batches: HashMap<NodeId, Vec<Relocation>> = HashMap::new();
        for (destination, relocation) in self.entries.drain(..) {
            batches.entry(destination).or_default().push(relocation);
        }
        batches
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        self.team.staged_ranges().release(self.holder);
    }
}

/// Relocations committed by all members of a team at once.
///
/// Every member has to call [`sync()`](Self::sync), with or without anything
/// staged. When it returns on any node, every relocation staged by any member
/// has been applied at its destination.
#[derive(Debug)]
pub struct CollectiveMoveManager {
    team: Arc<Team>,
    staging: Staging,
}

impl CollectiveMoveManager {
    pub fn new(team: Arc<Team>) -> Self {
        Self {
            staging: Staging::new(Arc::clone(&team)),
            team,
        }
    }

    /// Ships staged relocations and applies incoming ones. Collective.
    ///
    /// Failures of any member are reported on all members. Data of failed
    /// relocations is not restored at the source.
    pub fn sync(&mut self) -> ChunkResult<()> {
        let mut outgoing = HashMap::new();
        for (destination, batch) in self.staging.drain() {
            debug!(destination, relocations = batch.len(), "batch ready for sync");
            outgoing.insert(destination, codec::encode(&batch)?);
        }

        let mut failures = Vec::new();
        for (from, batch) in self.team.exchange(outgoing)? {
            if batch.is_empty() {
                continue;
            }
            if let Err(err) = self.team.inbox().deliver(from, &batch) {
                failures.push(err);
            }
        }
        debug!(node = self.team.here(), failed = failures.len(), "sync applied");

        self.team.broadcast(|| ChunkError::aggregate(failures))
    }
}

impl MoveManager for CollectiveMoveManager {
    fn admit(&self, list: ListId, range: Interval, destination: NodeId) -> ChunkResult<()> {
        if !self.team.is_member(destination) {
            return Err(ChunkError::InvalidArgument(format!(
                "node {destination} is not a member of the team"
            )));
        }
        self.staging.check_conflict(list, range)
    }

    fn stage(&mut self, destination: NodeId, relocation: Relocation) -> ChunkResult<()> {
        self.admit(relocation.list, relocation.range, destination)?;
        self.staging.push(destination, relocation)
    }

    fn staged(&self) -> Vec<(NodeId, Interval)> {
        self.staging.ranges()
    }
}

/// Relocations shipped from this node to one bound destination.
///
/// The destination does not take part in the transfer: its inbox applies the
/// batch on arrival.
#[derive(Debug)]
pub struct OneSidedMoveManager {
    team: Arc<Team>,
    destination: NodeId,
    staging: Staging,
}

impl OneSidedMoveManager {
    /// Binds a manager to `destination`.
    pub fn new(team: Arc<Team>, destination: NodeId) -> ChunkResult<Self> {
        if !team.is_member(destination) {
            return Err(ChunkError::InvalidArgument(format!(
                "node {destination} is not a member of the team"
            )));
        }
        Ok(Self {
            staging: Staging::new(Arc::clone(&team)),
            team,
            destination,
        })
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    /// Ships staged relocations and blocks until the destination applied them.
    pub fn send(&mut self) -> ChunkResult<()> {
        self.async_send()?.wait()
    }

    /// Ships staged relocations without waiting for them to be applied.
    pub fn async_send(&mut self) -> ChunkResult<Delivery> {
        let batch: Vec<Relocation> = self
            .staging
            .drain()
            .into_values()
            .flatten()
            .collect();
        debug!(
            node = self.team.here(),
            destination = self.destination,
            relocations = batch.len(),
            "one-sided send"
        );
        self.team.post(self.destination, codec::encode(&batch)?)
    }
}

impl MoveManager for OneSidedMoveManager {
    fn admit(&self, list: ListId, range: Interval, destination: NodeId) -> ChunkResult<()> {
        if destination != self.destination {
            return Err(ChunkError::UnauthorizedDestination {
                bound: self.destination,
                requested: destination,
            });
        }
        self.staging.check_conflict(list, range)
    }

    fn stage(&mut self, destination: NodeId, relocation: Relocation) -> ChunkResult<()> {
        self.admit(relocation.list, relocation.range, destination)?;
        self.staging.push(destination, relocation)
    }

    fn staged(&self) -> Vec<(NodeId, Interval)> {
        self.staging.ranges()
    }
}
