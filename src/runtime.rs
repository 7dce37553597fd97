//! Cross-node plumbing used by distributed lists.
//!
//! Nodes follow the SPMD model: every member of a [`Team`] runs the same
//! program and reaches the same collective calls in the same order. Actions
//! never leave a node; what travels are payloads and outcomes.

mod local;

use {
    super::{ChunkError, ChunkResult, Relocation, codec, relocation::StagedRanges},
    auto_impl::auto_impl,
    crossbeam_channel::{Receiver, TryRecvError},
    parking_lot::RwLock,
    rapidhash::RapidBuildHasher,
    std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
    },
    tracing::warn,
};

pub use local::LocalCluster;

/// Rank of a node within its team.
pub type NodeId = u32;

/// Identifier of a distributed list, equal on every node of a team.
pub type ListId = u64;

/// Message passing between the members of a team.
///
/// Two lanes are provided. The collective lane is ordered per pair of nodes
/// and is only used from calls every member makes. The one-sided lane hands a
/// payload to the destination's [`Inbox`] without the destination taking part
/// in the call.
#[auto_impl(&, Box, Arc)]
pub trait Transport: Send + Sync {
    /// Rank of the local node.
    fn here(&self) -> NodeId;

    /// Ranks of all members, in ascending order.
    fn members(&self) -> &[NodeId];

    /// Sends a payload on the collective lane.
    fn send(&self, to: NodeId, payload: Vec<u8>) -> ChunkResult<()>;

    /// Blocks until the next collective-lane payload from `from` arrives.
    fn recv(&self, from: NodeId) -> ChunkResult<Vec<u8>>;

    /// Posts a relocation batch to be applied by the destination's inbox.
    fn post(&self, to: NodeId, payload: Vec<u8>) -> ChunkResult<Delivery>;
}

/// Handle to a one-sided transfer.
#[derive(Debug)]
#[must_use = "the outcome of a transfer is only known by waiting on it"]
pub struct Delivery {
    destination: NodeId,
    ack: Receiver<ChunkResult<()>>,
}

impl Delivery {
    /// Wraps the channel the destination acknowledges on.
    pub fn new(destination: NodeId, ack: Receiver<ChunkResult<()>>) -> Self {
        Self { destination, ack }
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    /// Blocks until the destination applied the payload.
    pub fn wait(self) -> ChunkResult<()> {
        self.ack.recv().map_err(|_| self.dropped())?
    }

    /// Returns the outcome if the destination already answered.
    ///
    /// The outcome is handed out once; afterwards the delivery reports the
    /// channel as closed.
    pub fn try_wait(&self) -> Option<ChunkResult<()>> {
        match self.ack.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(self.dropped())),
        }
    }

    fn dropped(&self) -> ChunkError {
        ChunkError::Transport(format!(
            "node {} dropped the delivery without answering",
            self.destination
        ))
    }
}

type Handler = Arc<dyn Fn(NodeId, Relocation) -> ChunkResult<()> + Send + Sync>;

/// Per-node registry of distributed lists able to accept relocations.
#[derive(Default)]
pub struct Inbox {
    handlers: RwLock<HashMap<ListId, Handler, RapidBuildHasher>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, list: ListId, handler: Handler) {
        self.handlers.write().insert(list, handler);
    }

    pub(crate) fn unregister(&self, list: ListId) {
        self.handlers.write().remove(&list);
    }

    /// Applies an encoded batch of relocations sent by `from`.
    ///
    /// Every relocation of the batch is attempted, failures are aggregated.
    pub fn deliver(&self, from: NodeId, batch: &[u8]) -> ChunkResult<()> {
        let relocations: Vec<Relocation> = codec::decode(batch)?;
        let mut failures = Vec::new();
        for relocation in relocations {
            let (list, range) = (relocation.list(), relocation.range());
            // Cloned out, so that handlers run without the registry lock.
            let handler = self.handlers.read().get(&list).cloned();
            let outcome = match handler {
                Some(handler) => handler(from, relocation),
                None => Err(ChunkError::InvalidArgument(format!(
                    "no list {list} registered for incoming range {range}"
                ))),
            };
            if let Err(err) = outcome {
                warn!(from, list, %range, %err, "relocation rejected");
                failures.push(err);
            }
        }
        ChunkError::aggregate(failures)
    }
}

/// Execution context of one node within a group of nodes.
///
/// Passed explicitly to every distributed structure; nothing is kept in
/// globals.
pub struct Team {
    transport: Box<dyn Transport>,
    inbox: Arc<Inbox>,
    next_list: AtomicU64,
    staged: StagedRanges,
}

impl Team {
    /// Creates the context for the node the transport is bound to.
    ///
    /// The inbox has to be the one the transport feeds one-sided posts into.
    pub fn new<T: Transport + 'static>(transport: T, inbox: Arc<Inbox>) -> Self {
        Self {
            transport: Box::new(transport),
            inbox,
            next_list: AtomicU64::new(0),
            staged: StagedRanges::default(),
        }
    }

    pub fn here(&self) -> NodeId {
        self.transport.here()
    }

    pub fn members(&self) -> &[NodeId] {
        self.transport.members()
    }

    pub fn size(&self) -> usize {
        self.members().len()
    }

    pub fn is_member(&self, node: NodeId) -> bool {
        self.members().binary_search(&node).is_ok()
    }

    pub(crate) fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Ranges staged for relocation by the managers of this node.
    pub(crate) fn staged_ranges(&self) -> &StagedRanges {
        &self.staged
    }

    /// Hands out list identifiers in creation order.
    ///
    /// Lists are created collectively, so every node arrives at the same
    /// identifier for the same list.
    pub(crate) fn allocate_list_id(&self) -> ListId {
        self.next_list.fetch_add(1, Ordering::Relaxed)
    }

    /// Personalised all-to-all exchange. Collective.
    ///
    /// Every member receives its own payload from `outgoing` (or an empty one)
    /// and the payloads addressed to this node are returned in member order.
    pub fn exchange(
        &self,
        mut outgoing: HashMap<NodeId, Vec<u8>>,
    ) -> ChunkResult<Vec<(NodeId, Vec<u8>)>> {
        if let Some(stranger) = outgoing.keys().find(|node| !self.is_member(**node)) {
            return Err(ChunkError::InvalidArgument(format!(
                "node {stranger} is not a member of the team"
            )));
        }

        for &member in self.members() {
            let payload = outgoing.remove(&member).unwrap_or_default();
            self.transport.send(member, payload)?;
        }
        self.members()
            .iter()
            .map(|&member| Ok((member, self.transport.recv(member)?)))
            .collect()
    }

    /// Every member contributes one payload, every member gets all of them.
    /// Collective.
    pub fn all_gather(&self, payload: &[u8]) -> ChunkResult<Vec<(NodeId, Vec<u8>)>> {
        let outgoing = self
            .members()
            .iter()
            .map(|&member| (member, payload.to_vec()))
            .collect();
        self.exchange(outgoing)
    }

    /// Returns once every member reached the barrier. Collective.
    pub fn barrier(&self) -> ChunkResult<()> {
        self.all_gather(&[]).map(|_| ())
    }

    /// Runs `action` on every member and returns once all of them finished.
    /// Collective.
    ///
    /// Each member runs its own copy of the action against its own state.
    /// Failures of all members are collected and returned on every member as
    /// [`ChunkError::AggregatedTask`]; on success the local result is returned.
    pub fn broadcast<R, F>(&self, action: F) -> ChunkResult<R>
    where
        F: FnOnce() -> ChunkResult<R>,
    {
        let outcome = action();
        let report: Result<(), ChunkError> = outcome.as_ref().map(|_| ()).map_err(|err| err.clone());
        let mut failures = Vec::new();
        for (_, bytes) in self.all_gather(&codec::encode(&report)?)? {
            if let Err(err) = codec::decode::<Result<(), ChunkError>>(&bytes)? {
                failures.push(err);
            }
        }
        ChunkError::aggregate(failures)?;
        outcome
    }

    /// One-sided transfer of an encoded relocation batch.
    pub fn post(&self, to: NodeId, payload: Vec<u8>) -> ChunkResult<Delivery> {
        if !self.is_member(to) {
            return Err(ChunkError::InvalidArgument(format!(
                "node {to} is not a member of the team"
            )));
        }
        self.transport.post(to, payload)
    }
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Team")
            .field("here", &self.here())
            .field("members", &self.members())
            .finish_non_exhaustive()
    }
}
