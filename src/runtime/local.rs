use {
    super::{Delivery, Inbox, NodeId, Team, Transport},
    crate::{ChunkError, ChunkResult},
    crossbeam_channel::{Receiver, Sender, bounded, unbounded},
    parking_lot::Mutex,
    std::{
        collections::{HashMap, VecDeque},
        panic,
        sync::Arc,
        thread::{self, JoinHandle},
    },
    tracing::debug,
};

/// Payload on the collective lane.
struct Frame {
    from: NodeId,
    payload: Vec<u8>,
}

/// Request on the one-sided lane, served by the destination's service thread.
enum Post {
    Deliver {
        from: NodeId,
        payload: Vec<u8>,
        ack: Sender<ChunkResult<()>>,
    },
    Shutdown,
}

/// Transport between nodes living in the same process.
struct LocalTransport {
    here: NodeId,
    members: Vec<NodeId>,
    lanes: Vec<Sender<Frame>>,
    incoming: Receiver<Frame>,

    /// Frames that arrived ahead of the sender currently waited for.
    stash: Mutex<HashMap<NodeId, VecDeque<Vec<u8>>>>,

    posts: Vec<Sender<Post>>,
}

impl LocalTransport {
    fn lane<C>(lanes: &[Sender<C>], to: NodeId) -> ChunkResult<&Sender<C>> {
        lanes
            .get(to as usize)
            .ok_or_else(|| ChunkError::InvalidArgument(format!("unknown node {to}")))
    }
}

impl Transport for LocalTransport {
    fn here(&self) -> NodeId {
        self.here
    }

    fn members(&self) -> &[NodeId] {
        &self.members
    }

    fn send(&self, to: NodeId, payload: Vec<u8>) -> ChunkResult<()> {
        Self::lane(&self.lanes, to)?
            .send(Frame {
                from: self.here,
                payload,
            })
            .map_err(|_| ChunkError::Transport(format!("node {to} is gone")))
    }

    fn recv(&self, from: NodeId) -> ChunkResult<Vec<u8>> {
        let mut stash = self.stash.lock();
        if let Some(payload) = stash.get_mut(&from).and_then(VecDeque::pop_front) {
            return Ok(payload);
        }
        loop {
            let frame = self
                .incoming
                .recv()
                .map_err(|_| ChunkError::Transport("collective lane closed".into()))?;
            if frame.from == from {
                return Ok(frame.payload);
            }
            stash.entry(frame.from).or_default().push_back(frame.payload);
        }
    }

    fn post(&self, to: NodeId, payload: Vec<u8>) -> ChunkResult<Delivery> {
        let (ack, answer) = bounded(1);
        Self::lane(&self.posts, to)?
            .send(Post::Deliver {
                from: self.here,
                payload,
                ack,
            })
            .map_err(|_| ChunkError::Transport(format!("node {to} is gone")))?;
        Ok(Delivery::new(to, answer))
    }
}

/// A cluster of nodes simulated within one process.
///
/// Every node gets its own [`Team`] and a service thread which applies
/// one-sided relocations addressed to it. Dropping the cluster stops and
/// joins the service threads.
pub struct LocalCluster {
    teams: Vec<Arc<Team>>,
    services: Vec<(Sender<Post>, JoinHandle<()>)>,
}

impl LocalCluster {
    /// Creates a cluster of `nodes` nodes ranked `0..nodes`.
    pub fn new(nodes: usize) -> ChunkResult<Self> {
        let count = NodeId::try_from(nodes)
            .ok()
            .filter(|count| *count > 0)
            .ok_or_else(|| {
                ChunkError::InvalidArgument(format!("cannot build a cluster of {nodes} nodes"))
            })?;
        let members: Vec<NodeId> = (0..count).collect();

        let (lanes, incoming): (Vec<_>, Vec<_>) = members.iter().map(|_| unbounded()).unzip();
        let (posts, requests): (Vec<_>, Vec<_>) = members.iter().map(|_| unbounded()).unzip();

        let mut services = Vec::with_capacity(nodes);
        let mut teams = Vec::with_capacity(nodes);
        for ((&node, incoming), requests) in members.iter().zip(incoming).zip(requests) {
            let inbox = Arc::new(Inbox::new());
            let handle = spawn_service(node, Arc::clone(&inbox), requests)?;
            services.push((posts[node as usize].clone(), handle));

            let transport = LocalTransport {
                here: node,
                members: members.clone(),
                lanes: lanes.clone(),
                incoming,
                stash: Mutex::new(HashMap::new()),
                posts: posts.clone(),
            };
            teams.push(Arc::new(Team::new(transport, inbox)));
        }

        debug!(nodes, "local cluster started");
        Ok(Self { teams, services })
    }

    pub fn size(&self) -> usize {
        self.teams.len()
    }

    /// Context of the given node.
    pub fn team(&self, node: NodeId) -> Option<Arc<Team>> {
        self.teams.get(node as usize).cloned()
    }

    /// Runs `program` on every node, each on its own thread.
    ///
    /// Returns the results in rank order once all nodes are done. A panic on
    /// any node is propagated.
    pub fn run<R, F>(&self, program: F) -> Vec<R>
    where
        R: Send,
        F: Fn(Arc<Team>) -> R + Sync,
    {
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .teams
                .iter()
                .map(|team| {
                    let (team, program) = (Arc::clone(team), &program);
                    scope.spawn(move || program(team))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
                .collect()
        })
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        for (posts, _) in &self.services {
            let _ = posts.send(Post::Shutdown);
        }
        for (_, handle) in self.services.drain(..) {
            let _ = handle.join();
        }
        debug!("local cluster stopped");
    }
}

fn spawn_service(
    node: NodeId,
    inbox: Arc<Inbox>,
    requests: Receiver<Post>,
) -> ChunkResult<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("chunkspace-node-{node}"))
        .spawn(move || {
            for request in requests {
                match request {
                    Post::Deliver { from, payload, ack } => {
                        let outcome = inbox.deliver(from, &payload);
                        debug!(node, from, ok = outcome.is_ok(), "one-sided delivery");
                        // Sender may have stopped waiting.
                        let _ = ack.send(outcome);
                    }
                    Post::Shutdown => break,
                }
            }
        })
        .map_err(|e| ChunkError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use {super::*, crate::codec};

    #[test]
    fn collectives() {
        let cluster = LocalCluster::new(3).unwrap();
        let gathered = cluster.run(|team| {
            let here = team.here();
            let gathered: Vec<u32> = team
                .all_gather(&codec::encode(&(here * 10)).unwrap())
                .unwrap()
                .into_iter()
                .map(|(_, bytes)| codec::decode(&bytes).unwrap())
                .collect();

            // Node `n` ships `n` to everybody above it.
            let outgoing = team
                .members()
                .iter()
                .filter(|&&member| member > here)
                .map(|&member| (member, vec![here as u8]))
                .collect();
            let received: Vec<(NodeId, Vec<u8>)> = team.exchange(outgoing).unwrap();
            team.barrier().unwrap();
            (gathered, received)
        });

        for (node, (gathered, received)) in gathered.into_iter().enumerate() {
            assert_eq!(gathered, vec![0, 10, 20]);
            let expected: Vec<(NodeId, Vec<u8>)> = (0..3)
                .map(|from| {
                    let payload = if from < node as NodeId { vec![from as u8] } else { vec![] };
                    (from, payload)
                })
                .collect();
            assert_eq!(received, expected);
        }
    }

    #[test]
    fn broadcast_collects_failures_everywhere() {
        let cluster = LocalCluster::new(3).unwrap();
        let outcomes = cluster.run(|team| {
            let here = team.here();
            team.broadcast(|| {
                if here == 1 {
                    Err(ChunkError::IndexOutOfRange(i64::from(here)))
                } else {
                    Ok(here)
                }
            })
        });

        for outcome in outcomes {
            assert_eq!(
                outcome,
                Err(ChunkError::AggregatedTask(vec![ChunkError::IndexOutOfRange(1)]))
            );
        }
    }

    #[test]
    fn strangers_are_rejected() {
        let cluster = LocalCluster::new(2).unwrap();
        let team = cluster.team(0).unwrap();
        assert!(matches!(
            team.exchange([(7, vec![])].into_iter().collect()),
            Err(ChunkError::InvalidArgument(_))
        ));
        assert!(matches!(
            team.post(9, vec![]),
            Err(ChunkError::InvalidArgument(_))
        ));
        assert!(cluster.team(2).is_none());
        assert!(LocalCluster::new(0).is_err());
    }

    #[test]
    fn posts_to_unknown_lists_are_refused() {
        let cluster = LocalCluster::new(2).unwrap();
        let team = cluster.team(0).unwrap();
        let batch = codec::encode(&vec![crate::Relocation::new(
            42,
            crate::Interval::new(0, 1).unwrap(),
            vec![],
        )])
        .unwrap();
        let outcome = team.post(1, batch).unwrap().wait();
        assert!(matches!(outcome, Err(ChunkError::AggregatedTask(_))));
    }
}
