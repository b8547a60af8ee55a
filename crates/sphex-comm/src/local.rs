//! In-process cluster: one rank per OS thread.
//!
//! Every rank owns an inbox (an unbounded crossbeam channel) and a
//! sender to every inbox, its own included. Unbounded inboxes make sends
//! non-blocking, so a pairwise exchange is just "send, then receive".

use std::any::Any;
use std::cell::Cell;
use std::collections::VecDeque;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use sphex_core::{MessageTag, Rank};

use crate::abort::{AbortCode, RunAborted};
use crate::communicator::Communicator;
use crate::error::{ClusterError, CommError};

enum Body {
    Data(Box<dyn Any + Send>),
    Abort { code: AbortCode, message: String },
}

struct Envelope {
    source: Rank,
    tag: MessageTag,
    body: Body,
}

fn send_abort(peers: &[Sender<Envelope>], from: Rank, code: AbortCode, message: &str) {
    for (r, peer) in peers.iter().enumerate() {
        if r == from.index() {
            continue;
        }
        // A peer that already exited has nothing left to unblock.
        let _ = peer.send(Envelope {
            source: from,
            tag: MessageTag(MessageTag::CONTROL_BIT),
            body: Body::Abort {
                code,
                message: message.to_owned(),
            },
        });
    }
}

/// A rank's endpoint in a [`LocalCluster`].
///
/// Dropping an endpoint while its thread unwinds from a panic that did
/// not go through [`abort_run`](crate::abort_run) broadcasts an abort,
/// so no peer stays blocked on a dead rank.
pub struct ChannelComm {
    rank: Rank,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    stash: VecDeque<Envelope>,
    aborted: Cell<bool>,
}

impl ChannelComm {
    fn check(&self, rank: Rank) -> Result<(), CommError> {
        if rank.index() < self.peers.len() {
            Ok(())
        } else {
            Err(CommError::InvalidRank {
                rank,
                size: self.peers.len(),
            })
        }
    }

    /// Messages received but not yet matched.
    pub fn pending(&self) -> usize {
        self.stash.len()
    }
}

impl Communicator for ChannelComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send_any(
        &self,
        dest: Rank,
        tag: MessageTag,
        body: Box<dyn Any + Send>,
    ) -> Result<(), CommError> {
        self.check(dest)?;
        self.peers[dest.index()]
            .send(Envelope {
                source: self.rank,
                tag,
                body: Body::Data(body),
            })
            .map_err(|_| CommError::Disconnected { rank: dest })
    }

    fn recv_any(&mut self, source: Rank, tag: MessageTag) -> Result<Box<dyn Any + Send>, CommError> {
        self.check(source)?;
        if let Some(pos) = self
            .stash
            .iter()
            .position(|e| e.source == source && e.tag == tag)
        {
            if let Some(Envelope {
                body: Body::Data(body),
                ..
            }) = self.stash.remove(pos)
            {
                return Ok(body);
            }
        }
        loop {
            let env = self
                .inbox
                .recv()
                .map_err(|_| CommError::Disconnected { rank: source })?;
            match env.body {
                Body::Abort { code, message } => {
                    return Err(CommError::PeerAborted {
                        rank: env.source,
                        code,
                        message,
                    })
                }
                Body::Data(body) if env.source == source && env.tag == tag => return Ok(body),
                body => self.stash.push_back(Envelope {
                    source: env.source,
                    tag: env.tag,
                    body,
                }),
            }
        }
    }

    fn broadcast_abort(&self, code: AbortCode, message: &str) {
        if self.aborted.replace(true) {
            return;
        }
        send_abort(&self.peers, self.rank, code, message);
    }
}

impl Drop for ChannelComm {
    fn drop(&mut self) {
        if thread::panicking() && !self.aborted.get() {
            let message = format!("rank {} panicked", self.rank);
            self.broadcast_abort(AbortCode::CommFailure, &message);
        }
    }
}

/// A fixed number of ranks run as scoped threads.
#[derive(Clone, Copy, Debug)]
pub struct LocalCluster {
    size: usize,
}

impl LocalCluster {
    /// A cluster of `size` ranks.
    ///
    /// # Errors
    ///
    /// [`ClusterError::EmptyCluster`] if `size == 0`.
    pub fn new(size: usize) -> Result<Self, ClusterError> {
        if size == 0 {
            return Err(ClusterError::EmptyCluster);
        }
        Ok(Self { size })
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Connected endpoints, indexed by rank.
    pub fn endpoints(&self) -> Vec<ChannelComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..self.size)
            .map(|_| crossbeam_channel::unbounded::<Envelope>())
            .unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(r, inbox)| ChannelComm {
                rank: Rank(r as u32),
                peers: senders.clone(),
                inbox,
                stash: VecDeque::new(),
                aborted: Cell::new(false),
            })
            .collect()
    }

    /// Run `f` on every rank and collect the per-rank results in rank
    /// order.
    ///
    /// # Errors
    ///
    /// If any rank aborted or panicked. When several ranks failed, the
    /// rank that started the abort is reported rather than the peers
    /// that followed it.
    pub fn run<F, R>(&self, f: F) -> Result<Vec<R>, ClusterError>
    where
        F: Fn(ChannelComm) -> R + Sync,
        R: Send,
    {
        let comms = self.endpoints();
        let senders = comms[0].peers.clone();
        let f = &f;

        let outcomes: Vec<Result<R, ClusterError>> = thread::scope(|s| {
            let mut handles = Vec::with_capacity(self.size);
            let mut failures = Vec::new();
            for comm in comms {
                let rank = comm.rank;
                let spawned = thread::Builder::new()
                    .name(format!("sphex-rank-{rank}"))
                    .spawn_scoped(s, move || f(comm));
                match spawned {
                    Ok(h) => handles.push((rank, h)),
                    Err(e) => {
                        let reason = e.to_string();
                        send_abort(&senders, rank, AbortCode::CommFailure, &reason);
                        failures.push(Err(ClusterError::Spawn { rank, reason }));
                    }
                }
            }
            let mut outcomes: Vec<_> = handles
                .into_iter()
                .map(|(rank, h)| h.join().map_err(|payload| unwound(rank, payload)))
                .collect();
            outcomes.extend(failures);
            outcomes
        });

        let mut results = Vec::with_capacity(self.size);
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(r) => results.push(r),
                Err(e) => errors.push(e),
            }
        }
        match pick_root_cause(errors) {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}

fn unwound(rank: Rank, payload: Box<dyn Any + Send>) -> ClusterError {
    let payload = match payload.downcast::<RunAborted>() {
        Ok(a) => {
            return ClusterError::Aborted {
                rank: a.rank,
                code: a.code,
                message: a.message,
            }
        }
        Err(p) => p,
    };
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    };
    ClusterError::Panicked { rank, message }
}

fn pick_root_cause(errors: Vec<ClusterError>) -> Option<ClusterError> {
    let rank_of = |e: &ClusterError| -> u8 {
        match e {
            ClusterError::Spawn { .. } => 0,
            ClusterError::Aborted { code, .. } if *code != AbortCode::PeerAborted => 1,
            ClusterError::Panicked { .. } => 2,
            _ => 3,
        }
    };
    errors.into_iter().min_by_key(rank_of)
}
