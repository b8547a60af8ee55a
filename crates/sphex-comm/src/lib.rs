//! Exchange protocol between ranks.
//!
//! Ranks never share particle memory; everything crossing a rank
//! boundary travels as a tagged message through a [`Communicator`].
//!
//! - [`exchange`]: all-to-all count negotiation, prefix-sum offsets and
//!   the pairwise hypercube transfer used in both directions of a pass.
//! - [`reduce`]: global sums and maxima.
//! - [`abort`]: the run-wide fatal abort entry point.
//! - [`local`]: [`LocalCluster`], one rank per OS thread connected by
//!   crossbeam channels.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod abort;
pub mod communicator;
pub mod error;
pub mod exchange;
pub mod local;
pub mod reduce;

pub use abort::{abort_run, AbortCode, RunAborted};
pub use communicator::{CommExt, Communicator};
pub use error::{ClusterError, CommError};
pub use exchange::{exchange, exchange_counts, hypercube_partners, offsets, Transfer};
pub use local::{ChannelComm, LocalCluster};
pub use reduce::{all_reduce, all_reduce_max, all_reduce_sum, barrier};
