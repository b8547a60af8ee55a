//! The convergence driver.
//!
//! A [`NeighborLoop`] owns a payload and runs it over one rank's
//! particles. Every rank of the run calls [`run`](NeighborLoop::run) (or
//! [`run_once`](NeighborLoop::run_once)) with its own communicator and
//! oracle. Ranks stay in lockstep: every chunk of every pass ends in the
//! same exchanges and reductions on all ranks, whether or not a rank has
//! work left.
//!
//! One pass:
//!
//! ```text
//! repeat until every rank's worklist is done:
//!     LOCAL_PHASE     evaluate a chunk, roll back on export overflow
//!     EXCHANGE        counts, then queries to branch owners
//!     REMOTE_PHASE    evaluate imported queries
//!     EXCHANGE_BACK   results to the exporting ranks
//!     MERGE           assign local partials, accumulate returned ones
//! ```

use std::time::Instant;

use sphex_comm::{
    abort_run, all_reduce_sum, exchange, exchange_counts, AbortCode, CommError, Communicator,
    Transfer,
};
use sphex_core::{NeighborOracle, Particle, Payload, QueryRecord};

use crate::config::{ConfigError, EngineConfig};
use crate::diagnostics::describe;
use crate::evaluator::{Evaluator, Shipped};
use crate::ledger::{AllocError, BufferLedger};
use crate::merge::MergeTable;
use crate::metrics::{ConvergenceReport, PassMetrics};
use crate::scheduler::{chunk_capacity, per_record_bytes, Scheduler};
use crate::solver::BracketSolver;

const RECORDS: &str = "export_records";
const QUERIES: &str = "export_queries";
const RESULTS: &str = "import_results";

/// Escalate a failure inside a distributed pass to a run-wide abort.
trait OrAbort<T> {
    fn or_abort<C: Communicator + ?Sized>(self, comm: &C) -> T;
}

impl<T> OrAbort<T> for Result<T, CommError> {
    fn or_abort<C: Communicator + ?Sized>(self, comm: &C) -> T {
        match self {
            Ok(v) => v,
            // A disconnected peer has already exited, which in lockstep
            // only happens when it aborted.
            Err(e @ (CommError::PeerAborted { .. } | CommError::Disconnected { .. })) => {
                abort_run(comm, AbortCode::PeerAborted, e.to_string())
            }
            Err(e) => abort_run(comm, AbortCode::CommFailure, e.to_string()),
        }
    }
}

impl<T> OrAbort<T> for Result<T, AllocError> {
    fn or_abort<C: Communicator + ?Sized>(self, comm: &C) -> T {
        match self {
            Ok(v) => v,
            Err(e) => abort_run(comm, AbortCode::AllocationFailed, e.to_string()),
        }
    }
}

fn micros(since: Instant) -> u64 {
    since.elapsed().as_micros() as u64
}

/// Adaptive neighbour evaluation of one payload on one rank.
pub struct NeighborLoop<P: Payload> {
    config: EngineConfig,
    payload: P,
    solver: BracketSolver,
    threads: usize,
    capacity: usize,
    ledger: BufferLedger,
}

impl<P: Payload> NeighborLoop<P> {
    /// Validate `config` and size the export buffer for `payload`.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] from validation, or
    /// [`ConfigError::ExportBufferTooSmall`] if the budget cannot hold
    /// one record of this payload.
    pub fn new(config: EngineConfig, payload: P) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity =
            chunk_capacity::<Shipped<P::Query>, P::Partial>(config.export_buffer_bytes);
        if capacity == 0 {
            return Err(ConfigError::ExportBufferTooSmall {
                bytes: config.export_buffer_bytes,
                per_record: Self::per_record_bytes(),
            });
        }
        Ok(Self {
            solver: BracketSolver::from_config(&config),
            threads: config.resolved_threads(),
            ledger: BufferLedger::new(config.ledger_limit_bytes),
            capacity,
            config,
            payload,
        })
    }

    /// Bytes one export record of this payload costs against
    /// [`EngineConfig::export_buffer_bytes`].
    pub fn per_record_bytes() -> usize {
        per_record_bytes::<Shipped<P::Query>, P::Partial>()
    }

    /// The configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Export records per chunk.
    pub fn chunk_capacity(&self) -> usize {
        self.capacity
    }

    /// Worker threads per phase.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Tagged buffer accounting of past passes.
    pub fn ledger(&self) -> &BufferLedger {
        &self.ledger
    }

    /// Converge the radius of every particle the payload applies to.
    ///
    /// Applicable particles are reactivated with fresh brackets and
    /// their radius clamped into the configured limits, then passes run
    /// until no particle on any rank is active. Outputs of
    /// each particle are those of the pass in which it was accepted.
    ///
    /// Aborts the run (see [`abort_run`]) if particles remain active
    /// after `max_iterations` passes, after logging each of them.
    ///
    /// # Panics
    ///
    /// If `outputs.len() != particles.len()`.
    pub fn run<C, O>(
        &mut self,
        comm: &mut C,
        oracle: &O,
        particles: &mut [Particle],
        outputs: &mut [P::Output],
    ) -> ConvergenceReport
    where
        C: Communicator + ?Sized,
        O: NeighborOracle,
    {
        assert_eq!(
            particles.len(),
            outputs.len(),
            "one output slot per particle"
        );
        for p in particles.iter_mut() {
            if self.payload.applies_to(p) {
                p.reactivate();
                p.radius = self.config.limits.clamp(p.radius);
            }
        }

        let tags = self.payload.tags();
        let mut table = MergeTable::new(particles.len());
        let mut report = ConvergenceReport::default();
        loop {
            report.iterations += 1;
            let worklist: Vec<usize> = particles
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_active() && self.payload.applies_to(p))
                .map(|(i, _)| i)
                .collect();
            let mut metrics = self.pass(comm, oracle, particles, worklist.clone(), &mut table);

            let mut still_active = 0u64;
            for &i in &worklist {
                let finished = self.payload.finish(&particles[i], table.get(i));
                outputs[i] = finished.output;
                let verdict = self.solver.advance(&mut particles[i], &finished.observation);
                report.verdicts.record(verdict);
                if !verdict.is_final() {
                    still_active += 1;
                }
            }

            let t = Instant::now();
            let remaining =
                all_reduce_sum(comm, tags.result.control(), still_active).or_abort(comm);
            metrics.exchange_us += micros(t);
            log::debug!(
                "{} rank {} pass {}: {} evaluated, {} chunks, {} rollbacks, {} exported, {} imported, {} still active globally",
                self.payload.name(),
                comm.rank(),
                report.iterations,
                metrics.active,
                metrics.chunks,
                metrics.rollbacks,
                metrics.exported,
                metrics.imported,
                remaining
            );
            report.passes.push(metrics);

            if remaining == 0 {
                log::info!(
                    "{} rank {}: converged after {} iterations ({} converged, {} at floor, {} at ceiling, {} collapsed)",
                    self.payload.name(),
                    comm.rank(),
                    report.iterations,
                    report.verdicts.converged,
                    report.verdicts.pinned_floor,
                    report.verdicts.pinned_ceiling,
                    report.verdicts.collapsed
                );
                return report;
            }
            if report.iterations >= self.config.max_iterations {
                self.fail_convergence(comm, particles, remaining);
            }
        }
    }

    /// One fixed-radius pass over every particle the payload applies to,
    /// regardless of activity. The solver is not consulted.
    ///
    /// # Panics
    ///
    /// If `outputs.len() != particles.len()`.
    pub fn run_once<C, O>(
        &mut self,
        comm: &mut C,
        oracle: &O,
        particles: &[Particle],
        outputs: &mut [P::Output],
    ) -> PassMetrics
    where
        C: Communicator + ?Sized,
        O: NeighborOracle,
    {
        assert_eq!(
            particles.len(),
            outputs.len(),
            "one output slot per particle"
        );
        let worklist: Vec<usize> = particles
            .iter()
            .enumerate()
            .filter(|(_, p)| self.payload.applies_to(p))
            .map(|(i, _)| i)
            .collect();
        let mut table = MergeTable::new(particles.len());
        let metrics = self.pass(comm, oracle, particles, worklist.clone(), &mut table);
        for i in worklist {
            outputs[i] = self.payload.finish(&particles[i], table.get(i)).output;
        }
        metrics
    }

    /// Evaluate `worklist` completely, chunk by chunk, leaving merged
    /// partials in `table`.
    fn pass<C, O>(
        &mut self,
        comm: &mut C,
        oracle: &O,
        particles: &[Particle],
        worklist: Vec<usize>,
        table: &mut MergeTable<P::Partial>,
    ) -> PassMetrics
    where
        C: Communicator + ?Sized,
        O: NeighborOracle,
    {
        table.reset();
        let mut metrics = PassMetrics {
            active: worklist.len(),
            ..PassMetrics::default()
        };
        let tags = self.payload.tags();
        let size = comm.size();
        let evaluator = Evaluator::new(
            &self.payload,
            oracle,
            particles,
            self.config.neighbor_batch,
        );
        let mut scheduler = Scheduler::new(worklist, self.capacity, self.threads);
        let mut storage: Vec<QueryRecord> =
            self.ledger.alloc(RECORDS, self.capacity).or_abort(comm);

        loop {
            // LOCAL_PHASE
            let t = Instant::now();
            let chunk = match scheduler.run_chunk(storage, |w, start, buffer, threads| {
                evaluator.local_phase(w, start, buffer, threads)
            }) {
                Ok(chunk) => chunk,
                Err(e) => abort_run(
                    comm,
                    AbortCode::ExportBufferTooSmall,
                    format!("{}: {e}", self.payload.name()),
                ),
            };
            metrics.local_us += micros(t);
            metrics.chunks += 1;
            metrics.rollbacks += chunk.rollbacks;
            metrics.exported += chunk.records.len();
            table.merge_local(&chunk.finished);

            let mut send_counts = vec![0usize; size];
            for r in &chunk.records {
                send_counts[r.dest.index()] += 1;
            }
            let mut sources: Vec<Vec<usize>> = send_counts
                .iter()
                .map(|&n| Vec::with_capacity(n))
                .collect();
            let mut outgoing: Vec<Vec<Shipped<P::Query>>> = Vec::with_capacity(size);
            for &n in &send_counts {
                outgoing.push(self.ledger.alloc(QUERIES, n).or_abort(comm));
            }
            for r in &chunk.records {
                let p = &particles[r.source];
                let d = r.dest.index();
                outgoing[d].push(Shipped {
                    source: p.id,
                    center: p.pos,
                    radius: p.radius,
                    branches: r.branches.clone(),
                    query: self.payload.query(p),
                });
                sources[d].push(r.source);
            }
            storage = chunk.records;

            // EXCHANGE
            let t = Instant::now();
            let recv_counts =
                exchange_counts(comm, tags.query.control(), &send_counts).or_abort(comm);
            let imported = exchange(comm, tags.query, outgoing, &recv_counts).or_abort(comm);
            self.ledger.release(QUERIES);
            metrics.exchange_us += micros(t);
            metrics.imported += imported.len();

            // REMOTE_PHASE
            let t = Instant::now();
            let mut results: Vec<P::Partial> =
                self.ledger.alloc(RESULTS, imported.len()).or_abort(comm);
            if let Err(e) = evaluator.remote_phase(&imported.data, self.threads, &mut results) {
                abort_run(
                    comm,
                    AbortCode::OracleContract,
                    format!("{}: imported query tried to export: {e}", self.payload.name()),
                );
            }
            metrics.remote_us += micros(t);

            // EXCHANGE_BACK
            let t = Instant::now();
            let back = Transfer::split(results, &imported.counts);
            let returned = exchange(comm, tags.result, back, &send_counts).or_abort(comm);
            self.ledger.release(RESULTS);

            // MERGE
            table.merge_returned(&sources, &returned);

            let remaining =
                all_reduce_sum(comm, tags.result.control(), scheduler.remaining() as u64)
                    .or_abort(comm);
            metrics.exchange_us += micros(t);
            log::debug!(
                "{} rank {} chunk {}: {} of {} finished, {} exported, {} imported, {} remaining globally",
                self.payload.name(),
                comm.rank(),
                metrics.chunks,
                scheduler.position(),
                scheduler.worklist().len(),
                sources.iter().map(Vec::len).sum::<usize>(),
                imported.len(),
                remaining
            );
            if remaining == 0 {
                break;
            }
        }

        self.ledger.free(RECORDS, storage);
        metrics.peak_buffer_bytes = self.ledger.peak();
        metrics
    }

    fn fail_convergence<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        particles: &[Particle],
        remaining: u64,
    ) -> ! {
        let name = self.payload.name();
        let mut first = None;
        for (i, p) in particles.iter().enumerate() {
            if p.is_active() && self.payload.applies_to(p) {
                let line = describe(p, i);
                log::error!("{name} rank {}: unconverged {line}", comm.rank());
                first.get_or_insert(line);
            }
        }
        let mut message = format!(
            "{name}: {remaining} particles still active after {} iterations",
            self.config.max_iterations
        );
        if let Some(line) = first {
            message.push_str("; first local: ");
            message.push_str(&line);
        }
        abort_run(comm, AbortCode::ConvergenceFailure, message)
    }
}
