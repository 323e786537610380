//! Verification Harness
//!
//! Drives concurrent increments through a [`CounterService`], waits for the
//! system to go quiet, and checks the stored count against the reference
//! count.
//!
//! ## Run Phases
//! 1. Optionally reset the counter and record the baseline
//! 2. `concurrency` workers claim tickets until `requests` have been issued;
//!    a sampler thread reads the counter every `sample_interval` if asked
//! 3. Poll until nothing is in flight and two consecutive snapshots agree,
//!    or until the quiescence timeout
//! 4. Compare both counts with baseline + issued requests, so a failed
//!    increment shows up as a lost update

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::coordinator::WriteStrategy;
use crate::error::{Result, TallyError};
use crate::service::{CounterService, CounterSnapshot};

/// Which façade operation the workers call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPath {
    /// `increment`, through the configured strategy
    Increment,
    /// `batch_increment`
    BatchIncrement,
}

/// Shape of one load run
#[derive(Debug, Clone, Copy)]
pub struct LoadPlan {
    /// Total increments to issue
    pub requests: u64,
    /// Worker threads issuing them
    pub concurrency: usize,
    /// Read the counter this often while load runs; `None` disables sampling
    pub sample_interval: Option<Duration>,
    pub path: LoadPath,
    /// Reset the counter before issuing load
    pub reset_first: bool,
}

impl LoadPlan {
    pub fn new(requests: u64, concurrency: usize) -> Self {
        Self {
            requests,
            concurrency,
            sample_interval: None,
            path: LoadPath::Increment,
            reset_first: true,
        }
    }

    pub fn with_sampling(mut self, interval: Duration) -> Self {
        self.sample_interval = Some(interval);
        self
    }

    pub fn with_path(mut self, path: LoadPath) -> Self {
        self.path = path;
        self
    }

    /// Keep the current counter value and verify relative to it
    pub fn without_reset(mut self) -> Self {
        self.reset_first = false;
        self
    }
}

/// Outcome of the post-load comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Stored count and reference count both equal the expected total
    Consistent,
    Diverged {
        expected: u64,
        stored: u64,
        oracle: u64,
    },
    /// The system did not settle before the quiescence timeout
    Unresolved { last: CounterSnapshot },
}

/// Result of waiting for the system to settle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quiescence {
    Settled(CounterSnapshot),
    TimedOut(CounterSnapshot),
}

/// Everything a load run observed
#[derive(Debug, Clone)]
pub struct HarnessReport {
    pub strategy: WriteStrategy,
    pub plan: LoadPlan,
    /// Counter value the run started from
    pub baseline: u64,
    /// Increments acknowledged by the service
    pub acknowledged: u64,
    /// Increments that returned an error
    pub failures: u64,
    /// Reads taken by the sampler
    pub samples: u64,
    /// Time spent issuing load (excludes quiescence polling)
    pub elapsed: Duration,
    pub verdict: Verdict,
}

impl HarnessReport {
    /// Total the counter should hold after the run: one per issued request
    pub fn expected(&self) -> u64 {
        self.baseline.wrapping_add(self.plan.requests)
    }

    /// Acknowledged increments per second of load
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.acknowledged as f64 / secs
        } else {
            0.0
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.verdict == Verdict::Consistent
    }

    /// `Ok` for a consistent run, `DivergenceDetected` otherwise
    pub fn ensure_consistent(&self) -> Result<()> {
        match self.verdict {
            Verdict::Consistent => Ok(()),
            Verdict::Diverged {
                expected,
                stored,
                oracle,
            } => Err(TallyError::DivergenceDetected {
                expected,
                stored,
                oracle,
            }),
            Verdict::Unresolved { last } => Err(TallyError::DivergenceDetected {
                expected: self.expected(),
                stored: last.stored,
                oracle: last.oracle,
            }),
        }
    }
}

impl fmt::Display for HarnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "strategy={} requests={} concurrency={}",
            self.strategy, self.plan.requests, self.plan.concurrency
        )?;
        writeln!(
            f,
            "acknowledged={} failures={} samples={} elapsed={:.3}s throughput={:.0}/s",
            self.acknowledged,
            self.failures,
            self.samples,
            self.elapsed.as_secs_f64(),
            self.throughput()
        )?;
        match self.verdict {
            Verdict::Consistent => write!(f, "verdict=consistent total={}", self.expected()),
            Verdict::Diverged {
                expected,
                stored,
                oracle,
            } => write!(
                f,
                "verdict=diverged expected={} stored={} oracle={}",
                expected, stored, oracle
            ),
            Verdict::Unresolved { last } => write!(
                f,
                "verdict=unresolved stored={} oracle={}",
                last.stored, last.oracle
            ),
        }
    }
}

/// Load driver bound to one service
pub struct Harness {
    service: Arc<CounterService>,
    quiescence_timeout: Duration,
    poll_interval: Duration,
}

impl Harness {
    pub fn new(service: Arc<CounterService>, config: &Config) -> Self {
        Self {
            service,
            quiescence_timeout: config.quiescence_timeout,
            poll_interval: config.poll_interval,
        }
    }

    pub fn service(&self) -> &Arc<CounterService> {
        &self.service
    }

    /// Issue the plan's load and verify the result
    pub fn run(&self, plan: LoadPlan) -> Result<HarnessReport> {
        let start_snapshot = if plan.reset_first {
            self.service.reset()?
        } else {
            let snapshot = self.service.get()?;
            if !snapshot.is_consistent() {
                tracing::warn!(
                    stored = snapshot.stored,
                    oracle = snapshot.oracle,
                    "Starting from an inconsistent counter"
                );
            }
            snapshot
        };
        let baseline = start_snapshot.stored;

        tracing::info!(
            strategy = %self.service.strategy(),
            requests = plan.requests,
            concurrency = plan.concurrency,
            baseline,
            "Starting load"
        );

        let next_ticket = AtomicU64::new(0);
        let acknowledged = AtomicU64::new(0);
        let failures = AtomicU64::new(0);
        let samples = AtomicU64::new(0);
        let load_done = AtomicBool::new(false);

        let service = self.service.as_ref();
        let (next_ticket, acknowledged_ref, failures_ref, samples_ref, load_done_ref) =
            (&next_ticket, &acknowledged, &failures, &samples, &load_done);

        let start = Instant::now();
        thread::scope(|scope| {
            if let Some(interval) = plan.sample_interval {
                scope.spawn(move || {
                    while !load_done_ref.load(Ordering::Acquire) {
                        match service.get() {
                            Ok(snapshot) => {
                                samples_ref.fetch_add(1, Ordering::Relaxed);
                                tracing::trace!(
                                    stored = snapshot.stored,
                                    oracle = snapshot.oracle,
                                    "Sample"
                                );
                            }
                            Err(e) => tracing::warn!(error = %e, "Sample read failed"),
                        }
                        thread::sleep(interval);
                    }
                });
            }

            let workers: Vec<_> = (0..plan.concurrency.max(1))
                .map(|_| {
                    scope.spawn(move || {
                        while next_ticket.fetch_add(1, Ordering::Relaxed) < plan.requests {
                            let result = match plan.path {
                                LoadPath::Increment => service.increment(),
                                LoadPath::BatchIncrement => service.batch_increment(),
                            };
                            match result {
                                Ok(()) => {
                                    acknowledged_ref.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(e) => {
                                    failures_ref.fetch_add(1, Ordering::Relaxed);
                                    tracing::debug!(error = %e, "Increment failed");
                                }
                            }
                        }
                    })
                })
                .collect();

            for worker in workers {
                if worker.join().is_err() {
                    tracing::error!("Load worker panicked");
                }
            }
            load_done_ref.store(true, Ordering::Release);
        });
        let elapsed = start.elapsed();

        let acknowledged = acknowledged.into_inner();
        let failures = failures.into_inner();
        let expected = baseline.wrapping_add(plan.requests);

        // Every issued request must land; a failed increment is a lost update
        let verdict = match self.await_quiescence()? {
            Quiescence::Settled(snapshot) => {
                let oracle_expected = start_snapshot.oracle.wrapping_add(plan.requests);
                if snapshot.stored == expected && snapshot.oracle == oracle_expected {
                    Verdict::Consistent
                } else {
                    Verdict::Diverged {
                        expected,
                        stored: snapshot.stored,
                        oracle: snapshot.oracle,
                    }
                }
            }
            Quiescence::TimedOut(last) => Verdict::Unresolved { last },
        };

        let report = HarnessReport {
            strategy: self.service.strategy(),
            plan,
            baseline,
            acknowledged,
            failures,
            samples: samples.into_inner(),
            elapsed,
            verdict,
        };

        match report.verdict {
            Verdict::Consistent => tracing::info!(
                total = expected,
                throughput = report.throughput() as u64,
                "Load verified"
            ),
            Verdict::Diverged { stored, oracle, .. } => tracing::warn!(
                expected,
                stored,
                oracle,
                failures = report.failures,
                lost = expected.saturating_sub(stored),
                "Counter diverged"
            ),
            Verdict::Unresolved { last } => tracing::warn!(
                stored = last.stored,
                oracle = last.oracle,
                timeout_ms = self.quiescence_timeout.as_millis() as u64,
                "Counter did not settle"
            ),
        }

        Ok(report)
    }

    /// Poll until nothing is in flight and two consecutive snapshots agree
    pub fn await_quiescence(&self) -> Result<Quiescence> {
        let deadline = Instant::now() + self.quiescence_timeout;
        let mut previous: Option<CounterSnapshot> = None;

        loop {
            let in_flight = self.service.in_flight();
            let snapshot = self.service.get()?;

            if in_flight == 0 && previous == Some(snapshot) {
                return Ok(Quiescence::Settled(snapshot));
            }
            previous = Some(snapshot);

            if Instant::now() >= deadline {
                return Ok(Quiescence::TimedOut(snapshot));
            }
            thread::sleep(self.poll_interval);
        }
    }
}
