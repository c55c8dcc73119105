//! Phase fan-out and the ultimatum admission scheduler.

use crate::error::{EngineError, Phase, Result};
use crate::ids::AgentId;
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;
use tracing::{debug, error};

/// One decision to run in a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub agent: AgentId,
    pub slow: bool,
}

impl Job {
    pub fn new(agent: AgentId, slow: bool) -> Self {
        Self { agent, slow }
    }
}

/// Runs one phase's decisions and waits for all of them.
///
/// Slow participants each get a scoped worker thread; fast ones run on the
/// calling thread while the workers are busy. `run` returns only after every
/// job has finished, so the end of a phase is a full barrier. Results come
/// back in job order. If any job failed or panicked, the first failure in
/// job order is returned and the rest are logged.
#[derive(Debug, Clone, Copy)]
pub struct PhaseRunner {
    threaded: bool,
}

impl PhaseRunner {
    pub fn new(threaded: bool) -> Self {
        Self { threaded }
    }

    pub fn is_threaded(&self) -> bool {
        self.threaded
    }

    pub fn run<T, F>(&self, phase: Phase, jobs: &[Job], work: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(AgentId) -> Result<T> + Sync,
    {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let mut slots: Vec<Option<Result<T>>> = (0..jobs.len()).map(|_| None).collect();
        let threaded = self.threaded;

        let scoped = crossbeam::scope(|s| {
            let work = &work;
            let mut handles = Vec::new();
            for (i, job) in jobs.iter().enumerate() {
                if threaded && job.slow {
                    let agent = job.agent;
                    handles.push((i, agent, s.spawn(move |_| work(agent))));
                }
            }
            if !handles.is_empty() {
                debug!("{}: {} worker threads started", phase, handles.len());
            }

            for (i, job) in jobs.iter().enumerate() {
                if threaded && job.slow {
                    continue;
                }
                let outcome = catch_unwind(AssertUnwindSafe(|| work(job.agent))).unwrap_or(Err(
                    EngineError::WorkerPanicked {
                        agent: job.agent,
                        phase,
                    },
                ));
                slots[i] = Some(outcome);
            }

            for (i, agent, handle) in handles {
                let outcome = handle
                    .join()
                    .unwrap_or(Err(EngineError::WorkerPanicked { agent, phase }));
                slots[i] = Some(outcome);
            }
        });
        if scoped.is_err() {
            return Err(EngineError::WorkerPanicked {
                agent: jobs[0].agent,
                phase,
            });
        }

        let mut results = Vec::with_capacity(jobs.len());
        let mut first_error = None;
        for (slot, job) in slots.into_iter().zip(jobs) {
            match slot {
                Some(Ok(value)) => results.push(value),
                Some(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        error!("{}: participant {} also failed: {}", phase, job.agent, e);
                    }
                }
                None => {
                    if first_error.is_none() {
                        first_error = Some(EngineError::WorkerPanicked { agent: job.agent, phase });
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}

/// Admission control for pairwise sessions: at most one session per
/// participant at a time.
///
/// Busy flags live behind one mutex; finishing a session frees both ends and
/// wakes the scheduler.
#[derive(Debug)]
pub struct PairScheduler {
    busy: Mutex<Vec<bool>>,
    freed: Condvar,
    retry: Duration,
}

impl PairScheduler {
    pub fn new(participants: usize, retry: Duration) -> Self {
        Self {
            busy: Mutex::new(vec![false; participants]),
            freed: Condvar::new(),
            retry,
        }
    }

    /// Marks both ends busy if they are both free.
    pub fn try_claim(&self, a: AgentId, b: AgentId) -> bool {
        let mut busy = self.busy.lock();
        if busy[a.index()] || busy[b.index()] {
            return false;
        }
        busy[a.index()] = true;
        busy[b.index()] = true;
        true
    }

    pub fn release(&self, a: AgentId, b: AgentId) {
        let mut busy = self.busy.lock();
        busy[a.index()] = false;
        busy[b.index()] = false;
        self.freed.notify_all();
    }

    /// Blocks until some session finishes or the retry interval passes.
    pub fn wait(&self) {
        let mut busy = self.busy.lock();
        if busy.iter().any(|b| *b) {
            self.freed.wait_for(&mut busy, self.retry);
        }
    }

    pub fn busy_count(&self) -> usize {
        self.busy.lock().iter().filter(|b| **b).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn jobs(slow: &[bool]) -> Vec<Job> {
        slow.iter()
            .enumerate()
            .map(|(i, s)| Job::new(AgentId::new(i as u32), *s))
            .collect()
    }

    #[test]
    fn results_come_back_in_job_order() {
        let runner = PhaseRunner::new(true);
        let out = runner
            .run(Phase::Propose, &jobs(&[true, false, true, false]), |a| Ok(a.raw() * 10))
            .unwrap();
        assert_eq!(out, vec![0, 10, 20, 30]);
    }

    #[test]
    fn every_job_finishes_before_an_error_is_returned() {
        let done = AtomicUsize::new(0);
        let runner = PhaseRunner::new(true);
        let err = runner
            .run(Phase::AcceptVote, &jobs(&[false, true, true]), |a| {
                if a.raw() == 1 {
                    return Err(EngineError::Collaborator {
                        agent: a,
                        phase: Phase::AcceptVote,
                        source: std::io::Error::other("hung up"),
                    });
                }
                std::thread::sleep(Duration::from_millis(20));
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Collaborator { agent, .. } if agent == AgentId::new(1)));
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panics_become_errors() {
        let runner = PhaseRunner::new(true);
        let err = runner
            .run(Phase::Expel, &jobs(&[false, true]), |a| -> Result<()> {
                if a.raw() == 1 {
                    panic!("worker blew up");
                }
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkerPanicked { phase: Phase::Expel, .. }));
    }

    #[test]
    fn pairs_never_overlap() {
        let sched = PairScheduler::new(3, Duration::from_millis(10));
        let (a, b, c) = (AgentId::new(0), AgentId::new(1), AgentId::new(2));
        assert!(sched.try_claim(a, b));
        assert!(!sched.try_claim(b, c));
        assert_eq!(sched.busy_count(), 2);
        sched.release(a, b);
        assert!(sched.try_claim(b, c));
        sched.wait();
    }
}
