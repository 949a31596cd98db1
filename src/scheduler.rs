//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! An abstract delayed-task executor. The registry and instance entries
//! submit refresh jobs to it rather than assuming a particular threading
//! model; this also lets `shutdown()` stop all outstanding work without the
//! registry and its entries needing a direct reference cycle to each other.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Opaque handle returned by [`Scheduler::schedule`], usable with
/// [`Scheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u64);

/// Abstract delayed-task executor: `schedule(delay, task)`, `cancel`, `close`.
/// Guarantees tasks do not run after `close()`.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, job: BoxFuture) -> JobHandle;
    fn cancel(&self, handle: JobHandle);
    fn close(&self);
}

/// Realizes [`Scheduler`] with one `tokio::spawn`ed task per job, tracked by
/// `JoinHandle` so `close()` can abort everything still outstanding.
#[derive(Default)]
pub struct TokioScheduler {
    next_id: AtomicU64,
    jobs: Mutex<HashMap<u64, JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TokioScheduler {
    pub fn new() -> TokioScheduler {
        TokioScheduler {
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn reap_finished(jobs: &mut HashMap<u64, JoinHandle<()>>) {
        jobs.retain(|_, h| !h.is_finished());
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, job: BoxFuture) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.closed.load(Ordering::Acquire) {
            // Closed schedulers silently drop new work; entries check
            // `terminated` before relying on a scheduled refresh anyway.
            return JobHandle(id);
        }
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            job.await;
        });
        let mut jobs = self.jobs.lock().unwrap();
        Self::reap_finished(&mut jobs);
        jobs.insert(id, handle);
        JobHandle(id)
    }

    fn cancel(&self, handle: JobHandle) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(h) = jobs.remove(&handle.0) {
            h.abort();
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut jobs = self.jobs.lock().unwrap();
        for (_, h) in jobs.drain() {
            h.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn runs_scheduled_job_after_delay() {
        let scheduler = TokioScheduler::new();
        let ran = Arc::new(AtomicU32::new(0));
        let ran2 = ran.clone();
        scheduler.schedule(
            Duration::from_millis(1),
            Box::pin(async move {
                ran2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_prevents_new_jobs_from_running() {
        let scheduler = TokioScheduler::new();
        scheduler.close();
        let ran = Arc::new(AtomicU32::new(0));
        let ran2 = ran.clone();
        scheduler.schedule(
            Duration::from_millis(1),
            Box::pin(async move {
                ran2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_aborts_outstanding_jobs() {
        let scheduler = TokioScheduler::new();
        let ran = Arc::new(AtomicU32::new(0));
        let ran2 = ran.clone();
        scheduler.schedule(
            Duration::from_millis(50),
            Box::pin(async move {
                ran2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        scheduler.close();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
