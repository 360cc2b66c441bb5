//! Single-threaded driver for a stack of [`StreamStage`]s.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::buffer::OutputBuffer;
use crate::config::SchedulerOptions;
use crate::request::{RequestId, RequestKind, StreamContext};
use crate::stage::{StageStatus, StreamStage};
use crate::stats::Statistic;
use crate::telemetry::{profile, tags};
use crate::types::{RequestStatus, duration_to_us};
use crate::{Result, StreamError};

const PROFILE_TAG_STACK_SCHEDULER: [&str; 2] = [tags::TAG_SYSTEM, tags::TAG_SCHEDULER];

/// Owns the request graph and the top of a stage stack, and pumps requests through it.
///
/// Every stage method is called from the thread that calls [`pump`](Self::pump).
/// Worker threads only signal the context's waker.
pub struct StreamScheduler {
    context: StreamContext,
    stack: Box<dyn StreamStage>,
    incoming: VecDeque<RequestId>,
    options: SchedulerOptions,
    last_estimate: Option<Instant>,
}

impl StreamScheduler {
    pub fn new(context: StreamContext, stack: Box<dyn StreamStage>) -> Self {
        Self::with_options(context, stack, SchedulerOptions::default())
    }

    pub fn with_options(
        context: StreamContext,
        stack: Box<dyn StreamStage>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            context,
            stack,
            incoming: VecDeque::new(),
            options,
            last_estimate: None,
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub fn context(&self) -> &StreamContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut StreamContext {
        &mut self.context
    }

    /// Registers an external request. It reaches the stack on the next pump.
    pub fn submit(&mut self, kind: RequestKind) -> RequestId {
        let id = self.context.graph.create(kind);
        self.incoming.push_back(id);
        id
    }

    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.context.graph.status(id)
    }

    pub fn estimated_completion(&self, id: RequestId) -> Option<Instant> {
        self.context.graph.estimated_completion(id)
    }

    /// Frees a finished external request and returns its payload.
    pub fn release(&mut self, id: RequestId) -> Result<RequestKind> {
        self.context.graph.release(id)
    }

    pub fn stage_status(&self) -> StageStatus {
        let mut status = StageStatus::default();
        self.stack.update_status(&mut status);
        status
    }

    pub fn is_idle(&self) -> bool {
        self.incoming.is_empty()
            && self.context.prepared_len() == 0
            && !self.context.graph.has_completions()
            && self.stack.is_idle()
    }

    pub fn collect_statistics(&self) -> Vec<Statistic> {
        let mut statistics = Vec::new();
        self.stack.collect_statistics(&mut statistics);
        statistics
    }

    /// Runs one scheduling round. Returns true if any stage made progress.
    pub fn pump(&mut self) -> bool {
        let started_at = Instant::now();
        // Clear a pending wake; this round picks up whatever caused it.
        self.context.take_wake();

        let mut progressed = self.dispatch_completions();

        while let Some(request) = self.incoming.pop_front() {
            self.stack.prepare(&mut self.context, request);
            progressed = true;
        }
        while let Some(request) = self.context.pop_prepared() {
            // Rejected synthetic chains can leave stale handles behind.
            if !self.context.graph.contains(request) {
                continue;
            }
            self.stack.queue(&mut self.context, request);
            progressed = true;
        }

        let now = Instant::now();
        let estimate_due = self
            .last_estimate
            .is_none_or(|last| now.duration_since(last) >= self.options.estimate_interval);
        if estimate_due {
            let mut pending = Vec::new();
            self.stack
                .estimate_completion(&mut self.context, now, &mut pending);
            self.last_estimate = Some(now);
        }

        progressed |= self.stack.execute(&mut self.context);
        progressed |= self.dispatch_completions();

        profile::event(
            tags::PROFILE_SCHEDULER,
            &PROFILE_TAG_STACK_SCHEDULER,
            "pump",
            if progressed { "progress" } else { "idle" },
            duration_to_us(started_at.elapsed()),
            "scheduler round finished",
        );
        progressed
    }

    /// Pumps until every stage is idle, sleeping on the waker between idle rounds.
    pub fn run_until_idle(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let progressed = self.pump();
            if !progressed && self.is_idle() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(StreamError::Timeout(timeout));
            }
            if !progressed {
                self.context.wait_for_wake(self.options.idle_wait);
            }
        }
    }

    /// Pumps until `id` reaches a terminal status.
    pub fn run_until_complete(&mut self, id: RequestId, timeout: Duration) -> Result<RequestStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let progressed = self.pump();
            match self.status(id) {
                Some(status) if status.is_terminal() => return Ok(status),
                Some(_) => {}
                None => return Err(StreamError::UnknownRequest),
            }
            if Instant::now() >= deadline {
                return Err(StreamError::Timeout(timeout));
            }
            if !progressed {
                self.context.wait_for_wake(self.options.idle_wait);
            }
        }
    }

    /// Size of the file at `path` as seen through the stack.
    pub fn file_size(&mut self, path: impl Into<PathBuf>) -> Result<u64> {
        let path = path.into();
        let id = self.submit(RequestKind::FileMetadata {
            path: path.clone(),
            size: None,
        });
        let status = self.run_until_complete(id, self.options.request_timeout)?;
        match (status, self.release(id)?) {
            (RequestStatus::Completed, RequestKind::FileMetadata { size: Some(size), .. }) => {
                Ok(size)
            }
            _ => Err(StreamError::RequestFailed(path.display().to_string())),
        }
    }

    /// Whether `path` exists anywhere in the stack, archived or loose.
    pub fn file_exists(&mut self, path: impl Into<PathBuf>) -> Result<bool> {
        let id = self.submit(RequestKind::FileExists {
            path: path.into(),
            found: false,
        });
        let status = self.run_until_complete(id, self.options.request_timeout)?;
        match self.release(id)? {
            RequestKind::FileExists { found, .. } => Ok(status == RequestStatus::Completed && found),
            _ => Ok(false),
        }
    }

    /// Reads `size` bytes at `offset` of `path` and blocks until they arrive.
    pub fn read_range(&mut self, path: impl Into<PathBuf>, offset: u64, size: u64) -> Result<Vec<u8>> {
        let path = path.into();
        let len = usize::try_from(size).map_err(|_| StreamError::OutOfRange {
            offset,
            size,
            len: u64::MAX,
        })?;
        let output = OutputBuffer::with_len(len);
        let id = self.submit(RequestKind::Read {
            path: path.clone(),
            output: output.clone(),
            offset,
            size,
        });
        let status = self.run_until_complete(id, self.options.request_timeout)?;
        self.release(id)?;
        match status {
            RequestStatus::Completed => Ok(output.to_vec()),
            _ => Err(StreamError::RequestFailed(path.display().to_string())),
        }
    }

    /// Reads the whole of `path`.
    pub fn read_file(&mut self, path: impl Into<PathBuf>) -> Result<Vec<u8>> {
        let path = path.into();
        let size = self.file_size(path.clone())?;
        self.read_range(path, 0, size)
    }

    /// Runs parked continuations until none are left; a continuation may finish
    /// further requests.
    fn dispatch_completions(&mut self) -> bool {
        let mut dispatched = false;
        while self.context.graph.has_completions() {
            for record in self.context.graph.take_completions() {
                tracing::trace!(
                    target: tags::PROFILE_SCHEDULER,
                    request = %record.request,
                    continuation = ?record.continuation,
                    "running continuation"
                );
                self.stack.on_completion(&mut self.context, record);
                dispatched = true;
            }
        }
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatisticsSink;

    /// Completes every queued request on the next execute.
    #[derive(Default)]
    struct Immediate {
        queued: VecDeque<RequestId>,
    }

    impl StreamStage for Immediate {
        fn name(&self) -> &str {
            "immediate"
        }

        fn prepare(&mut self, ctx: &mut StreamContext, request: RequestId) {
            ctx.push_prepared(request);
        }

        fn queue(&mut self, ctx: &mut StreamContext, request: RequestId) {
            ctx.graph.set_status(request, RequestStatus::Queued);
            self.queued.push_back(request);
        }

        fn execute(&mut self, ctx: &mut StreamContext) -> bool {
            let mut did_work = false;
            while let Some(request) = self.queued.pop_front() {
                if let Some(RequestKind::FileMetadata { size, .. }) = ctx.graph.kind_mut(request) {
                    *size = Some(7);
                }
                ctx.graph.complete(request, RequestStatus::Completed);
                did_work = true;
            }
            did_work
        }

        fn update_status(&self, status: &mut StageStatus) {
            status.is_idle &= self.queued.is_empty();
        }

        fn estimate_completion(
            &mut self,
            ctx: &mut StreamContext,
            now: Instant,
            _pending: &mut Vec<RequestId>,
        ) {
            for request in &self.queued {
                ctx.graph.set_estimated_completion(*request, now);
            }
        }

        fn collect_statistics(&self, sink: &mut dyn StatisticsSink) {
            sink.record(Statistic::u64("immediate", "queued", self.queued.len() as u64));
        }

        fn is_idle(&self) -> bool {
            self.queued.is_empty()
        }
    }

    fn scheduler() -> StreamScheduler {
        StreamScheduler::new(StreamContext::new(), Box::new(Immediate::default()))
    }

    #[test]
    fn submitted_request_completes_and_releases() -> Result<()> {
        let mut scheduler = scheduler();
        let id = scheduler.submit(RequestKind::Wait);
        assert_eq!(scheduler.status(id), Some(RequestStatus::Pending));

        let status = scheduler.run_until_complete(id, Duration::from_secs(1))?;
        assert_eq!(status, RequestStatus::Completed);
        assert!(matches!(scheduler.release(id)?, RequestKind::Wait));
        assert_eq!(scheduler.status(id), None);
        assert!(scheduler.release(id).is_err());
        Ok(())
    }

    #[test]
    fn file_size_reads_metadata_through_the_stack() -> Result<()> {
        let mut scheduler = scheduler();
        assert_eq!(scheduler.file_size("anything.bin")?, 7);
        assert!(scheduler.context().graph.is_empty());
        Ok(())
    }

    #[test]
    fn run_until_idle_returns_once_nothing_is_left() -> Result<()> {
        let mut scheduler = scheduler();
        scheduler.submit(RequestKind::Wait);
        scheduler.submit(RequestKind::Wait);
        scheduler.run_until_idle(Duration::from_secs(1))?;
        assert!(scheduler.is_idle());
        assert!(!scheduler.pump());
        Ok(())
    }

    #[test]
    fn statistics_come_from_the_stack() {
        let scheduler = scheduler();
        let statistics = scheduler.collect_statistics();
        assert_eq!(statistics.len(), 1);
        assert_eq!(statistics[0].owner, "immediate");
    }
}
