use std::time::Instant;

use crate::request::{CompletionRecord, RequestId, StreamContext};
use crate::stats::StatisticsSink;

/// Aggregate status reported up through a stack of stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageStatus {
    /// Requests the stack can accept right now; each stage lowers it to its own limit.
    pub num_available_slots: usize,
    pub is_idle: bool,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self {
            num_available_slots: usize::MAX,
            is_idle: true,
        }
    }
}

/// One layer of a streaming stack.
///
/// All methods run on the scheduling thread. A stage forwards whatever it does
/// not handle to the stage below it.
pub trait StreamStage: Send {
    fn name(&self) -> &str;

    /// First look at a newly submitted request. The stage either rewrites it into
    /// synthetic requests, pushes it to the prepared queue, or passes it down.
    fn prepare(&mut self, ctx: &mut StreamContext, request: RequestId);

    /// Accepts a prepared request for processing.
    fn queue(&mut self, ctx: &mut StreamContext, request: RequestId);

    /// Makes progress on queued work. Returns true if anything happened.
    fn execute(&mut self, ctx: &mut StreamContext) -> bool;

    /// Runs the continuation of a request this stage created.
    fn on_completion(&mut self, ctx: &mut StreamContext, record: CompletionRecord) {
        ctx.graph.retire(record.request);
    }

    fn update_status(&self, status: &mut StageStatus);

    /// Sets estimated completion times on queued requests.
    ///
    /// `pending` holds requests owned by stages above that will arrive here
    /// later, most recently queued first.
    fn estimate_completion(
        &mut self,
        ctx: &mut StreamContext,
        now: Instant,
        pending: &mut Vec<RequestId>,
    );

    fn collect_statistics(&self, sink: &mut dyn StatisticsSink);

    fn is_idle(&self) -> bool;
}
