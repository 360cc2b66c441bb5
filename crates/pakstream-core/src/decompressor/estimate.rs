use std::time::{Duration, Instant};

/// Throughput figures taken from the statistics windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throughput {
    pub total_bytes: u64,
    pub total_duration_us: u64,
    pub average_dispatch_delay_us: u64,
}

impl Throughput {
    /// Time to decompress `bytes` at the observed rate. Zero when no rate is known.
    pub fn predict(&self, bytes: u64) -> Duration {
        if self.total_bytes == 0 {
            return Duration::ZERO;
        }
        let micros =
            u128::from(bytes) * u128::from(self.total_duration_us) / u128::from(self.total_bytes);
        Duration::from_micros(u64::try_from(micros).unwrap_or(0))
    }

    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_micros(self.average_dispatch_delay_us)
    }
}

/// A decompression job currently on a worker.
#[derive(Debug, Clone, Copy)]
pub struct ActiveJob {
    pub started_at: Instant,
    pub uncompressed_size: u64,
}

/// A read slot or queued read waiting for its turn on a worker.
#[derive(Debug, Clone, Copy)]
pub struct WaitingRead {
    /// When the compressed bytes are expected to be in memory; `None` means now.
    pub data_ready_at: Option<Instant>,
    pub uncompressed_size: u64,
}

/// Predicted completion times, index-aligned with the inputs of [`estimate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Estimates {
    pub jobs: Vec<Instant>,
    pub slots: Vec<Instant>,
    pub queued: Vec<Instant>,
}

/// Predicts when every request held by the decompression stage will finish.
///
/// `slots` are reads that own a read slot, `queued` are reads still waiting
/// for one, oldest first. The first free worker is expected when the running
/// job closest to finishing completes; each slot then waits for that, the
/// average dispatch delay and its own decompression. Queued reads additionally
/// wait behind the shortest slot job and behind every queued read ahead of them.
pub fn estimate(
    now: Instant,
    throughput: &Throughput,
    jobs: &[ActiveJob],
    slots: &[WaitingRead],
    queued: &[WaitingRead],
) -> Estimates {
    let mut estimates = Estimates {
        jobs: Vec::with_capacity(jobs.len()),
        slots: Vec::with_capacity(slots.len()),
        queued: Vec::with_capacity(queued.len()),
    };

    let mut next_free_worker: Option<Duration> = None;
    for job in jobs {
        let predicted = throughput.predict(job.uncompressed_size);
        let elapsed = now.saturating_duration_since(job.started_at);
        let remaining = predicted.saturating_sub(elapsed);
        next_free_worker = Some(next_free_worker.map_or(remaining, |delay| delay.min(remaining)));
        estimates.jobs.push(offset_from(now, remaining));
    }

    let dispatch_delay = throughput.dispatch_delay();
    let mut cumulative_delay = next_free_worker.unwrap_or(Duration::ZERO);
    let mut shortest_slot_job: Option<Duration> = None;
    for slot in slots {
        let predicted = throughput.predict(slot.uncompressed_size);
        let base = slot.data_ready_at.map_or(now, |ready| ready.max(now));
        let wait = cumulative_delay
            .saturating_add(dispatch_delay)
            .saturating_add(predicted);
        estimates.slots.push(offset_from(base, wait));
        shortest_slot_job = Some(shortest_slot_job.map_or(predicted, |shortest| shortest.min(predicted)));
    }
    cumulative_delay = cumulative_delay.saturating_add(shortest_slot_job.unwrap_or(Duration::ZERO));

    for read in queued {
        let predicted = throughput.predict(read.uncompressed_size);
        let base = read.data_ready_at.map_or(now, |ready| ready.max(now));
        cumulative_delay = cumulative_delay
            .saturating_add(dispatch_delay)
            .saturating_add(predicted);
        estimates.queued.push(offset_from(base, cumulative_delay));
    }

    estimates
}

fn offset_from(base: Instant, delay: Duration) -> Instant {
    base.checked_add(delay).unwrap_or(base)
}
