mod support;

#[cfg(feature = "telemetry")]
mod telemetry_enabled_tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use pakstream_core::stage::StreamStage;
    use pakstream_core::telemetry;
    use pakstream_core::telemetry::tags;
    use pakstream_core::{
        BufferPool, CodecKind, ConflictPolicy, DecompressorConfig, DefaultWorkerTelemetry,
        RequestStatus, WorkerTelemetry,
    };

    use super::support::{Harness, MemoryArchive, TestResult, sample_bytes};

    static TELEMETRY_TEST_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn records_metrics_for_a_compressed_read() -> TestResult {
        let _guard = TELEMETRY_TEST_MUTEX
            .lock()
            .expect("telemetry test lock poisoned");
        telemetry::reset();

        let data = sample_bytes(1, 8000);
        let mut archive = MemoryArchive::default();
        archive.add("a.bin", &data, CodecKind::Lz4, ConflictPolicy::PreferLooseFile);
        let mut h = Harness::new(DecompressorConfig::new(2, 2, 512), &archive, true)?;

        let (request, _) = h.read("a.bin", 0, 8000);
        let (miss, _) = h.read("missing.bin", 0, 4);
        assert_eq!(h.run_until_complete(request), Some(RequestStatus::Completed));
        assert_eq!(h.run_until_complete(miss), Some(RequestStatus::Failed));
        let mut statistics = Vec::new();
        h.stage.collect_statistics(&mut statistics);

        let snapshot = telemetry::snapshot();
        assert_eq!(snapshot.counter(tags::METRIC_LOOKUP_HIT_COUNT), Some(1));
        assert_eq!(snapshot.counter(tags::METRIC_LOOKUP_MISS_COUNT), Some(1));
        assert_eq!(snapshot.counter(tags::METRIC_CONFLICT_PROBE_COUNT), Some(1));
        assert_eq!(snapshot.counter(tags::METRIC_READ_ADMITTED_COUNT), Some(1));
        assert_eq!(snapshot.counter(tags::METRIC_JOB_STARTED_COUNT), Some(1));
        assert_eq!(snapshot.counter(tags::METRIC_JOB_FINISHED_COUNT), Some(1));
        assert_eq!(snapshot.counter(tags::METRIC_JOB_FAILED_COUNT), None);
        assert!(snapshot.counter(tags::METRIC_BUFFER_ACQUIRE_CREATED_COUNT).unwrap_or(0) >= 1);

        let bytes = snapshot
            .histogram(tags::METRIC_JOB_BYTES)
            .expect("job bytes histogram missing");
        assert_eq!(bytes.count, 1);
        assert_eq!(bytes.max, 8000);

        assert_eq!(snapshot.gauge(tags::METRIC_STAGE_AVAILABLE_READ_SLOTS), Some(2));
        assert_eq!(snapshot.gauge(tags::METRIC_STAGE_AVAILABLE_JOB_SLOTS), Some(2));
        assert_eq!(snapshot.gauge(tags::METRIC_STAGE_PENDING_DECOMPRESSION), Some(0));
        Ok(())
    }

    #[test]
    fn buffer_pool_tracks_outstanding_bytes() {
        let _guard = TELEMETRY_TEST_MUTEX
            .lock()
            .expect("telemetry test lock poisoned");
        telemetry::reset();

        let pool = BufferPool::new(0, 1);
        {
            let _first = pool.acquire(256);
            assert_eq!(
                telemetry::snapshot().gauge(tags::METRIC_BUFFER_OUTSTANDING_BYTES),
                Some(256)
            );
        }
        {
            let _second = pool.acquire(64);
        }

        let snapshot = telemetry::snapshot();
        assert_eq!(snapshot.counter(tags::METRIC_BUFFER_ACQUIRE_CREATED_COUNT), Some(1));
        assert_eq!(snapshot.counter(tags::METRIC_BUFFER_ACQUIRE_RECYCLED_COUNT), Some(1));
        assert_eq!(snapshot.gauge(tags::METRIC_BUFFER_OUTSTANDING_BYTES), Some(0));
    }

    #[test]
    fn worker_hooks_emit_metrics() {
        let _guard = TELEMETRY_TEST_MUTEX
            .lock()
            .expect("telemetry test lock poisoned");
        telemetry::reset();

        let worker_telemetry = DefaultWorkerTelemetry;
        worker_telemetry.on_task_started(0, "decompress");
        worker_telemetry.on_task_finished(0, "decompress", Duration::from_micros(120));
        worker_telemetry.on_task_started(0, "decompress");
        worker_telemetry.on_task_failed(0, "decompress", Duration::from_micros(75));

        let snapshot = telemetry::snapshot();
        assert_eq!(snapshot.gauge(tags::METRIC_WORKER_ACTIVE_COUNT), Some(0));
        assert_eq!(snapshot.counter(tags::METRIC_WORKER_TASK_COUNT), Some(1));
        assert_eq!(snapshot.counter(tags::METRIC_WORKER_TASK_FAIL_COUNT), Some(1));

        let task_hist = snapshot
            .histogram(tags::METRIC_WORKER_TASK_LATENCY_US)
            .expect("worker task histogram missing");
        assert_eq!(task_hist.count, 2);
        assert!(task_hist.max >= task_hist.min);
    }
}

#[cfg(not(feature = "telemetry"))]
mod telemetry_disabled_tests {
    use std::time::Duration;

    use pakstream_core::telemetry;
    use pakstream_core::telemetry::tags;
    use pakstream_core::{BufferPool, DefaultWorkerTelemetry, WorkerTelemetry};

    #[test]
    fn telemetry_api_is_noop_without_feature() {
        telemetry::reset();

        telemetry::increment_counter(tags::METRIC_WORKER_TASK_COUNT, 7, &[]);
        telemetry::record_histogram(tags::METRIC_WORKER_TASK_LATENCY_US, 11, &[]);
        telemetry::set_gauge(tags::METRIC_STAGE_AVAILABLE_READ_SLOTS, 3, &[]);
        telemetry::add_gauge(tags::METRIC_WORKER_ACTIVE_COUNT, 2, &[]);
        telemetry::sub_gauge_saturating(tags::METRIC_WORKER_ACTIVE_COUNT, 10, &[]);

        let worker_telemetry = DefaultWorkerTelemetry;
        worker_telemetry.on_task_started(0, "decompress");
        worker_telemetry.on_task_finished(0, "decompress", Duration::from_micros(120));
        worker_telemetry.on_task_failed(0, "decompress", Duration::from_micros(75));
        drop(BufferPool::new(0, 1).acquire(32));

        let snapshot = telemetry::snapshot();
        assert!(snapshot.counters.is_empty());
        assert!(snapshot.gauges.is_empty());
        assert!(snapshot.histograms.is_empty());
    }
}
