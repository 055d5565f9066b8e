//! Integration tests for the read engine against an in-memory object store.
//!
//! Scenarios covered:
//! - Reads: straddling blocks, clamping at end of file, sequential scans
//! - Routing: stream reuse for nearby offsets, new streams for far jumps
//! - Lifecycle: idle reaping, shutdown, stalled backends
//! - Metadata: directory classification without HEAD requests, listings
//! - Range cache: full and partial hits, disabled cache
//! - Failures: short objects and failed streams surface as errors, hung
//!   streams are replaced

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rusty_s3fs_storage::MemoryStorageClient;
use rusty_s3fs_vfs::{
    DirEntry, FileStat, IdleSweep, PoolOptions, RangeCacheOptions, ReadEngine, ReadStats,
    StreamOptions, VfsError, VfsOptions,
};

const BUCKET: &str = "test-bucket";

/// Runtime plus client and engine built over it.
struct TestEnv {
    _rt: tokio::runtime::Runtime,
    client: MemoryStorageClient,
    engine: ReadEngine,
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn small_blocks() -> VfsOptions {
    VfsOptions::default().with_stream(
        StreamOptions::default()
            .with_io_buffer_size(8 * 1024)
            .with_block_size(32 * 1024)
            .with_read_ahead_size(64 * 1024)
            .with_fill_poll_interval(Duration::from_millis(10))
            .with_read_wait_timeout(Duration::from_secs(5)),
    )
}

/// Build an engine over a client populated by `populate`.
///
/// # Arguments
/// * `options` - Engine configuration
/// * `populate` - Called once to seed objects
fn create_test_env(options: VfsOptions, populate: impl FnOnce(&MemoryStorageClient)) -> TestEnv {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let client = MemoryStorageClient::new().with_chunk_size(4096);
    client.create_bucket(BUCKET);
    populate(&client);
    let engine = ReadEngine::new(
        Arc::new(client.clone()),
        rt.handle().clone(),
        BUCKET,
        options,
    )
    .unwrap();
    TestEnv {
        _rt: rt,
        client,
        engine,
    }
}

/// Poll `cond` until it holds or five seconds pass.
fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline: Instant = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

// ============================================================================
// Reads
// ============================================================================

mod reads {
    use super::*;

    #[test]
    fn test_read_straddles_block_boundary() {
        let data: Vec<u8> = sample(300_000);
        let options: VfsOptions = VfsOptions::default().with_stream(
            StreamOptions::default()
                .with_block_size(128 * 1024)
                .with_read_ahead_size(256 * 1024),
        );
        let env = create_test_env(options, |c| c.put_object(BUCKET, "big.bin", data.clone()));

        let head: Bytes = env.engine.read("/big.bin", 0, 4096).unwrap();
        assert_eq!(&head[..], &data[..4096]);

        // 130000..135000 crosses the block boundary at 131072
        let got: Bytes = env.engine.read("/big.bin", 130_000, 5000).unwrap();
        assert_eq!(got.len(), 5000);
        assert_eq!(&got[..], &data[130_000..135_000]);
        assert_eq!(env.client.streams_opened(), 1);
    }

    #[test]
    fn test_read_clamped_to_end_of_file() {
        let data: Vec<u8> = sample(300_000);
        let env = create_test_env(small_blocks(), |c| {
            c.put_object(BUCKET, "big.bin", data.clone())
        });

        let tail: Bytes = env.engine.read("/big.bin", 299_990, 100).unwrap();
        assert_eq!(&tail[..], &data[299_990..]);
        assert!(env.engine.read("/big.bin", 300_000, 100).unwrap().is_empty());
        assert!(env.engine.read("/big.bin", 400_000, 1).unwrap().is_empty());
        assert!(env.engine.read("/big.bin", 0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_empty_file() {
        let env = create_test_env(small_blocks(), |c| {
            c.put_object(BUCKET, "empty.txt", Vec::<u8>::new())
        });
        let stat: FileStat = env.engine.stat("/empty.txt").unwrap();
        assert!(stat.exists);
        assert_eq!(stat.length, 0);
        assert!(env.engine.read("/empty.txt", 0, 10).unwrap().is_empty());
        assert_eq!(env.client.streams_opened(), 0);
    }

    #[test]
    fn test_reads_are_counted_and_timed() {
        let env = create_test_env(small_blocks(), |c| c.put_object(BUCKET, "f.bin", sample(1000)));
        env.engine.read("/f.bin", 0, 100).unwrap();
        env.engine.read("/f.bin", 900, 500).unwrap();
        env.engine.read("/missing.bin", 0, 10).unwrap_err();

        let stats: ReadStats = env.engine.read_stats();
        assert_eq!(stats.reads, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.bytes, 200);
        assert!(stats.total_latency > Duration::ZERO);
    }

    #[test]
    fn test_sequential_scan_uses_one_stream() {
        let data: Vec<u8> = sample(300_000);
        let env = create_test_env(small_blocks(), |c| {
            c.put_object(BUCKET, "big.bin", data.clone())
        });

        let mut out: Vec<u8> = Vec::new();
        let mut offset: u64 = 0;
        loop {
            let chunk: Bytes = env.engine.read("/big.bin", offset, 16 * 1024).unwrap();
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len() as u64;
            out.extend_from_slice(&chunk);
        }
        assert_eq!(out, data);
        assert_eq!(env.client.streams_opened(), 1);
    }

    #[test]
    fn test_concurrent_readers_get_their_bytes() {
        let data: Arc<Vec<u8>> = Arc::new(sample(200_000));
        let shared: Vec<u8> = data.to_vec();
        let env = Arc::new(create_test_env(small_blocks(), move |c| {
            c.put_object(BUCKET, "big.bin", shared)
        }));

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let env = env.clone();
                let data = data.clone();
                std::thread::spawn(move || {
                    for i in 0..4u64 {
                        let offset: u64 = (t * 4 + i) * 6000;
                        let got: Bytes = env.engine.read("big.bin", offset, 6000).unwrap();
                        let start: usize = offset as usize;
                        assert_eq!(&got[..], &data[start..start + 6000]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}

// ============================================================================
// Routing and lifecycle
// ============================================================================

mod routing {
    use super::*;

    #[test]
    fn test_far_jump_opens_second_stream() {
        let data: Vec<u8> = sample(300_000);
        let env = create_test_env(small_blocks(), |c| {
            c.put_object(BUCKET, "big.bin", data.clone())
        });

        env.engine.read("/big.bin", 0, 10).unwrap();
        let got: Bytes = env.engine.read("/big.bin", 250_000, 10).unwrap();
        assert_eq!(&got[..], &data[250_000..250_010]);
        assert_eq!(env.engine.pool().stats().readers_opened, 2);
        assert_eq!(env.client.streams_opened(), 2);
    }

    #[test]
    fn test_nearby_read_reuses_stream() {
        let data: Vec<u8> = sample(300_000);
        let env = create_test_env(small_blocks(), |c| {
            c.put_object(BUCKET, "big.bin", data.clone())
        });

        env.engine.read("/big.bin", 0, 10).unwrap();
        let got: Bytes = env.engine.read("/big.bin", 40_000, 10).unwrap();
        assert_eq!(&got[..], &data[40_000..40_010]);
        assert_eq!(env.client.streams_opened(), 1);
        assert!(env.engine.pool().stats().window_hits >= 1);
    }

    #[test]
    fn test_idle_readers_are_reaped() {
        let options: VfsOptions = small_blocks().with_pool(
            PoolOptions::default()
                .with_idle_timeout(Duration::from_millis(50))
                .with_reap_interval(Duration::from_millis(20)),
        );
        let env = create_test_env(options, |c| c.put_object(BUCKET, "big.bin", sample(300_000)));

        env.engine.read("/big.bin", 0, 10).unwrap();
        assert_eq!(env.engine.pool().stats().readers, 1);

        assert!(wait_for(|| env.engine.pool().stats().readers == 0));
        assert!(wait_for(|| env.client.open_streams() == 0));
        assert!(env.engine.pool().stats().reaped >= 1);
    }

    #[test]
    fn test_manual_sweep_keeps_active_readers() {
        let env = create_test_env(small_blocks(), |c| c.put_object(BUCKET, "big.bin", sample(300_000)));
        env.engine.read("/big.bin", 0, 10).unwrap();
        assert_eq!(env.engine.pool().sweep_idle(Instant::now()), 0);
        assert_eq!(env.engine.pool().stats().readers, 1);
    }

    #[test]
    fn test_shutdown_releases_streams() {
        let env = create_test_env(small_blocks(), |c| c.put_object(BUCKET, "big.bin", sample(300_000)));
        env.engine.read("/big.bin", 0, 10).unwrap();
        assert!(wait_for(|| env.client.open_streams() == 1));

        env.engine.shutdown();
        assert_eq!(env.engine.pool().stats().readers, 0);
        assert!(wait_for(|| env.client.open_streams() == 0));
    }

    #[test]
    fn test_dropping_engine_releases_streams() {
        let env = create_test_env(small_blocks(), |c| c.put_object(BUCKET, "big.bin", sample(300_000)));
        env.engine.read("/big.bin", 0, 10).unwrap();

        let TestEnv { _rt, client, engine } = env;
        drop(engine);
        assert!(wait_for(|| client.open_streams() == 0));
    }

    #[test]
    fn test_stalled_backend_times_out() {
        let options: VfsOptions = VfsOptions::default().with_stream(
            StreamOptions::default()
                .with_io_buffer_size(8 * 1024)
                .with_block_size(32 * 1024)
                .with_read_ahead_size(64 * 1024)
                .with_fill_poll_interval(Duration::from_millis(10))
                .with_read_wait_timeout(Duration::from_millis(200)),
        );
        let data: Vec<u8> = sample(100_000);
        let env = create_test_env(options, |c| c.put_object(BUCKET, "slow.bin", data.clone()));
        env.engine.stat("/slow.bin").unwrap();

        env.client.set_stalled(true);
        let started: Instant = Instant::now();
        let result: Result<Bytes, VfsError> = env.engine.read("/slow.bin", 0, 100);
        assert!(matches!(result, Err(VfsError::Timeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(200));

        env.client.set_stalled(false);
        let got: Bytes = env.engine.read("/slow.bin", 0, 100).unwrap();
        assert_eq!(&got[..], &data[..100]);
    }
}

// ============================================================================
// Metadata and listings
// ============================================================================

mod metadata {
    use super::*;

    fn populate(c: &MemoryStorageClient) {
        c.put_object(BUCKET, "top.txt", b"top".to_vec());
        c.put_object(BUCKET, "photos/", Vec::<u8>::new());
        c.put_object(BUCKET, "photos/a.jpg", sample(1000));
        c.put_object(BUCKET, "photos/b.png", sample(2000));
        c.put_object(BUCKET, "photos/README", sample(10));
        c.put_object(BUCKET, "photos/2024/c.jpg", sample(3000));
    }

    #[test]
    fn test_directories_are_classified_without_head_requests() {
        let env = create_test_env(small_blocks(), populate);
        assert!(env.engine.stat("/").unwrap().is_dir);
        assert!(env.engine.stat("/photos").unwrap().is_dir);
        assert!(env.engine.stat("/photos/2024").unwrap().is_dir);
        assert_eq!(env.client.head_requests(), 0);
    }

    #[test]
    fn test_missing_and_directory_reads() {
        let env = create_test_env(small_blocks(), populate);
        let missing = env.engine.read("/photos/none.jpg", 0, 10).unwrap_err();
        assert!(matches!(missing, VfsError::NotFound { .. }));
        assert_eq!(missing.errno(), libc::ENOENT);

        let dir = env.engine.read("/photos", 0, 10).unwrap_err();
        assert!(matches!(dir, VfsError::IsDirectory { .. }));
        assert_eq!(dir.errno(), libc::EISDIR);
        assert_eq!(env.client.streams_opened(), 0);
    }

    #[test]
    fn test_file_metadata_fetched_once() {
        let env = create_test_env(small_blocks(), populate);
        env.engine.read("/photos/a.jpg", 0, 10).unwrap();
        env.engine.read("/photos/a.jpg", 10, 10).unwrap();
        env.engine.stat("photos/a.jpg").unwrap();
        assert_eq!(env.client.head_requests(), 1);
    }

    #[test]
    fn test_list_subdirectory() {
        let env = create_test_env(small_blocks(), populate);
        let entries: Vec<DirEntry> = env.engine.list_dir("/photos").unwrap();

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["2024", "README", "a.jpg", "b.png"]);
        assert!(entries[0].is_dir);
        assert!(entries[1].is_dir);
        assert_eq!(
            entries[2],
            DirEntry {
                name: "a.jpg".into(),
                is_dir: false,
                size: 1000,
            }
        );
        assert_eq!(entries[3].size, 2000);
    }

    #[test]
    fn test_list_root() {
        let env = create_test_env(small_blocks(), populate);
        let entries: Vec<DirEntry> = env.engine.list_dir("/").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["photos", "top.txt"]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].size, 3);
    }

    #[test]
    fn test_listing_seeds_file_sizes() {
        let env = create_test_env(small_blocks(), populate);
        env.engine.list_dir("/photos").unwrap();
        assert_eq!(env.engine.stat("/photos/b.png").unwrap().length, 2000);
        assert_eq!(env.client.head_requests(), 0);
    }

    #[test]
    fn test_list_empty_directory() {
        let env = create_test_env(small_blocks(), populate);
        assert!(env.engine.list_dir("/nothing-here").unwrap().is_empty());
    }
}

// ============================================================================
// Range cache
// ============================================================================

mod range_cache {
    use super::*;

    #[test]
    fn test_cached_range_needs_no_stream() {
        let data: Vec<u8> = sample(100_000);
        let env = create_test_env(small_blocks(), |c| c.put_object(BUCKET, "f.bin", data.clone()));

        env.engine.read("/f.bin", 0, 1000).unwrap();
        env.engine.shutdown();

        let got: Bytes = env.engine.read("/f.bin", 0, 1000).unwrap();
        assert_eq!(&got[..], &data[..1000]);
        assert_eq!(env.client.streams_opened(), 1);
        assert_eq!(env.engine.pool().stats().readers, 0);
    }

    #[test]
    fn test_partial_hit_fetches_the_rest() {
        let data: Vec<u8> = sample(100_000);
        let env = create_test_env(small_blocks(), |c| c.put_object(BUCKET, "f.bin", data.clone()));

        env.engine.read("/f.bin", 0, 1000).unwrap();
        env.engine.shutdown();

        let got: Bytes = env.engine.read("/f.bin", 500, 1000).unwrap();
        assert_eq!(&got[..], &data[500..1500]);
        assert_eq!(env.client.streams_opened(), 2);

        let ranges: Vec<(u64, usize)> = env
            .engine
            .range_cache()
            .map(|c| c.ranges("f.bin"))
            .unwrap_or_default();
        assert_eq!(ranges, vec![(0, 1000), (1000, 500)]);
    }

    #[test]
    fn test_disabled_cache_reopens_streams() {
        let data: Vec<u8> = sample(100_000);
        let options: VfsOptions = small_blocks().with_range_cache(RangeCacheOptions::disabled());
        let env = create_test_env(options, |c| c.put_object(BUCKET, "f.bin", data.clone()));
        assert!(env.engine.range_cache().is_none());

        env.engine.read("/f.bin", 0, 1000).unwrap();
        env.engine.shutdown();
        let got: Bytes = env.engine.read("/f.bin", 0, 1000).unwrap();
        assert_eq!(&got[..], &data[..1000]);
        assert_eq!(env.client.streams_opened(), 2);
    }
}

// ============================================================================
// Failures
// ============================================================================

mod failures {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use rusty_s3fs_storage::{
        ByteRange, ListResult, ObjectMetadata, RangeStream, StorageClient, StorageError,
    };

    /// Client whose first range stream never yields a byte; later streams work.
    struct FirstStreamHangs {
        inner: MemoryStorageClient,
        opens: AtomicU64,
    }

    struct HungStream;

    #[async_trait]
    impl RangeStream for HungStream {
        async fn read_chunk(&mut self, _max_len: usize) -> Result<Option<Bytes>, StorageError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl StorageClient for FirstStreamHangs {
        async fn head_object(
            &self,
            bucket: &str,
            key: &str,
        ) -> Result<Option<ObjectMetadata>, StorageError> {
            self.inner.head_object(bucket, key).await
        }

        async fn open_range_stream(
            &self,
            bucket: &str,
            key: &str,
            range: ByteRange,
        ) -> Result<Box<dyn RangeStream>, StorageError> {
            if self.opens.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(Box::new(HungStream));
            }
            self.inner.open_range_stream(bucket, key, range).await
        }

        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
            delimiter: Option<&str>,
        ) -> Result<ListResult, StorageError> {
            self.inner.list_objects(bucket, prefix, delimiter).await
        }
    }

    #[test]
    fn test_hung_stream_is_replaced() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let data: Vec<u8> = sample(10_000);
        let inner = MemoryStorageClient::new();
        inner.put_object(BUCKET, "f.bin", data.clone());
        let client = Arc::new(FirstStreamHangs {
            inner,
            opens: AtomicU64::new(0),
        });
        let options: VfsOptions = VfsOptions::default()
            .with_stream(
                StreamOptions::default()
                    .with_io_buffer_size(1024)
                    .with_block_size(4096)
                    .with_read_ahead_size(8192)
                    .with_fill_poll_interval(Duration::from_millis(10))
                    .with_read_wait_timeout(Duration::from_millis(200))
                    .with_max_stalled_waits(2),
            )
            .with_range_cache(RangeCacheOptions::disabled());
        let engine =
            ReadEngine::new(client.clone(), rt.handle().clone(), BUCKET, options).unwrap();

        let first = engine.read("/f.bin", 0, 100);
        assert!(matches!(first, Err(VfsError::Timeout { .. })));

        // The second timeout retires the hung reader and the read moves on
        let mut timeouts: usize = 1;
        for _ in 0..8 {
            match engine.read("/f.bin", 0, 100) {
                Ok(got) => assert_eq!(&got[..], &data[..100]),
                Err(VfsError::Timeout { .. }) => timeouts += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(timeouts, 1);
        assert_eq!(client.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_object_shorter_than_metadata_is_short_read() {
        let env = create_test_env(small_blocks(), |c| c.put_object(BUCKET, "f.bin", sample(1000)));
        assert_eq!(env.engine.stat("/f.bin").unwrap().length, 1000);

        // Replaced behind the engine's back; the cached length is stale
        env.client.put_object(BUCKET, "f.bin", sample(100));
        let err: VfsError = env.engine.read("/f.bin", 0, 1000).unwrap_err();
        match err {
            VfsError::ShortRead {
                expected, actual, ..
            } => {
                assert_eq!(expected, 1000);
                assert_eq!(actual, 100);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_failed_stream_is_an_error() {
        let env = create_test_env(small_blocks(), |c| c.put_object(BUCKET, "f.bin", sample(1000)));
        env.engine.stat("/f.bin").unwrap();

        env.client.fail_next_reads(100);
        let err: VfsError = env.engine.read("/f.bin", 0, 100).unwrap_err();
        assert!(matches!(err, VfsError::StreamFailed { .. }));
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let data: Vec<u8> = sample(1000);
        let env = create_test_env(small_blocks(), |c| c.put_object(BUCKET, "f.bin", data.clone()));
        env.client.fail_next_reads(1);
        let got: Bytes = env.engine.read("/f.bin", 0, 1000).unwrap();
        assert_eq!(&got[..], &data[..]);
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let options: VfsOptions = VfsOptions::default().with_stream(
            StreamOptions::default()
                .with_block_size(1024)
                .with_io_buffer_size(4096),
        );
        let result = ReadEngine::new(
            Arc::new(MemoryStorageClient::new()),
            rt.handle().clone(),
            BUCKET,
            options,
        );
        assert!(matches!(result, Err(VfsError::InvalidOptions(_))));
    }
}
