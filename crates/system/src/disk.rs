use std::fs::{self, DirEntry};
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use telemetry_config::{resolve_world_dir, DiskConfig};
use telemetry_core::state::{to_gb, to_mb, DiskStatus, DiskUsage};
use telemetry_core::sync::{lock, read, write};
use telemetry_core::{PollerState, Result, Shutdown, Tracker, Worker};
use tracing::{debug, error, info, warn};

/// Something whose total size in bytes can be measured, usually a directory.
pub trait SizeSource: Send + Sync + 'static {
    fn total_size(&self) -> io::Result<u64>;

    /// Human-readable name for log lines.
    fn describe(&self) -> String;
}

/// Sum of all regular files below a directory.
#[derive(Debug, Clone)]
pub struct DirectorySize {
    root: PathBuf,
}

impl DirectorySize {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SizeSource for DirectorySize {
    fn total_size(&self) -> io::Result<u64> {
        directory_size(&self.root)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Total size of every regular file below `root`.
///
/// Symlinks are not followed. Entries that vanish mid-scan are skipped; any
/// other I/O error aborts the scan. Top-level subdirectories are split across
/// scoped threads and each is walked with an explicit stack, so tree depth is
/// bounded only by memory.
pub fn directory_size(root: &Path) -> io::Result<u64> {
    let mut total = 0;
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(root)? {
        tally(entry, &mut total, &mut subdirs)?;
    }

    if subdirs.is_empty() {
        return Ok(total);
    }

    let workers = thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .min(subdirs.len());
    let chunk = subdirs.len().div_ceil(workers);

    let partials: Vec<io::Result<u64>> = thread::scope(|scope| {
        let handles: Vec<_> = subdirs
            .chunks(chunk)
            .map(|dirs| scope.spawn(move || walk(dirs.to_vec())))
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(io::Error::other("directory walker panicked")))
            })
            .collect()
    });

    for partial in partials {
        total += partial?;
    }
    Ok(total)
}

fn walk(mut pending: Vec<PathBuf>) -> io::Result<u64> {
    let mut total = 0;
    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            tally(entry, &mut total, &mut pending)?;
        }
    }
    Ok(total)
}

fn tally(entry: io::Result<DirEntry>, total: &mut u64, dirs: &mut Vec<PathBuf>) -> io::Result<()> {
    let result = entry.and_then(|entry| {
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        } else if file_type.is_file() {
            *total += entry.metadata()?.len();
        }
        Ok(())
    });

    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Sleep to take after a scan of `elapsed` against `target`, and the target
/// for the next cycle.
///
/// A scan that overruns its target doubles the target for good, so slow
/// disks are not rescanned back to back.
pub fn next_wait(target: Duration, elapsed: Duration) -> (Duration, Duration) {
    if elapsed > target {
        (Duration::ZERO, target.saturating_mul(2))
    } else {
        (target - elapsed, target)
    }
}

// ── Poller ────────────────────────────────────────────────────────────────────

/// Timing knobs for [`DiskUsagePoller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskPollSettings {
    pub interval:    Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for DiskPollSettings {
    fn default() -> Self {
        Self {
            interval:    Duration::from_secs(60),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl From<&DiskConfig> for DiskPollSettings {
    fn from(config: &DiskConfig) -> Self {
        Self {
            interval:    config.interval(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }
}

#[derive(Debug)]
struct DiskShared {
    size_bytes:           Option<u64>,
    state:                PollerState,
    consecutive_failures: u32,
    target_interval:      Duration,
}

/// Background poller caching the total size of the world directory.
///
/// Failed scans are retried after a short delay; once more than
/// `max_retries` scans fail in a row the poller stops for good and the last
/// good value stays frozen.
pub struct DiskUsagePoller {
    worker:   Worker,
    settings: DiskPollSettings,
    source:   Mutex<Option<Box<dyn SizeSource>>>,
    shared:   Arc<RwLock<DiskShared>>,
}

impl DiskUsagePoller {
    /// `None` means there is nothing to measure; `start()` then moves
    /// straight to `Stopped` without spawning a thread.
    pub fn new(source: Option<Box<dyn SizeSource>>, settings: DiskPollSettings) -> Self {
        Self {
            worker: Worker::new("disk-usage-poller"),
            settings,
            source: Mutex::new(source),
            shared: Arc::new(RwLock::new(DiskShared {
                size_bytes:           None,
                state:                PollerState::Idle,
                consecutive_failures: 0,
                target_interval:      settings.interval,
            })),
        }
    }

    pub fn for_directory(dir: Option<PathBuf>, settings: DiskPollSettings) -> Self {
        let source = dir.map(|d| Box::new(DirectorySize::new(d)) as Box<dyn SizeSource>);
        Self::new(source, settings)
    }

    /// Measure the world directory resolved from `config`.
    pub fn from_config(config: &DiskConfig) -> Self {
        Self::for_directory(resolve_world_dir(config), config.into())
    }

    /// Last cached size, or `None` if no scan has succeeded.
    pub fn world_size_bytes(&self) -> Option<u64> {
        read(&self.shared).size_bytes
    }

    pub fn world_size_mb(&self) -> Option<f64> {
        self.world_size_bytes().map(to_mb)
    }

    pub fn world_size_gb(&self) -> Option<f64> {
        self.world_size_bytes().map(to_gb)
    }

    /// `true` while the scan loop is running (possibly retrying).
    pub fn is_tracking(&self) -> bool {
        self.usage().is_tracking()
    }

    pub fn status(&self) -> DiskStatus {
        self.usage().status
    }

    /// Size and status read under one lock.
    pub fn usage(&self) -> DiskUsage {
        let shared = read(&self.shared);
        let stopped = shared.state == PollerState::Stopped;
        let status = match (stopped, shared.size_bytes) {
            (false, None) => DiskStatus::Pending,
            (false, Some(_)) => DiskStatus::Tracking,
            (true, Some(_)) => DiskStatus::Frozen,
            (true, None) => DiskStatus::Unavailable,
        };
        DiskUsage {
            size_bytes: shared.size_bytes,
            status,
            tracking: matches!(shared.state, PollerState::Running | PollerState::Degraded),
        }
    }

    /// Current scan cadence after any backoff.
    pub fn target_interval(&self) -> Duration {
        read(&self.shared).target_interval
    }

    pub fn consecutive_failures(&self) -> u32 {
        read(&self.shared).consecutive_failures
    }
}

impl Tracker for DiskUsagePoller {
    fn name(&self) -> &str {
        self.worker.name()
    }

    fn start(&self) -> Result<()> {
        self.worker.ensure_startable()?;
        let Some(source) = lock(&self.source).take() else {
            // No directory to measure, or a second start: retire() tells them apart.
            self.worker.retire()?;
            warn!("World directory unknown; disk usage tracking disabled");
            write(&self.shared).state = PollerState::Stopped;
            return Ok(());
        };

        let target = source.describe();
        write(&self.shared).state = PollerState::Running;

        let shared = Arc::clone(&self.shared);
        let settings = self.settings;
        let spawned = self
            .worker
            .spawn(move |shutdown| scan_loop(source.as_ref(), &shared, settings, &shutdown));
        match spawned {
            Ok(()) => info!("Tracking disk usage of '{target}'"),
            Err(_) => write(&self.shared).state = PollerState::Stopped,
        }
        spawned
    }

    fn close(&self) {
        self.worker.stop();
        write(&self.shared).state = PollerState::Stopped;
    }

    fn is_alive(&self) -> bool {
        self.worker.is_alive()
    }

    fn state(&self) -> PollerState {
        read(&self.shared).state
    }
}

fn scan_loop(
    source: &dyn SizeSource,
    shared: &RwLock<DiskShared>,
    settings: DiskPollSettings,
    shutdown: &Shutdown,
) {
    let mut target = settings.interval;
    let mut failures = 0u32;

    loop {
        let started = Instant::now();

        let pause = match source.total_size() {
            Ok(size) => {
                let elapsed = started.elapsed();
                let (wait, next_target) = next_wait(target, elapsed);
                if next_target > target {
                    warn!(
                        "Scanning '{}' took {elapsed:?}; backing off to every {next_target:?}",
                        source.describe()
                    );
                }
                target = next_target;
                failures = 0;

                {
                    let mut guard = write(shared);
                    guard.size_bytes = Some(size);
                    guard.state = PollerState::Running;
                    guard.consecutive_failures = 0;
                    guard.target_interval = target;
                }

                debug!(size, ?elapsed, "World size scan finished");
                wait
            }
            Err(e) => {
                failures += 1;
                if failures > settings.max_retries {
                    error!(
                        "Unable to access '{}' after {failures} attempts: {e}; disk usage tracking disabled",
                        source.describe()
                    );
                    break;
                }

                warn!(
                    "Scanning '{}' failed (attempt {failures}): {e}; retrying in {:?}",
                    source.describe(),
                    settings.retry_delay
                );
                {
                    let mut guard = write(shared);
                    guard.state = PollerState::Degraded;
                    guard.consecutive_failures = failures;
                }
                settings.retry_delay
            }
        };

        if shutdown.wait_timeout(pause) {
            break;
        }
    }

    let mut guard = write(shared);
    guard.state = PollerState::Stopped;
    guard.consecutive_failures = failures;
}
