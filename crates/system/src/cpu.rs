use chrono::Local;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use sysinfo::{Components, CpuRefreshKind, RefreshKind, System};
use telemetry_config::CpuConfig;
use telemetry_core::state::CpuSnapshot;
use telemetry_core::sync::{lock, read, write};
use telemetry_core::{PollerState, Result, RollingWindow, Shutdown, TelemetryError, Tracker, Worker};
use tracing::{debug, warn};

/// Cumulative time counters for one CPU (or the aggregate), in OS ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub user:    u64,
    pub nice:    u64,
    pub system:  u64,
    pub idle:    u64,
    pub iowait:  u64,
    pub irq:     u64,
    pub softirq: u64,
    pub steal:   u64,
}

impl CpuTicks {
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }

    pub fn busy_total(&self) -> u64 {
        self.user + self.nice + self.system + self.irq + self.softirq + self.steal
    }

    /// Fraction of time busy between `prev` and `self`; `0.0` when no time
    /// elapsed or the counters went backwards.
    pub fn load_since(&self, prev: &CpuTicks) -> f64 {
        let busy = self.busy_total().saturating_sub(prev.busy_total());
        let idle = self.idle_total().saturating_sub(prev.idle_total());
        let total = busy + idle;
        if total == 0 {
            return 0.0;
        }
        busy as f64 / total as f64
    }
}

/// One reading of the aggregate and per-CPU counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuLoadTicks {
    pub system:   CpuTicks,
    pub per_core: Vec<CpuTicks>,
}

/// Host-supplied hardware access consumed by [`CpuLoadPoller`].
pub trait CpuSensors: Send + 'static {
    /// Current cumulative tick counters.
    fn load_ticks(&mut self) -> CpuLoadTicks;

    /// CPU temperature in Celsius; `0.0` means there is no sensor.
    fn temperature_celsius(&mut self) -> f64;

    /// Current frequency of every logical CPU in Hz.
    fn core_frequencies_hz(&mut self) -> Vec<u64>;
}

// ── Host sensors ──────────────────────────────────────────────────────────────

/// Resolution of the counters synthesized from `sysinfo` usage percentages.
const USAGE_TICKS_PER_READ: u64 = 10_000;

/// [`CpuSensors`] backed by `/proc/stat` for counters and `sysinfo` for
/// frequencies and temperature.
///
/// Where `/proc/stat` can't be read, load comes from `sysinfo`'s usage
/// percentages, turned into counters that advance once per read.
pub struct HostCpuSensors {
    sys:         System,
    components:  Components,
    usage_ticks: Option<CpuLoadTicks>,
}

impl HostCpuSensors {
    pub fn new() -> Self {
        let sys = System::new_with_specifics(RefreshKind::nothing().with_cpu(
            CpuRefreshKind::nothing().with_frequency().with_cpu_usage(),
        ));

        let usage_ticks = match read_proc_stat() {
            Some(ticks) if !ticks.per_core.is_empty() => None,
            _ => {
                debug!("/proc/stat unavailable; CPU load comes from sysinfo");
                Some(CpuLoadTicks::default())
            }
        };

        Self {
            sys,
            components: Components::new_with_refreshed_list(),
            usage_ticks,
        }
    }
}

impl Default for HostCpuSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSensors for HostCpuSensors {
    fn load_ticks(&mut self) -> CpuLoadTicks {
        let Some(ticks) = self.usage_ticks.as_mut() else {
            return read_proc_stat().unwrap_or_default();
        };

        self.sys.refresh_cpu_usage();
        let per_core: Vec<f64> = self
            .sys
            .cpus()
            .iter()
            .map(|cpu| f64::from(cpu.cpu_usage()) / 100.0)
            .collect();
        let overall = f64::from(self.sys.global_cpu_usage()) / 100.0;

        accumulate_usage(ticks, overall, &per_core);
        ticks.clone()
    }

    fn temperature_celsius(&mut self) -> f64 {
        self.components.refresh(false);
        let list = self.components.list();

        ["package", "tctl", "tdie", "cpu", "core"]
            .iter()
            .find_map(|needle| {
                list.iter()
                    .filter(|c| c.label().to_lowercase().contains(needle))
                    .find_map(|c| c.temperature())
            })
            .map(f64::from)
            .unwrap_or(0.0)
    }

    fn core_frequencies_hz(&mut self) -> Vec<u64> {
        self.sys.refresh_cpu_frequency();
        self.sys
            .cpus()
            .iter()
            .map(|cpu| cpu.frequency() * 1_000_000)
            .collect()
    }
}

fn read_proc_stat() -> Option<CpuLoadTicks> {
    std::fs::read_to_string("/proc/stat")
        .ok()
        .map(|raw| parse_proc_stat(&raw))
}

/// Advance counters by one reading of usage fractions, so that
/// [`CpuTicks::load_since`] across consecutive readings yields that fraction.
pub fn accumulate_usage(ticks: &mut CpuLoadTicks, overall: f64, per_core: &[f64]) {
    advance(&mut ticks.system, overall);
    ticks.per_core.resize(per_core.len(), CpuTicks::default());
    for (counters, load) in ticks.per_core.iter_mut().zip(per_core) {
        advance(counters, *load);
    }
}

fn advance(counters: &mut CpuTicks, load: f64) {
    let busy = (load.clamp(0.0, 1.0) * USAGE_TICKS_PER_READ as f64).round() as u64;
    counters.user += busy;
    counters.idle += USAGE_TICKS_PER_READ - busy;
}

/// Parse the `cpu` and `cpuN` lines of `/proc/stat`.
pub fn parse_proc_stat(raw: &str) -> CpuLoadTicks {
    let mut ticks = CpuLoadTicks::default();

    for line in raw.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else { continue };
        if !label.starts_with("cpu") {
            continue;
        }

        let mut next = || fields.next().and_then(|f| f.parse::<u64>().ok()).unwrap_or(0);
        let counters = CpuTicks {
            user:    next(),
            nice:    next(),
            system:  next(),
            idle:    next(),
            iowait:  next(),
            irq:     next(),
            softirq: next(),
            steal:   next(),
        };

        if label == "cpu" {
            ticks.system = counters;
        } else {
            ticks.per_core.push(counters);
        }
    }

    ticks
}

// ── Poller ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct CpuShared {
    snapshot:         CpuSnapshot,
    /// Created from the first available overall-load sample.
    history:          Option<RollingWindow<f64>>,
    temp_sensor_seen: bool,
    state:            PollerState,
}

/// Background poller for CPU load, temperature and frequencies.
///
/// Each cycle reads the tick counters, sleeps for the interval (waking early
/// on shutdown), reads them again and publishes the load between the two
/// readings. The whole snapshot is replaced under one lock, so aggregate and
/// per-thread loads always come from the same cycle.
pub struct CpuLoadPoller {
    worker:      Worker,
    interval:    Duration,
    history_len: usize,
    shared:      Arc<RwLock<CpuShared>>,
    sensors:     Mutex<Option<Box<dyn CpuSensors>>>,
}

impl CpuLoadPoller {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1_000);

    pub fn new(sensors: impl CpuSensors, interval: Duration, history_len: usize) -> Self {
        Self {
            worker: Worker::new("cpu-load-poller"),
            interval,
            history_len: history_len.max(1),
            shared: Arc::new(RwLock::new(CpuShared {
                snapshot:         CpuSnapshot::default(),
                history:          None,
                temp_sensor_seen: true,
                state:            PollerState::Idle,
            })),
            sensors: Mutex::new(Some(Box::new(sensors))),
        }
    }

    pub fn from_config(config: &CpuConfig) -> Self {
        Self::new(HostCpuSensors::new(), config.interval(), config.history_len)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Copy of the latest published snapshot.
    pub fn snapshot(&self) -> CpuSnapshot {
        read(&self.shared).snapshot.clone()
    }

    /// Aggregate load in `[0, 1]`, or `None` when unavailable.
    pub fn overall_load(&self) -> Option<f64> {
        read(&self.shared).snapshot.overall_load
    }

    pub fn thread_loads(&self) -> Vec<Option<f64>> {
        read(&self.shared).snapshot.thread_loads.clone()
    }

    pub fn max_thread_load(&self) -> Option<f64> {
        read(&self.shared).snapshot.max_thread_load()
    }

    pub fn thread_count(&self) -> usize {
        read(&self.shared).snapshot.thread_count()
    }

    /// Latest temperature, or `None` once the sensor has been found missing.
    pub fn temperature_celsius(&self) -> Option<f64> {
        read(&self.shared).snapshot.temperature_celsius
    }

    pub fn temperature_sensor_available(&self) -> bool {
        read(&self.shared).temp_sensor_seen
    }

    pub fn core_frequencies_hz(&self) -> Vec<u64> {
        read(&self.shared).snapshot.core_frequencies_hz.clone()
    }

    /// Mean of the recent available overall-load samples.
    pub fn average_load(&self) -> Option<f64> {
        read(&self.shared).history.as_ref().map(RollingWindow::mean)
    }
}

impl Tracker for CpuLoadPoller {
    fn name(&self) -> &str {
        self.worker.name()
    }

    fn start(&self) -> Result<()> {
        self.worker.ensure_startable()?;
        let Some(sensors) = lock(&self.sensors).take() else {
            return Err(TelemetryError::AlreadyStarted(self.worker.name().to_string()));
        };

        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let history_len = self.history_len;

        write(&self.shared).state = PollerState::Running;
        let spawned = self
            .worker
            .spawn(move |shutdown| poll_loop(sensors, &shared, interval, history_len, &shutdown));
        if spawned.is_err() {
            write(&self.shared).state = PollerState::Stopped;
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

fn poll_loop(
    mut sensors: Box<dyn CpuSensors>,
    shared: &RwLock<CpuShared>,
    interval: Duration,
    history_len: usize,
    shutdown: &Shutdown,
) {
    let mut prev = sensors.load_ticks();
    let mut temp_sensor_seen = true;

    while !shutdown.wait_timeout(interval) {
        let current = sensors.load_ticks();

        let overall_load = Some(current.system.load_since(&prev.system)).filter(|load| *load != 0.0);
        let thread_loads: Vec<Option<f64>> = current
            .per_core
            .iter()
            .enumerate()
            .map(|(i, now)| {
                let before = prev.per_core.get(i)?;
                let elapsed = (now.busy_total() + now.idle_total())
                    .saturating_sub(before.busy_total() + before.idle_total());
                (elapsed > 0).then(|| now.load_since(before))
            })
            .collect();

        let temperature_celsius = if temp_sensor_seen {
            let celsius = sensors.temperature_celsius();
            if celsius == 0.0 || !celsius.is_finite() {
                warn!("CPU temperature sensor unavailable; no longer polling it");
                temp_sensor_seen = false;
                None
            } else {
                Some(celsius)
            }
        } else {
            None
        };

        let core_frequencies_hz = sensors.core_frequencies_hz();

        {
            let mut guard = write(shared);
            guard.snapshot = CpuSnapshot {
                thread_loads,
                overall_load,
                temperature_celsius,
                core_frequencies_hz,
                captured_at: Some(Local::now()),
            };
            guard.temp_sensor_seen = temp_sensor_seen;

            match (overall_load, guard.history.as_mut()) {
                (Some(load), Some(history)) => history.submit(load),
                (Some(load), None) => guard.history = Some(RollingWindow::new(history_len, load)),
                (None, _) => {}
            }

            guard.state = if overall_load.is_some() {
                PollerState::Running
            } else {
                PollerState::Degraded
            };
        }

        debug!(?overall_load, ?temperature_celsius, "CPU poll cycle");
        prev = current;
    }

    write(shared).state = PollerState::Stopped;
}
