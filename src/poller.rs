//! Background poll scheduler.
//!
//! The [`Poller`] runs one long-lived tokio task per session. Every cycle it
//! walks the poll levels in ascending order, reads the areas of each level
//! that is due according to its [`SkipPolicy`], and then sends a heartbeat
//! if one is due. The first cycle after a start reads every level.
//!
//! # States
//!
//! ```text
//!            Start              Pause             cycle done
//! Stopped ---------> Running ---------> Pausing ------------> Paused
//!    ^                  ^  ^                |                    |
//!    |                  |  +---- Resume ----+                    |
//!    |                  +------------------ Resume --------------+
//!    +------------------------- Stop (any state) ----------------+
//! ```
//!
//! All transitions go through [`PollState::apply`]; anything else is an
//! [`MewtocolError::InvalidStateTransition`].
//!
//! # Example
//!
//! ```
//! use mewtocol::poller::{PollEvent, PollState};
//!
//! let state = PollState::Stopped.apply(PollEvent::Start).unwrap();
//! assert_eq!(state, PollState::Running);
//! assert!(PollState::Stopped.apply(PollEvent::Resume).is_err());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::error::{MewtocolError, Result};
use crate::manager::ReadTarget;

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Default pause between two cycles.
pub const DEFAULT_CYCLE_DELAY: Duration = Duration::from_millis(10);

/// Lifecycle state of the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// No task is running.
    Stopped,
    /// Cycles are executing.
    Running,
    /// A pause was requested; the current cycle is finishing.
    Pausing,
    /// The task is idle until resumed or stopped.
    Paused,
}

/// Input to [`PollState::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// Spawn the task.
    Start,
    /// Request a pause after the current cycle.
    Pause,
    /// The task finished a cycle (or noticed the pause request between cycles).
    CycleFinished,
    /// Continue polling.
    Resume,
    /// Stop at the next check.
    Stop,
}

impl PollState {
    /// Computes the state after `event`.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidStateTransition` for events the state
    /// does not accept, such as resuming a stopped poller.
    pub fn apply(self, event: PollEvent) -> Result<PollState> {
        use PollEvent as E;
        use PollState as S;

        match (self, event) {
            (_, E::Stop) => Ok(S::Stopped),
            (S::Stopped, E::Start) => Ok(S::Running),
            (S::Running, E::Pause) => Ok(S::Pausing),
            (S::Pausing | S::Paused, E::Pause) => Ok(self),
            (S::Pausing, E::CycleFinished) => Ok(S::Paused),
            (S::Running | S::Paused, E::CycleFinished) => Ok(self),
            (S::Running | S::Pausing | S::Paused, E::Resume) => Ok(S::Running),
            (from, event) => Err(MewtocolError::InvalidStateTransition {
                from: from.name(),
                event: event.name(),
            }),
        }
    }

    fn name(self) -> &'static str {
        match self {
            PollState::Stopped => "Stopped",
            PollState::Running => "Running",
            PollState::Pausing => "Pausing",
            PollState::Paused => "Paused",
        }
    }
}

impl PollEvent {
    fn name(self) -> &'static str {
        match self {
            PollEvent::Start => "Start",
            PollEvent::Pause => "Pause",
            PollEvent::CycleFinished => "CycleFinished",
            PollEvent::Resume => "Resume",
            PollEvent::Stop => "Stop",
        }
    }
}

/// When a poll level is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipPolicy {
    /// Every cycle.
    EveryCycle,
    /// Every n-th cycle, counting the first cycle as cycle 0.
    EveryNthCycle(u32),
    /// When at least this long has passed since the level was last read.
    MinInterval(Duration),
    /// Only on the first cycle after start and on explicit polls.
    OnDemand,
}

impl SkipPolicy {
    /// Whether the level needs refreshing beyond the first cycle.
    pub fn is_continuous(&self) -> bool {
        !matches!(self, SkipPolicy::OnDemand)
    }

    /// Whether the level is read in cycle `cycle`.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Instant;
    /// use mewtocol::poller::SkipPolicy;
    ///
    /// let now = Instant::now();
    /// let every_third = SkipPolicy::EveryNthCycle(3);
    /// assert!(every_third.is_due(3, None, now));
    /// assert!(!every_third.is_due(4, None, now));
    /// ```
    pub fn is_due(&self, cycle: u64, last_read: Option<Instant>, now: Instant) -> bool {
        match self {
            SkipPolicy::EveryCycle => true,
            SkipPolicy::EveryNthCycle(n) => *n <= 1 || cycle % u64::from(*n) == 0,
            SkipPolicy::MinInterval(interval) => {
                last_read.map_or(true, |t| now.saturating_duration_since(t) >= *interval)
            }
            SkipPolicy::OnDemand => false,
        }
    }
}

/// Poller configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Explicit policies; levels without one use [`PollerConfig::policy_for`]'s default.
    pub levels: BTreeMap<u32, SkipPolicy>,
    /// Pause between cycles.
    pub cycle_delay: Duration,
    /// Interval between `RT` heartbeats.
    pub heartbeat_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            levels: BTreeMap::new(),
            cycle_delay: DEFAULT_CYCLE_DELAY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl PollerConfig {
    /// Sets the policy of one level.
    pub fn with_level_policy(mut self, level: u32, policy: SkipPolicy) -> Self {
        self.levels.insert(level, policy);
        self
    }

    /// Sets the pause between cycles.
    pub fn with_cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay = delay;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Policy of a level: the configured one, else level `n` is read every
    /// n-th cycle.
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::poller::{PollerConfig, SkipPolicy};
    ///
    /// let config = PollerConfig::default();
    /// assert_eq!(config.policy_for(1), SkipPolicy::EveryCycle);
    /// assert_eq!(config.policy_for(4), SkipPolicy::EveryNthCycle(4));
    /// ```
    pub fn policy_for(&self, level: u32) -> SkipPolicy {
        match self.levels.get(&level) {
            Some(policy) => *policy,
            None if level <= 1 => SkipPolicy::EveryCycle,
            None => SkipPolicy::EveryNthCycle(level),
        }
    }
}

/// Counters of the poll loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    /// Completed cycles since start.
    pub cycles: u64,
    /// Duration of the last completed cycle.
    pub last_cycle_duration: Duration,
    /// Area reads performed.
    pub reads: u64,
    /// Area reads that failed without tearing the session down.
    pub failed_reads: u64,
    /// Heartbeats sent.
    pub heartbeats: u64,
}

/// What the poller drives: the session in production, mocks in tests.
#[async_trait]
pub trait PollTarget: Send + Sync {
    /// Levels that currently hold registers, ascending.
    fn levels(&self) -> Vec<u32>;

    /// Reads to perform for one level.
    fn read_plan(&self, level: u32) -> Vec<ReadTarget>;

    /// Performs one read and redistributes its bytes.
    async fn read_target(&self, target: &ReadTarget) -> Result<()>;

    /// Confirms the PLC still answers.
    async fn heartbeat(&self) -> Result<()>;

    /// Called once when the loop ends on a transport fault.
    async fn on_fault(&self, error: MewtocolError);
}

struct Inner {
    config: PollerConfig,
    state: watch::Sender<PollState>,
    first_cycle: watch::Sender<bool>,
    stats: Mutex<PollerStats>,
    generation: AtomicU64,
}

impl Inner {
    fn transition(&self, event: PollEvent) -> Result<PollState> {
        let mut outcome = Ok(PollState::Stopped);
        self.state.send_if_modified(|state| match state.apply(event) {
            Ok(next) => {
                let changed = next != *state;
                *state = next;
                outcome = Ok(next);
                changed
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    /// A task started before the latest `start` must not touch shared state.
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, PollerStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle of the poll task.
pub struct Poller {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// Creates a stopped poller.
    pub fn new(config: PollerConfig) -> Self {
        let (state, _) = watch::channel(PollState::Stopped);
        let (first_cycle, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                state,
                first_cycle,
                stats: Mutex::new(PollerStats::default()),
                generation: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &PollerConfig {
        &self.inner.config
    }

    /// Current state.
    pub fn state(&self) -> PollState {
        *self.inner.state.borrow()
    }

    /// Snapshot of the loop counters.
    pub fn stats(&self) -> PollerStats {
        *self.inner.stats()
    }

    /// Spawns the poll task. Does nothing if it is already running.
    ///
    /// A task still finishing its last cycle after a stop is detached and
    /// exits at its next state check.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidParameter` outside a tokio runtime.
    pub fn start(&self, target: Arc<dyn PollTarget>) -> Result<()> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state() != PollState::Stopped {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            MewtocolError::invalid_parameter("runtime", "polling needs a tokio runtime")
        })?;
        self.inner.transition(PollEvent::Start)?;
        self.inner.first_cycle.send_replace(false);
        *self.inner.stats() = PollerStats::default();
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *task = Some(runtime.spawn(run(self.inner.clone(), target, generation)));
        Ok(())
    }

    /// Requests a stop without waiting for the task.
    ///
    /// Safe to call from inside the poll task.
    pub fn signal_stop(&self) {
        let _ = self.inner.transition(PollEvent::Stop);
    }

    /// Stops the task and waits for its in-flight cycle to finish.
    pub async fn stop(&self) {
        self.signal_stop();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // a panicked poll task has nothing left to clean up
            let _ = handle.await;
        }
    }

    /// Pauses after the current cycle and waits until the task is idle.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidStateTransition` if the poller is stopped.
    pub async fn pause(&self) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        self.inner.transition(PollEvent::Pause)?;
        rx.wait_for(|s| matches!(s, PollState::Paused | PollState::Stopped))
            .await
            .map_err(|_| MewtocolError::NotConnected)?;
        Ok(())
    }

    /// Resumes a paused poller.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidStateTransition` if the poller is stopped.
    pub fn resume(&self) -> Result<()> {
        self.inner.transition(PollEvent::Resume).map(|_| ())
    }

    /// Waits until the first cycle after the last start has completed.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::NotConnected` if the poller stops first.
    pub async fn wait_first_cycle(&self) -> Result<()> {
        let mut first = self.inner.first_cycle.subscribe();
        let mut state = self.inner.state.subscribe();
        loop {
            if *first.borrow_and_update() {
                return Ok(());
            }
            if *state.borrow_and_update() == PollState::Stopped {
                return Err(MewtocolError::NotConnected);
            }
            tokio::select! {
                changed = first.changed() => changed.map_err(|_| MewtocolError::NotConnected)?,
                changed = state.changed() => changed.map_err(|_| MewtocolError::NotConnected)?,
            }
        }
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

async fn run(inner: Arc<Inner>, target: Arc<dyn PollTarget>, generation: u64) {
    let mut state_rx = inner.state.subscribe();
    let mut cycle: u64 = 0;
    let mut last_read: HashMap<u32, Instant> = HashMap::new();
    let mut last_heartbeat: Option<Instant> = None;
    info!("poller started");

    loop {
        let state = *state_rx.borrow_and_update();
        if !inner.is_current(generation) {
            break;
        }
        match state {
            PollState::Stopped => break,
            PollState::Pausing => {
                let _ = inner.transition(PollEvent::CycleFinished);
                continue;
            }
            PollState::Paused => {
                if state_rx.changed().await.is_err() {
                    break;
                }
                continue;
            }
            PollState::Running => {}
        }

        let started = Instant::now();
        let first = cycle == 0;
        let mut fault = None;

        'levels: for level in target.levels() {
            let policy = inner.config.policy_for(level);
            if !first && !policy.is_due(cycle, last_read.get(&level).copied(), started) {
                trace!(level, "level skipped");
                continue;
            }
            for read in target.read_plan(level) {
                let result = target.read_target(&read).await;
                let mut stats = inner.stats();
                stats.reads += 1;
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_transport_fault() => {
                        stats.failed_reads += 1;
                        fault = Some(e);
                        break 'levels;
                    }
                    Err(e) => {
                        stats.failed_reads += 1;
                        drop(stats);
                        warn!(area = %read, error = %e, "poll read failed");
                    }
                }
            }
            last_read.insert(level, started);
        }

        if fault.is_none() {
            let due = first
                || last_heartbeat.map_or(true, |t| {
                    started.saturating_duration_since(t) >= inner.config.heartbeat_interval
                });
            if due {
                inner.stats().heartbeats += 1;
                match target.heartbeat().await {
                    Ok(()) => last_heartbeat = Some(Instant::now()),
                    Err(e) => {
                        warn!(error = %e, "heartbeat failed");
                        fault = Some(if e.is_transport_fault() {
                            e
                        } else {
                            MewtocolError::connection_lost(format!("heartbeat failed: {e}"))
                        });
                    }
                }
            }
        }

        if let Some(error) = fault {
            if inner.is_current(generation) {
                let _ = inner.transition(PollEvent::Stop);
                target.on_fault(error).await;
            }
            break;
        }
        if !inner.is_current(generation) {
            break;
        }

        cycle += 1;
        let elapsed = started.elapsed();
        {
            let mut stats = inner.stats();
            stats.cycles = cycle;
            stats.last_cycle_duration = elapsed;
        }
        if first {
            inner.first_cycle.send_replace(true);
        }
        trace!(cycle, elapsed_us = elapsed.as_micros() as u64, "poll cycle finished");

        let continuous = target
            .levels()
            .iter()
            .any(|level| inner.config.policy_for(*level).is_continuous());
        if !continuous {
            info!("no level needs continuous polling");
            let _ = inner.transition(PollEvent::Stop);
            break;
        }

        if inner.config.cycle_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = tokio::time::sleep(inner.config.cycle_delay) => {}
                _ = state_rx.changed() => {}
            }
        }
    }

    info!(cycles = cycle, "poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClass;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockTarget {
        levels: Vec<u32>,
        reads: Mutex<HashMap<u32, usize>>,
        fail_reads_with_fault: AtomicBool,
        fail_reads_with_timeout: AtomicBool,
        fail_heartbeat: AtomicBool,
        faults: AtomicUsize,
    }

    impl MockTarget {
        fn with_levels(levels: Vec<u32>) -> Arc<Self> {
            Arc::new(Self {
                levels,
                ..Default::default()
            })
        }

        fn reads(&self, level: u32) -> usize {
            self.reads.lock().unwrap().get(&level).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl PollTarget for MockTarget {
        fn levels(&self) -> Vec<u32> {
            self.levels.clone()
        }

        fn read_plan(&self, level: u32) -> Vec<ReadTarget> {
            vec![ReadTarget::Relay {
                level,
                class: MemoryClass::R,
                address: 0,
            }]
        }

        async fn read_target(&self, target: &ReadTarget) -> Result<()> {
            *self.reads.lock().unwrap().entry(target.level()).or_default() += 1;
            if self.fail_reads_with_fault.load(Ordering::SeqCst) {
                return Err(MewtocolError::connection_lost("mock"));
            }
            if self.fail_reads_with_timeout.load(Ordering::SeqCst) {
                return Err(MewtocolError::Timeout);
            }
            Ok(())
        }

        async fn heartbeat(&self) -> Result<()> {
            if self.fail_heartbeat.load(Ordering::SeqCst) {
                Err(MewtocolError::Timeout)
            } else {
                Ok(())
            }
        }

        async fn on_fault(&self, _error: MewtocolError) {
            self.faults.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast() -> PollerConfig {
        PollerConfig::default().with_cycle_delay(Duration::from_millis(1))
    }

    async fn wait_cycles(poller: &Poller, cycles: u64) {
        while poller.stats().cycles < cycles {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[test]
    fn test_state_transitions() {
        use PollEvent as E;
        use PollState as S;

        assert_eq!(S::Stopped.apply(E::Start).unwrap(), S::Running);
        assert_eq!(S::Running.apply(E::Pause).unwrap(), S::Pausing);
        assert_eq!(S::Pausing.apply(E::CycleFinished).unwrap(), S::Paused);
        assert_eq!(S::Paused.apply(E::Resume).unwrap(), S::Running);
        assert_eq!(S::Pausing.apply(E::Resume).unwrap(), S::Running);
        assert_eq!(S::Paused.apply(E::Stop).unwrap(), S::Stopped);
        assert_eq!(S::Stopped.apply(E::Stop).unwrap(), S::Stopped);

        assert!(S::Running.apply(E::Start).is_err());
        assert!(S::Stopped.apply(E::Pause).is_err());
        let err = S::Stopped.apply(E::Resume).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid poller transition from Stopped on Resume"
        );
    }

    #[test]
    fn test_skip_policies() {
        let now = Instant::now();
        assert!(SkipPolicy::EveryCycle.is_due(7, None, now));
        assert!(SkipPolicy::EveryNthCycle(1).is_due(7, None, now));
        assert!(SkipPolicy::EveryNthCycle(2).is_due(0, None, now));
        assert!(!SkipPolicy::EveryNthCycle(2).is_due(1, None, now));
        assert!(!SkipPolicy::OnDemand.is_due(0, None, now));

        let interval = SkipPolicy::MinInterval(Duration::from_secs(10));
        assert!(interval.is_due(1, None, now));
        assert!(!interval.is_due(1, Some(now), now));
        assert!(interval.is_due(1, Some(now), now + Duration::from_secs(10)));

        assert!(SkipPolicy::MinInterval(Duration::ZERO).is_continuous());
        assert!(!SkipPolicy::OnDemand.is_continuous());
    }

    #[tokio::test]
    async fn test_levels_follow_their_cadence() {
        let target = MockTarget::with_levels(vec![1, 3]);
        let poller = Poller::new(fast());
        poller.start(target.clone()).unwrap();
        poller.wait_first_cycle().await.unwrap();
        wait_cycles(&poller, 7).await;
        poller.stop().await;

        let cycles = poller.stats().cycles as usize;
        assert_eq!(target.reads(1), cycles);
        // cycles 0, 3, 6, ...
        assert_eq!(target.reads(3), (cycles + 2) / 3);
        assert_eq!(poller.state(), PollState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_right_after_stop_signal() {
        let target = MockTarget::with_levels(vec![1]);
        let poller = Poller::new(fast());
        poller.start(target.clone()).unwrap();
        poller.wait_first_cycle().await.unwrap();

        poller.signal_stop();
        poller.start(target.clone()).unwrap();
        assert_eq!(poller.state(), PollState::Running);
        poller.wait_first_cycle().await.unwrap();
        wait_cycles(&poller, 3).await;

        poller.stop().await;
        assert_eq!(poller.state(), PollState::Stopped);
    }

    #[tokio::test]
    async fn test_pause_waits_for_cycle_and_resume_continues() {
        let target = MockTarget::with_levels(vec![1]);
        let poller = Poller::new(fast());
        poller.start(target.clone()).unwrap();
        wait_cycles(&poller, 2).await;

        poller.pause().await.unwrap();
        assert_eq!(poller.state(), PollState::Paused);
        let paused_at = target.reads(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(target.reads(1), paused_at);

        poller.resume().unwrap();
        let resumed_from = poller.stats().cycles;
        wait_cycles(&poller, resumed_from + 2).await;
        assert!(target.reads(1) > paused_at);
        poller.stop().await;
    }

    #[tokio::test]
    async fn test_on_demand_only_stops_after_first_cycle() {
        let target = MockTarget::with_levels(vec![1]);
        let poller = Poller::new(fast().with_level_policy(1, SkipPolicy::OnDemand));
        poller.start(target.clone()).unwrap();
        poller.wait_first_cycle().await.unwrap();
        poller.stop().await;
        assert_eq!(target.reads(1), 1);
        assert_eq!(poller.stats().cycles, 1);
    }

    #[tokio::test]
    async fn test_timeouts_do_not_stop_the_loop() {
        let target = MockTarget::with_levels(vec![1]);
        target.fail_reads_with_timeout.store(true, Ordering::SeqCst);
        let poller = Poller::new(fast());
        poller.start(target.clone()).unwrap();
        wait_cycles(&poller, 3).await;
        assert_eq!(poller.state(), PollState::Running);
        assert!(poller.stats().failed_reads >= 3);
        poller.stop().await;
        assert_eq!(target.faults.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_fault_ends_loop() {
        let target = MockTarget::with_levels(vec![1]);
        target.fail_reads_with_fault.store(true, Ordering::SeqCst);
        let poller = Poller::new(fast());
        poller.start(target.clone()).unwrap();
        assert!(poller.wait_first_cycle().await.is_err());
        poller.stop().await;
        assert_eq!(target.faults.load(Ordering::SeqCst), 1);
        assert_eq!(poller.state(), PollState::Stopped);
    }

    #[tokio::test]
    async fn test_heartbeat_failure_is_a_fault() {
        let target = MockTarget::with_levels(vec![1]);
        target.fail_heartbeat.store(true, Ordering::SeqCst);
        let poller = Poller::new(fast());
        poller.start(target.clone()).unwrap();
        assert!(poller.wait_first_cycle().await.is_err());
        poller.stop().await;
        assert_eq!(target.reads(1), 1);
        assert_eq!(poller.stats().heartbeats, 1);
        assert_eq!(target.faults.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pause_requires_running_poller() {
        let poller = Poller::new(fast());
        assert!(poller.pause().await.is_err());
        assert!(poller.resume().is_err());
        assert!(poller.wait_first_cycle().await.is_err());
    }
}
