//! Cooperative task registry multiplexed onto a single periodic tick.
//!
//! Every registered task carries an elapsed-time accumulator (`position`) and a
//! delay (`target`). Each tick advances every accumulator by the tick period and
//! dispatches the tasks whose accumulator has passed their target. A task's
//! [`TaskOutcome`] decides whether it is re-armed or dropped.
//!
//! Tasks are identified twice: by an application-defined key `K` that selects
//! the code to run (dispatched through a [`TaskRunner`]) and by the
//! [`TaskHandle`] minted for each registration. Registry requests made while a
//! tick is in progress go through the [`TickContext`] and are applied once the
//! pass over the task list has finished.

use core::{fmt, time::Duration};

use heapless::Vec;

use crate::telemetry::{EventLog, SchedulerEvent};

/// Default number of tasks a [`Scheduler`] can hold.
pub const MAX_TASKS: usize = 16;

/// Registry requests that may be queued from inside a single tick.
pub const MAX_PENDING_CHANGES: usize = 16;

/// Shortest tick period accepted by [`Scheduler::activate`].
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Opaque identifier of one task registration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskHandle(u32);

impl TaskHandle {
    /// Builds a handle from its numeric id, as shown by `Display`.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a task counts toward the idle-time calculation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    /// Ignored by [`Scheduler::idle_time`]; used for housekeeping such as the
    /// power manager and the service draw driver.
    Hidden,
}

/// What the registry should do with a task after it ran.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskOutcome {
    /// Re-arm the task: `position` resets to zero and `target` becomes the value.
    /// A zero duration is treated as [`TaskOutcome::Remove`].
    RescheduleAfter(Duration),
    Remove,
}

impl TaskOutcome {
    /// Builds an outcome from a millisecond interval, where zero means remove.
    #[must_use]
    pub const fn after_millis(millis: u64) -> Self {
        if millis == 0 {
            TaskOutcome::Remove
        } else {
            TaskOutcome::RescheduleAfter(Duration::from_millis(millis))
        }
    }

    /// Returns the next target, or `None` when the task should be removed.
    #[must_use]
    pub const fn next_target(self) -> Option<Duration> {
        match self {
            TaskOutcome::RescheduleAfter(target) if !target.is_zero() => Some(target),
            _ => None,
        }
    }
}

/// Failure reported by a task in place of an outcome. The task is removed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskFault {
    pub reason: &'static str,
}

impl TaskFault {
    #[must_use]
    pub const fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

impl fmt::Display for TaskFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason)
    }
}

/// Time until the next visible task is due.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IdleTime {
    For(Duration),
    /// No visible task is registered.
    Forever,
}

impl IdleTime {
    /// Returns `true` when the idle period is longer than `ceiling`.
    #[must_use]
    pub fn exceeds(self, ceiling: Duration) -> bool {
        match self {
            IdleTime::For(duration) => duration > ceiling,
            IdleTime::Forever => true,
        }
    }

    #[must_use]
    pub const fn as_duration(self) -> Option<Duration> {
        match self {
            IdleTime::For(duration) => Some(duration),
            IdleTime::Forever => None,
        }
    }

    fn min_with(self, remaining: Duration) -> Self {
        match self {
            IdleTime::For(current) if current <= remaining => self,
            _ => IdleTime::For(remaining),
        }
    }
}

impl fmt::Display for IdleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdleTime::For(duration) => write!(f, "{}ms", duration.as_millis()),
            IdleTime::Forever => f.write_str("forever"),
        }
    }
}

/// Registry errors surfaced to callers of `add`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedulerError {
    /// Every task slot is occupied.
    RegistryFull,
    /// Too many registry requests were queued during the current tick.
    ChangesetFull,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::RegistryFull => f.write_str("task registry full"),
            SchedulerError::ChangesetFull => f.write_str("too many registry changes in one tick"),
        }
    }
}

/// One registered task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskEntry<K> {
    handle: TaskHandle,
    key: K,
    position: Duration,
    target: Duration,
    visibility: Visibility,
}

impl<K: Copy> TaskEntry<K> {
    const fn new(handle: TaskHandle, key: K, target: Duration, visibility: Visibility) -> Self {
        Self {
            handle,
            key,
            position: Duration::ZERO,
            target,
            visibility,
        }
    }

    #[must_use]
    pub const fn handle(&self) -> TaskHandle {
        self.handle
    }

    #[must_use]
    pub const fn key(&self) -> K {
        self.key
    }

    /// Time accumulated since the task was registered or last re-armed.
    #[must_use]
    pub const fn position(&self) -> Duration {
        self.position
    }

    #[must_use]
    pub const fn target(&self) -> Duration {
        self.target
    }

    #[must_use]
    pub const fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// A task is due once its accumulator strictly exceeds its target.
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.position > self.target
    }

    /// Time left until the task is due, clamped to zero.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.target.saturating_sub(self.position)
    }

    fn rearmed(self, target: Duration) -> Self {
        Self {
            position: Duration::ZERO,
            target,
            ..self
        }
    }
}

fn idle_over<K: Copy>(entries: impl Iterator<Item = TaskEntry<K>>) -> IdleTime {
    entries
        .filter(|entry| entry.visibility == Visibility::Visible)
        .fold(IdleTime::Forever, |idle, entry| idle.min_with(entry.remaining()))
}

/// Hardware periodic interrupt (or host equivalent) that drives [`Scheduler::tick`].
pub trait TickSource {
    /// (Re)starts periodic ticks at `period`.
    fn start(&mut self, period: Duration);

    /// Stops delivering ticks.
    fn stop(&mut self);
}

/// Tick source for callers that drive `tick` manually.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NoopTickSource;

impl TickSource for NoopTickSource {
    fn start(&mut self, _period: Duration) {}

    fn stop(&mut self) {}
}

/// Registry operations available both between ticks ([`Scheduler`]) and from
/// inside a running task ([`TickContext`]).
pub trait TaskRegistry<K> {
    /// Registers a task that becomes due once `target` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::RegistryFull`] when no slot is free, or
    /// [`SchedulerError::ChangesetFull`] when called mid-tick with the pending
    /// request buffer exhausted.
    fn add(
        &mut self,
        key: K,
        target: Duration,
        visibility: Visibility,
    ) -> Result<TaskHandle, SchedulerError>;

    /// Resets the task's accumulator and sets a new target. Returns `false`
    /// without touching the registry when the handle is unknown, or mid-tick
    /// when the request cannot be queued.
    fn update(&mut self, handle: TaskHandle, target: Duration) -> bool;

    /// Removes the task. Returns whether one was removed.
    fn delete(&mut self, handle: TaskHandle) -> bool;

    /// Whether `handle` names a live task. Mid-tick this reflects the
    /// requests queued so far.
    fn contains(&self, handle: TaskHandle) -> bool;

    /// Time until the next visible task is due.
    fn idle_time(&self) -> IdleTime;
}

/// Executes the code associated with a task key.
pub trait TaskRunner<K> {
    /// Runs the task identified by `key`.
    ///
    /// # Errors
    ///
    /// A [`TaskFault`] removes the task from the registry.
    fn run(&mut self, key: K, cx: &mut TickContext<'_, K>) -> Result<TaskOutcome, TaskFault>;
}

/// Counters describing one processed tick.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TickReport {
    pub fired: u16,
    pub rescheduled: u16,
    pub removed: u16,
    pub faulted: u16,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Settled {
    Rearm(Duration),
    Remove,
    Fault,
}

#[derive(Copy, Clone, Debug)]
enum Change<K> {
    Add(TaskEntry<K>),
    Retarget(TaskHandle, Duration),
    Delete(TaskHandle),
}

/// Registry view handed to a task while a tick is in progress.
///
/// Requests are queued and applied in issue order after every due task in the
/// tick has run. Tasks added here never fire during the current tick.
pub struct TickContext<'a, K> {
    tasks: &'a [TaskEntry<K>],
    settled: &'a [Option<Settled>],
    changes: &'a mut Vec<Change<K>, MAX_PENDING_CHANGES>,
    next_handle: &'a mut u32,
    capacity: usize,
}

impl<K: Copy> TickContext<'_, K> {
    fn surviving(&self) -> impl Iterator<Item = TaskEntry<K>> + '_ {
        let snapshot = self
            .tasks
            .iter()
            .zip(self.settled)
            .filter_map(|(entry, settled)| match settled {
                None => Some(*entry),
                Some(Settled::Rearm(target)) => Some(entry.rearmed(*target)),
                Some(Settled::Remove | Settled::Fault) => None,
            });
        let added = self.changes.iter().filter_map(|change| match change {
            Change::Add(entry) => Some(*entry),
            _ => None,
        });

        snapshot.chain(added).filter_map(|entry| {
            self.changes
                .iter()
                .try_fold(entry, |entry, change| match *change {
                    Change::Retarget(handle, target) if handle == entry.handle => {
                        Some(entry.rearmed(target))
                    }
                    Change::Delete(handle) if handle == entry.handle => None,
                    _ => Some(entry),
                })
        })
    }

    fn is_live(&self, handle: TaskHandle) -> bool {
        self.surviving().any(|entry| entry.handle == handle)
    }

    fn queue(&mut self, change: Change<K>) -> Result<(), SchedulerError> {
        self.changes
            .push(change)
            .map_err(|_| SchedulerError::ChangesetFull)
    }

    /// Queues a change to a live task; `false` when the handle is unknown or
    /// the changeset is full.
    fn queue_for(&mut self, handle: TaskHandle, change: Change<K>) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        match self.queue(change) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("request for task {handle} dropped: {err}");
                false
            }
        }
    }
}

impl<K: Copy + fmt::Debug> TaskRegistry<K> for TickContext<'_, K> {
    fn add(
        &mut self,
        key: K,
        target: Duration,
        visibility: Visibility,
    ) -> Result<TaskHandle, SchedulerError> {
        // Tasks still due later in this pass may yet remove themselves; count
        // them as occupied.
        let occupied = self
            .tasks
            .iter()
            .zip(self.settled)
            .filter(|(_, settled)| !matches!(settled, Some(Settled::Remove | Settled::Fault)))
            .count()
            + self
                .changes
                .iter()
                .filter(|change| matches!(change, Change::Add(_)))
                .count();
        if occupied >= self.capacity {
            return Err(SchedulerError::RegistryFull);
        }

        let handle = mint_handle(self.next_handle);
        self.queue(Change::Add(TaskEntry::new(handle, key, target, visibility)))?;
        log::debug!("task {handle} {key:?} queued for {}ms", target.as_millis());
        Ok(handle)
    }

    fn update(&mut self, handle: TaskHandle, target: Duration) -> bool {
        self.queue_for(handle, Change::Retarget(handle, target))
    }

    fn delete(&mut self, handle: TaskHandle) -> bool {
        self.queue_for(handle, Change::Delete(handle))
    }

    fn contains(&self, handle: TaskHandle) -> bool {
        self.is_live(handle)
    }

    fn idle_time(&self) -> IdleTime {
        idle_over(self.surviving())
    }
}

fn mint_handle(next: &mut u32) -> TaskHandle {
    let handle = TaskHandle(*next);
    *next = next.wrapping_add(1).max(1);
    handle
}

/// Task registry driven by a [`TickSource`].
pub struct Scheduler<K, T, const N: usize = MAX_TASKS> {
    tasks: Vec<TaskEntry<K>, N>,
    tick_source: T,
    period: Duration,
    active: bool,
    next_handle: u32,
    uptime: Duration,
    events: EventLog<K>,
}

impl<K, T, const N: usize> Scheduler<K, T, N>
where
    K: Copy + fmt::Debug,
    T: TickSource,
{
    /// Creates an empty, inactive registry.
    #[must_use]
    pub const fn new(tick_source: T) -> Self {
        Self {
            tasks: Vec::new(),
            tick_source,
            period: Duration::ZERO,
            active: false,
            next_handle: 1,
            uptime: Duration::ZERO,
            events: EventLog::new(),
        }
    }

    /// Starts (or restarts) the tick source at `period`.
    ///
    /// Periods shorter than [`MIN_TICK_PERIOD`] are ignored and `false` is
    /// returned; the previous configuration stays in place.
    pub fn activate(&mut self, period: Duration) -> bool {
        if period < MIN_TICK_PERIOD {
            log::warn!("ignoring tick period of {}us", period.as_micros());
            return false;
        }

        self.tick_source.start(period);
        self.period = period;
        self.active = true;
        log::info!("scheduler ticking every {}ms", period.as_millis());
        true
    }

    /// Stops the tick source. Registered tasks are kept and resume on the
    /// next [`activate`](Self::activate).
    pub fn stop(&mut self) {
        self.tick_source.stop();
        self.active = false;
        log::info!("scheduler stopped with {} tasks", self.tasks.len());
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Sum of all processed tick periods.
    #[must_use]
    pub const fn uptime(&self) -> Duration {
        self.uptime
    }

    #[must_use]
    pub fn tasks(&self) -> &[TaskEntry<K>] {
        &self.tasks
    }

    #[must_use]
    pub fn get(&self, handle: TaskHandle) -> Option<&TaskEntry<K>> {
        self.tasks.iter().find(|entry| entry.handle == handle)
    }

    /// Returns the handle of the first task registered with `key`.
    #[must_use]
    pub fn handle_of(&self, key: K) -> Option<TaskHandle>
    where
        K: PartialEq,
    {
        self.tasks
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[must_use]
    pub const fn events(&self) -> &EventLog<K> {
        &self.events
    }

    #[must_use]
    pub const fn tick_source(&self) -> &T {
        &self.tick_source
    }

    /// Processes one timer interrupt.
    ///
    /// Advances every task by the tick period, runs each due task once in
    /// registration order, then applies the outcomes followed by any registry
    /// requests the tasks queued. Does nothing while the scheduler is stopped.
    pub fn tick<R: TaskRunner<K>>(&mut self, runner: &mut R) -> TickReport {
        let mut report = TickReport::default();
        if !self.active {
            return report;
        }

        let period = self.period;
        self.uptime = self.uptime.saturating_add(period);
        for entry in &mut self.tasks {
            entry.position = entry.position.saturating_add(period);
        }

        let mut tasks = core::mem::take(&mut self.tasks);
        let mut settled: Vec<Option<Settled>, N> = tasks.iter().map(|_| None).collect();
        let mut changes: Vec<Change<K>, MAX_PENDING_CHANGES> = Vec::new();

        for index in 0..tasks.len() {
            let entry = tasks[index];
            if !entry.is_due() {
                continue;
            }

            report.fired = report.fired.saturating_add(1);
            let result = {
                let mut cx = TickContext {
                    tasks: &tasks,
                    settled: &settled,
                    changes: &mut changes,
                    next_handle: &mut self.next_handle,
                    capacity: N,
                };
                runner.run(entry.key, &mut cx)
            };

            settled[index] = Some(match result {
                Ok(outcome) => match outcome.next_target() {
                    Some(target) => {
                        report.rescheduled = report.rescheduled.saturating_add(1);
                        Settled::Rearm(target)
                    }
                    None => {
                        report.removed = report.removed.saturating_add(1);
                        log::debug!("task {} {:?} completed", entry.handle, entry.key);
                        self.events.record(
                            self.uptime,
                            SchedulerEvent::Completed {
                                handle: entry.handle,
                                key: entry.key,
                            },
                        );
                        Settled::Remove
                    }
                },
                Err(fault) => {
                    report.faulted = report.faulted.saturating_add(1);
                    log::warn!("task {} {:?} faulted: {fault}", entry.handle, entry.key);
                    self.events.record(
                        self.uptime,
                        SchedulerEvent::Faulted {
                            handle: entry.handle,
                            key: entry.key,
                            fault,
                        },
                    );
                    Settled::Fault
                }
            });
        }

        let mut slot = 0;
        tasks.retain_mut(|entry| {
            let outcome = settled[slot];
            slot += 1;
            match outcome {
                None => true,
                Some(Settled::Rearm(target)) => {
                    *entry = entry.rearmed(target);
                    true
                }
                Some(Settled::Remove | Settled::Fault) => false,
            }
        });
        self.tasks = tasks;

        for change in changes {
            self.apply(change);
        }

        report
    }

    fn apply(&mut self, change: Change<K>) {
        match change {
            Change::Add(entry) => {
                if self.tasks.push(entry).is_ok() {
                    self.events.record(
                        self.uptime,
                        SchedulerEvent::Added {
                            handle: entry.handle,
                            key: entry.key,
                        },
                    );
                } else {
                    log::warn!(
                        "dropping queued task {} {:?}: registry full",
                        entry.handle,
                        entry.key
                    );
                }
            }
            Change::Retarget(handle, target) => {
                self.retarget(handle, target);
            }
            Change::Delete(handle) => {
                self.remove(handle);
            }
        }
    }

    fn retarget(&mut self, handle: TaskHandle, target: Duration) -> bool {
        let Some(entry) = self.tasks.iter_mut().find(|entry| entry.handle == handle) else {
            return false;
        };
        *entry = entry.rearmed(target);
        self.events
            .record(self.uptime, SchedulerEvent::Retargeted { handle, target });
        true
    }

    fn remove(&mut self, handle: TaskHandle) -> bool {
        let Some(index) = self.tasks.iter().position(|entry| entry.handle == handle) else {
            return false;
        };
        let entry = self.tasks.remove(index);
        log::debug!("task {handle} {:?} deleted", entry.key);
        self.events
            .record(self.uptime, SchedulerEvent::Deleted { handle });
        true
    }
}

impl<K, T, const N: usize> TaskRegistry<K> for Scheduler<K, T, N>
where
    K: Copy + fmt::Debug,
    T: TickSource,
{
    fn add(
        &mut self,
        key: K,
        target: Duration,
        visibility: Visibility,
    ) -> Result<TaskHandle, SchedulerError> {
        if self.tasks.is_full() {
            log::warn!("cannot register {key:?}: registry full");
            return Err(SchedulerError::RegistryFull);
        }

        let handle = mint_handle(&mut self.next_handle);
        let entry = TaskEntry::new(handle, key, target, visibility);
        self.tasks
            .push(entry)
            .map_err(|_| SchedulerError::RegistryFull)?;
        self.events
            .record(self.uptime, SchedulerEvent::Added { handle, key });
        log::debug!("task {handle} {key:?} registered for {}ms", target.as_millis());
        Ok(handle)
    }

    fn update(&mut self, handle: TaskHandle, target: Duration) -> bool {
        self.retarget(handle, target)
    }

    fn delete(&mut self, handle: TaskHandle) -> bool {
        self.remove(handle)
    }

    fn contains(&self, handle: TaskHandle) -> bool {
        self.get(handle).is_some()
    }

    fn idle_time(&self) -> IdleTime {
        idle_over(self.tasks.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Key {
        Blink,
        Poll,
        Spawn,
        Reap,
    }

    #[derive(Default)]
    struct RecordingTicks {
        started: Option<Duration>,
        stops: usize,
    }

    impl TickSource for RecordingTicks {
        fn start(&mut self, period: Duration) {
            self.started = Some(period);
        }

        fn stop(&mut self) {
            self.stops += 1;
        }
    }

    struct Script {
        fired: Vec<Key, 32>,
        outcome: TaskOutcome,
        spawned: Option<TaskHandle>,
        reap: Option<TaskHandle>,
        seen_idle: Option<IdleTime>,
    }

    impl Script {
        fn new(outcome: TaskOutcome) -> Self {
            Self {
                fired: Vec::new(),
                outcome,
                spawned: None,
                reap: None,
                seen_idle: None,
            }
        }
    }

    impl TaskRunner<Key> for Script {
        fn run(
            &mut self,
            key: Key,
            cx: &mut TickContext<'_, Key>,
        ) -> Result<TaskOutcome, TaskFault> {
            self.fired.push(key).expect("fired log capacity");
            match key {
                Key::Spawn => {
                    self.spawned = Some(
                        cx.add(Key::Blink, Duration::from_millis(5), Visibility::Visible)
                            .expect("room for spawned task"),
                    );
                    self.seen_idle = Some(cx.idle_time());
                    Ok(TaskOutcome::Remove)
                }
                Key::Reap => {
                    if let Some(handle) = self.reap {
                        assert!(cx.delete(handle));
                    }
                    Ok(self.outcome)
                }
                Key::Poll => Err(TaskFault::new("poll failed")),
                Key::Blink => Ok(self.outcome),
            }
        }
    }

    fn scheduler() -> Scheduler<Key, RecordingTicks, 4> {
        let mut scheduler = Scheduler::new(RecordingTicks::default());
        assert!(scheduler.activate(Duration::from_millis(10)));
        scheduler
    }

    #[test]
    fn activate_rejects_sub_millisecond_periods() {
        let mut scheduler: Scheduler<Key, RecordingTicks, 4> =
            Scheduler::new(RecordingTicks::default());
        assert!(!scheduler.activate(Duration::from_micros(500)));
        assert!(!scheduler.is_active());
        assert_eq!(scheduler.tick_source().started, None);

        assert!(scheduler.activate(Duration::from_millis(25)));
        assert_eq!(scheduler.tick_source().started, Some(Duration::from_millis(25)));
        assert_eq!(scheduler.period(), Duration::from_millis(25));
    }

    #[test]
    fn stopped_scheduler_keeps_tasks_and_ignores_ticks() {
        let mut scheduler = scheduler();
        scheduler
            .add(Key::Blink, Duration::ZERO, Visibility::Visible)
            .expect("add");
        scheduler.stop();
        assert_eq!(scheduler.tick_source().stops, 1);

        let mut runner = Script::new(TaskOutcome::Remove);
        assert_eq!(scheduler.tick(&mut runner), TickReport::default());
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.tasks()[0].position(), Duration::ZERO);

        scheduler.activate(Duration::from_millis(10));
        assert_eq!(scheduler.tick(&mut runner).fired, 1);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn registry_full_is_reported() {
        let mut scheduler = scheduler();
        for _ in 0..4 {
            scheduler
                .add(Key::Blink, Duration::from_secs(1), Visibility::Visible)
                .expect("room");
        }
        assert_eq!(
            scheduler.add(Key::Blink, Duration::from_secs(1), Visibility::Visible),
            Err(SchedulerError::RegistryFull)
        );
    }

    #[test]
    fn duplicate_keys_get_distinct_handles() {
        let mut scheduler = scheduler();
        let first = scheduler
            .add(Key::Blink, Duration::from_secs(1), Visibility::Visible)
            .expect("first");
        let second = scheduler
            .add(Key::Blink, Duration::from_secs(1), Visibility::Visible)
            .expect("second");
        assert_ne!(first, second);
        assert_eq!(scheduler.handle_of(Key::Blink), Some(first));

        assert!(scheduler.delete(first));
        assert_eq!(scheduler.handle_of(Key::Blink), Some(second));
    }

    #[test]
    fn tasks_added_mid_tick_fire_on_a_later_tick() {
        let mut scheduler = scheduler();
        scheduler
            .add(Key::Spawn, Duration::ZERO, Visibility::Hidden)
            .expect("add");
        let mut runner = Script::new(TaskOutcome::Remove);

        let report = scheduler.tick(&mut runner);
        assert_eq!(report.fired, 1);
        assert_eq!(runner.fired.as_slice(), &[Key::Spawn]);
        assert_eq!(runner.seen_idle, Some(IdleTime::For(Duration::from_millis(5))));

        let spawned = runner.spawned.expect("spawned handle");
        let entry = scheduler.get(spawned).expect("spawned task registered");
        assert_eq!(entry.position(), Duration::ZERO);
        assert_eq!(scheduler.len(), 1);

        scheduler.tick(&mut runner);
        assert_eq!(runner.fired.as_slice(), &[Key::Spawn, Key::Blink]);
    }

    #[test]
    fn deletes_from_inside_a_tick_apply_after_the_pass() {
        let mut scheduler = scheduler();
        let reaper = scheduler
            .add(Key::Reap, Duration::ZERO, Visibility::Visible)
            .expect("reaper");
        let victim = scheduler
            .add(Key::Blink, Duration::ZERO, Visibility::Visible)
            .expect("victim");
        let mut runner = Script::new(TaskOutcome::after_millis(100));
        runner.reap = Some(victim);

        scheduler.tick(&mut runner);
        assert_eq!(runner.fired.as_slice(), &[Key::Reap, Key::Blink]);
        assert!(scheduler.get(victim).is_none());
        assert!(scheduler.get(reaper).is_some());
        assert!(matches!(
            scheduler.events().latest().map(|record| record.event),
            Some(SchedulerEvent::Deleted { handle }) if handle == victim
        ));
    }

    #[test]
    fn mid_tick_update_of_unknown_handle_is_rejected() {
        struct Updater {
            result: Option<bool>,
        }

        impl TaskRunner<Key> for Updater {
            fn run(
                &mut self,
                _key: Key,
                cx: &mut TickContext<'_, Key>,
            ) -> Result<TaskOutcome, TaskFault> {
                self.result = Some(cx.update(TaskHandle::from_raw(999), Duration::from_secs(1)));
                Ok(TaskOutcome::after_millis(50))
            }
        }

        let mut scheduler = scheduler();
        scheduler
            .add(Key::Blink, Duration::ZERO, Visibility::Visible)
            .expect("add");
        let mut runner = Updater { result: None };
        scheduler.tick(&mut runner);
        assert_eq!(runner.result, Some(false));
        assert_eq!(scheduler.tasks()[0].target(), Duration::from_millis(50));
    }

    #[test]
    fn faulting_task_is_removed_and_recorded() {
        let mut scheduler = scheduler();
        let handle = scheduler
            .add(Key::Poll, Duration::ZERO, Visibility::Visible)
            .expect("add");
        let mut runner = Script::new(TaskOutcome::Remove);

        let report = scheduler.tick(&mut runner);
        assert_eq!(report.faulted, 1);
        assert!(scheduler.is_empty());
        assert_eq!(
            scheduler.events().latest().map(|record| record.event),
            Some(SchedulerEvent::Faulted {
                handle,
                key: Key::Poll,
                fault: TaskFault::new("poll failed"),
            })
        );

        scheduler.tick(&mut runner);
        assert_eq!(runner.fired.as_slice(), &[Key::Poll]);
    }

    #[test]
    fn idle_time_overlays_pending_changes() {
        let mut scheduler = scheduler();
        scheduler
            .add(Key::Blink, Duration::from_secs(60), Visibility::Visible)
            .expect("add");
        assert_eq!(scheduler.idle_time(), IdleTime::For(Duration::from_secs(60)));

        scheduler
            .add(Key::Spawn, Duration::ZERO, Visibility::Hidden)
            .expect("add");
        let mut runner = Script::new(TaskOutcome::Remove);
        scheduler.tick(&mut runner);
        assert_eq!(runner.seen_idle, Some(IdleTime::For(Duration::from_millis(5))));
    }

    #[test]
    fn outcome_helpers_map_zero_to_remove() {
        assert_eq!(TaskOutcome::after_millis(0), TaskOutcome::Remove);
        assert_eq!(TaskOutcome::RescheduleAfter(Duration::ZERO).next_target(), None);
        assert_eq!(
            TaskOutcome::after_millis(50).next_target(),
            Some(Duration::from_millis(50))
        );
    }
}
