use core::time::Duration;

use badge_core::power::{DeepSleep, PowerConfig, PowerManager, SleepHookError};
use badge_core::scheduler::{
    IdleTime, MAX_PENDING_CHANGES, NoopTickSource, Scheduler, SchedulerError, TaskFault,
    TaskHandle, TaskOutcome, TaskRegistry, TaskRunner, TickContext, Visibility,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Key {
    Power,
    Work,
    Filler,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Call {
    Hook(IdleTime),
    Sleep(Option<Duration>),
}

#[derive(Default)]
struct Platform {
    calls: Vec<Call>,
    hook_fails: bool,
}

impl DeepSleep for Platform {
    fn start_sleeping(&mut self, duration: Option<Duration>) {
        self.calls.push(Call::Sleep(duration));
    }
}

fn record_hook(platform: &mut Platform, idle: IdleTime) -> Result<(), SleepHookError> {
    platform.calls.push(Call::Hook(idle));
    if platform.hook_fails {
        Err(SleepHookError::new("display busy"))
    } else {
        Ok(())
    }
}

struct Badge {
    power: PowerManager<Key, Platform>,
    platform: Platform,
}

impl Badge {
    fn new() -> Self {
        Self {
            power: PowerManager::new(Key::Power, PowerConfig::default()),
            platform: Platform::default(),
        }
    }
}

impl TaskRunner<Key> for Badge {
    fn run(&mut self, key: Key, cx: &mut TickContext<'_, Key>) -> Result<TaskOutcome, TaskFault> {
        match key {
            Key::Power => Ok(self.power.run(cx, &mut self.platform)),
            Key::Work | Key::Filler => Ok(TaskOutcome::Remove),
        }
    }
}

fn scheduler() -> Scheduler<Key, NoopTickSource> {
    let mut scheduler = Scheduler::new(NoopTickSource);
    assert!(scheduler.activate(Duration::from_millis(100)));
    scheduler
}

fn run_until_power_fires(scheduler: &mut Scheduler<Key, NoopTickSource>, badge: &mut Badge) {
    // 5000ms user response time; the task is due once 5100ms have elapsed.
    for _ in 0..51 {
        scheduler.tick(badge);
    }
}

#[test]
fn long_idle_invokes_hook_then_sleeps_for_idle_time() {
    let mut scheduler = scheduler();
    let mut badge = Badge::new();
    badge.power.set_sleep_callback(record_hook);
    badge.power.feed(&mut scheduler).expect("feed");
    scheduler
        .add(Key::Work, Duration::from_millis(45_100), Visibility::Visible)
        .expect("add");

    run_until_power_fires(&mut scheduler, &mut badge);

    let idle = IdleTime::For(Duration::from_millis(40_000));
    assert_eq!(
        badge.platform.calls,
        vec![Call::Hook(idle), Call::Sleep(Some(Duration::from_millis(40_000)))]
    );
    assert_eq!(badge.power.sleep_requests(), 1);

    let handle = badge.power.handle().expect("power task still registered");
    let entry = scheduler.get(handle).expect("rescheduled");
    assert_eq!(entry.target(), Duration::from_millis(5_000));
    assert_eq!(entry.position(), Duration::ZERO);
}

#[test]
fn short_idle_keeps_the_badge_awake() {
    let mut scheduler = scheduler();
    let mut badge = Badge::new();
    badge.power.set_sleep_callback(record_hook);
    badge.power.feed(&mut scheduler).expect("feed");
    scheduler
        .add(Key::Work, Duration::from_millis(35_100), Visibility::Visible)
        .expect("add");

    run_until_power_fires(&mut scheduler, &mut badge);

    assert!(badge.platform.calls.is_empty(), "30000ms idle is not past the threshold");
    assert_eq!(badge.power.sleep_requests(), 0);
}

#[test]
fn no_visible_tasks_sleeps_until_woken() {
    let mut scheduler = scheduler();
    let mut badge = Badge::new();
    badge.power.feed(&mut scheduler).expect("feed");

    run_until_power_fires(&mut scheduler, &mut badge);

    assert_eq!(badge.platform.calls, vec![Call::Sleep(None)]);
}

#[test]
fn failing_hook_does_not_prevent_sleep() {
    let mut scheduler = scheduler();
    let mut badge = Badge::new();
    badge.platform.hook_fails = true;
    badge.power.set_sleep_callback(record_hook);
    badge.power.feed(&mut scheduler).expect("feed");

    run_until_power_fires(&mut scheduler, &mut badge);

    assert_eq!(
        badge.platform.calls,
        vec![Call::Hook(IdleTime::Forever), Call::Sleep(None)]
    );
}

#[test]
fn feed_rearms_the_existing_task() {
    let mut scheduler = scheduler();
    let mut badge = Badge::new();
    let first = badge.power.feed(&mut scheduler).expect("feed");

    for _ in 0..40 {
        scheduler.tick(&mut badge);
    }
    let second = badge.power.feed(&mut scheduler).expect("feed again");

    assert_eq!(first, second);
    assert_eq!(scheduler.len(), 1);
    let entry = scheduler.get(first).expect("registered");
    assert_eq!(entry.position(), Duration::ZERO);
    assert_eq!(entry.visibility(), Visibility::Hidden);

    // Fed at 4000ms, so nothing happens at 5100ms.
    for _ in 0..11 {
        scheduler.tick(&mut badge);
    }
    assert!(badge.platform.calls.is_empty());
}

#[test]
fn kill_stops_idle_detection_until_fed_again() {
    let mut scheduler = scheduler();
    let mut badge = Badge::new();
    badge.power.feed(&mut scheduler).expect("feed");

    assert!(badge.power.kill(&mut scheduler));
    assert!(!badge.power.kill(&mut scheduler));
    assert!(scheduler.is_empty());

    for _ in 0..100 {
        scheduler.tick(&mut badge);
    }
    assert!(badge.platform.calls.is_empty());

    badge.power.feed(&mut scheduler).expect("feed");
    assert_eq!(scheduler.len(), 1);
}

#[test]
fn kill_with_full_changeset_keeps_the_task_tracked() {
    struct Busy {
        power: PowerManager<Key, Platform>,
        platform: Platform,
        filler: TaskHandle,
        killed: Option<bool>,
        refed: Option<Result<TaskHandle, SchedulerError>>,
    }

    impl TaskRunner<Key> for Busy {
        fn run(
            &mut self,
            key: Key,
            cx: &mut TickContext<'_, Key>,
        ) -> Result<TaskOutcome, TaskFault> {
            match key {
                Key::Power => Ok(self.power.run(cx, &mut self.platform)),
                Key::Work => {
                    for _ in 0..MAX_PENDING_CHANGES {
                        assert!(cx.update(self.filler, Duration::from_secs(60)));
                    }
                    assert!(!cx.update(self.filler, Duration::from_secs(60)));
                    self.killed = Some(self.power.kill(cx));
                    self.refed = Some(self.power.feed(cx));
                    Ok(TaskOutcome::Remove)
                }
                Key::Filler => Ok(TaskOutcome::Remove),
            }
        }
    }

    let mut scheduler = scheduler();
    let mut power = PowerManager::new(Key::Power, PowerConfig::default());
    let handle = power.feed(&mut scheduler).expect("feed");
    let filler = scheduler
        .add(Key::Filler, Duration::from_secs(60), Visibility::Visible)
        .expect("filler");
    scheduler
        .add(Key::Work, Duration::ZERO, Visibility::Visible)
        .expect("work");

    let mut busy = Busy {
        power,
        platform: Platform::default(),
        filler,
        killed: None,
        refed: None,
    };
    scheduler.tick(&mut busy);

    assert_eq!(busy.killed, Some(false));
    assert_eq!(busy.refed, Some(Err(SchedulerError::ChangesetFull)));
    assert_eq!(busy.power.handle(), Some(handle));
    let power_tasks = scheduler
        .tasks()
        .iter()
        .filter(|entry| entry.key() == Key::Power)
        .count();
    assert_eq!(power_tasks, 1);

    assert!(busy.power.kill(&mut scheduler));
    assert_eq!(busy.power.handle(), None);
    assert!(scheduler.handle_of(Key::Power).is_none());
}

#[test]
fn kill_forgets_a_task_that_is_already_gone() {
    let mut scheduler = scheduler();
    let mut badge = Badge::new();
    let handle = badge.power.feed(&mut scheduler).expect("feed");
    assert!(scheduler.delete(handle));

    assert!(!badge.power.kill(&mut scheduler));
    assert_eq!(badge.power.handle(), None);
}

#[test]
fn cleared_sleep_callback_is_not_invoked() {
    let mut scheduler = scheduler();
    let mut badge = Badge::new();
    badge.power.set_sleep_callback(record_hook);
    badge.power.clear_sleep_callback();
    badge.power.feed(&mut scheduler).expect("feed");

    run_until_power_fires(&mut scheduler, &mut badge);

    assert_eq!(badge.platform.calls, vec![Call::Sleep(None)]);
}

#[test]
fn latest_sleep_callback_wins() {
    fn other_hook(platform: &mut Platform, _idle: IdleTime) -> Result<(), SleepHookError> {
        platform.calls.push(Call::Hook(IdleTime::For(Duration::ZERO)));
        Ok(())
    }

    let mut scheduler = scheduler();
    let mut badge = Badge::new();
    badge.power.set_sleep_callback(record_hook);
    badge.power.set_sleep_callback(other_hook);
    badge.power.feed(&mut scheduler).expect("feed");

    run_until_power_fires(&mut scheduler, &mut badge);

    assert_eq!(
        badge.platform.calls,
        vec![Call::Hook(IdleTime::For(Duration::ZERO)), Call::Sleep(None)]
    );
}

#[test]
fn reboot_is_a_one_millisecond_sleep() {
    let mut platform = Platform::default();
    platform.reboot();
    assert_eq!(platform.calls, vec![Call::Sleep(Some(Duration::from_millis(1)))]);
}
