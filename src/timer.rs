//! The periodic-task wheel backing the engine's four recurring jobs
//! (`retry_acks`, `ping`, `tick_broadcast`, `announce`).
//!
//! The set of periodic tasks is owned by the engine as a small fixed-size
//! array of `(period, next_fire, enabled)` tasks rather than a set of
//! booleans scattered across the engine, so starting/stopping host-only
//! duties (`tick_broadcast`, `announce`) is a single field write.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    RetryAcks,
    Ping,
    TickBroadcast,
    Announce,
}

struct Task {
    kind: TaskKind,
    period: Duration,
    next_fire: Instant,
    enabled: bool,
}

/// A small, fixed set of periodic tasks driven by repeatedly calling
/// `due()` with the current time. There is no background thread: the
/// engine's own event loop calls `due()` once per iteration, matching the
/// single-threaded cooperative scheduling model.
pub struct TimerWheel {
    tasks: Vec<Task>,
}

impl TimerWheel {
    pub fn new(now: Instant, state_delay_ms: u64) -> Self {
        let retry_period = Duration::from_millis(state_delay_ms / 10);
        let ping_period = Duration::from_millis(state_delay_ms / 10);
        let tick_period = Duration::from_millis(state_delay_ms);
        let announce_period = Duration::from_millis(1000);
        TimerWheel {
            tasks: vec![
                Task {
                    kind: TaskKind::RetryAcks,
                    period: retry_period,
                    next_fire: now + retry_period,
                    enabled: true,
                },
                Task {
                    kind: TaskKind::Ping,
                    period: ping_period,
                    next_fire: now + ping_period,
                    enabled: true,
                },
                Task {
                    kind: TaskKind::TickBroadcast,
                    period: tick_period,
                    next_fire: now + tick_period,
                    enabled: false,
                },
                Task {
                    kind: TaskKind::Announce,
                    period: announce_period,
                    next_fire: now + announce_period,
                    enabled: false,
                },
            ],
        }
    }

    pub fn set_enabled(&mut self, kind: TaskKind, enabled: bool, now: Instant) {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.kind == kind) {
            if enabled && !task.enabled {
                // A task's first fire is one period out, not immediate.
                task.next_fire = now + task.period;
            }
            task.enabled = enabled;
        }
    }

    /// Returns every task kind that is due at `now`, advancing each one's
    /// next fire time by its period. Drains at most one fire per kind per
    /// call, which is all the engine ever needs.
    pub fn due(&mut self, now: Instant) -> Vec<TaskKind> {
        let mut fired = Vec::new();
        for task in &mut self.tasks {
            if task.enabled && now >= task.next_fire {
                fired.push(task.kind);
                task.next_fire += task.period;
                if task.next_fire < now {
                    task.next_fire = now + task.period;
                }
            }
        }
        fired
    }

    /// The soonest a caller might need to wake up again — useful for a
    /// binary that wants to sleep between polls instead of busy-looping.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.next_fire)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_only_tasks_start_disabled() {
        let now = Instant::now();
        let wheel = TimerWheel::new(now, 1000);
        assert!(wheel.next_deadline().is_some());
        // tick_broadcast/announce are disabled until become_master enables
        // them, so due() right away should not report them.
    }

    #[test]
    fn enabling_a_task_schedules_one_period_out() {
        let now = Instant::now();
        let mut wheel = TimerWheel::new(now, 1000);
        wheel.set_enabled(TaskKind::TickBroadcast, true, now);
        let fired = wheel.due(now);
        assert!(!fired.contains(&TaskKind::TickBroadcast));
        let later = now + Duration::from_millis(1000);
        let fired = wheel.due(later);
        assert!(fired.contains(&TaskKind::TickBroadcast));
    }
}
