//! Kernel time and alarms.
//!
//! `tick` advances kernel time by one unit; in a full system the clock
//! interrupt handler drives it. Pending alarms are kept ordered by expiry
//! so a tick inspects only the head; periodic alarms re-arm themselves.

use kcore::sync::Arc;
use kcore::{Id, KernelError, KernelResult};

use crate::Kernel;

/// Fired when an alarm expires. Runs with the kernel borrowed, so it can
/// post messages or ready threads but not block.
pub type AlarmAction = Arc<dyn Fn(&mut Kernel) + Send + Sync>;

/// Readable alarm parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlarmSpec {
    /// Absolute tick the alarm next fires at.
    pub expires_at: u64,
    /// Re-arm interval; 0 for one-shot.
    pub period: u64,
}

pub(crate) struct Alarm {
    pub(crate) id: Id,
    pub(crate) expires_at: u64,
    pub(crate) period: u64,
    pub(crate) action: AlarmAction,
}

impl Kernel {
    /// Current kernel time in ticks.
    pub fn time(&self) -> u64 {
        self.ticks
    }

    /// Arms a new alarm `expires_in` ticks from now. A non-zero `period`
    /// re-arms it after every expiry.
    pub fn alarm_new(
        &mut self,
        action: AlarmAction,
        expires_in: u64,
        period: u64,
    ) -> KernelResult<Id> {
        if expires_in == 0 && period == 0 {
            return Err(self.fail(KernelError::InvalidArgument));
        }
        let id = self.ids.allocate();
        let alarm = Alarm {
            id,
            expires_at: self.ticks + expires_in.max(1),
            period,
            action,
        };
        self.insert_alarm(alarm);
        Ok(id)
    }

    pub fn alarm_get(&self, alarm: Id) -> KernelResult<AlarmSpec> {
        match self.alarms.iter().find(|a| a.id == alarm) {
            Some(a) => Ok(AlarmSpec {
                expires_at: a.expires_at,
                period: a.period,
            }),
            None => Err(KernelError::DontExist),
        }
    }

    /// Re-schedules an existing alarm.
    pub fn alarm_set(&mut self, alarm: Id, expires_in: u64, period: u64) -> KernelResult<()> {
        let Some(pos) = self.alarms.iter().position(|a| a.id == alarm) else {
            return Err(self.fail(KernelError::DontExist));
        };
        let mut entry = self.alarms.remove(pos);
        entry.expires_at = self.ticks + expires_in.max(1);
        entry.period = period;
        self.insert_alarm(entry);
        Ok(())
    }

    pub fn alarm_remove(&mut self, alarm: Id) -> KernelResult<()> {
        let Some(pos) = self.alarms.iter().position(|a| a.id == alarm) else {
            return Err(self.fail(KernelError::DontExist));
        };
        self.alarms.remove(pos);
        self.ids.free(alarm);
        Ok(())
    }

    /// Advances time by one tick and fires every due alarm in expiry
    /// order. Periodic alarms are re-armed before their action runs, so
    /// the action may remove or re-schedule its own alarm.
    pub fn tick(&mut self) {
        self.ticks += 1;
        loop {
            let due = self
                .alarms
                .first()
                .is_some_and(|alarm| alarm.expires_at <= self.ticks);
            if !due {
                break;
            }
            let mut alarm = self.alarms.remove(0);
            let action = Arc::clone(&alarm.action);
            if alarm.period > 0 {
                alarm.expires_at += alarm.period;
                self.insert_alarm(alarm);
            } else {
                self.ids.free(alarm.id);
            }
            action(self);
        }
    }

    /// Pending alarm count (diagnostics).
    pub fn alarm_count(&self) -> usize {
        self.alarms.len()
    }

    fn insert_alarm(&mut self, alarm: Alarm) {
        let pos = self
            .alarms
            .iter()
            .position(|entry| entry.expires_at > alarm.expires_at)
            .unwrap_or(self.alarms.len());
        self.alarms.insert(pos, alarm);
    }
}
