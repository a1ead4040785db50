use anyhow::Result;
use chrono::{Duration, NaiveDateTime};

use crate::bingx::Symbol;
use crate::users::UserStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    /// Last-signal time now stamped and persisted; execution may proceed
    Acquired,
    CoolingDown { remaining: Duration },
    UnknownUser,
}

/// Per user-per-symbol gate against repeated entries
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    window: Duration,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_hours(hours: i64) -> Self {
        Self::new(Duration::hours(hours))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn remaining(&self, last: Option<NaiveDateTime>, now: NaiveDateTime) -> Option<Duration> {
        let elapsed = now - last?;
        if elapsed < self.window {
            Some(self.window - elapsed)
        } else {
            None
        }
    }

    pub fn is_cooling_down(&self, last: Option<NaiveDateTime>, now: NaiveDateTime) -> bool {
        self.remaining(last, now).is_some()
    }

    /// Checks the gate and stamps `now` in a single per-user critical
    /// section, then waits for the store to hit disk. Callers start the
    /// order sequence only after `Acquired`.
    pub async fn try_acquire(
        &self,
        store: &UserStore,
        user_id: &str,
        symbol: &Symbol,
        now: NaiveDateTime,
    ) -> Result<CooldownDecision> {
        let decision = store
            .update(user_id, |cfg| {
                let last = cfg.last_signal_time.get(symbol).copied();
                match self.remaining(last, now) {
                    Some(remaining) => CooldownDecision::CoolingDown { remaining },
                    None => {
                        cfg.last_signal_time.insert(symbol.clone(), now);
                        CooldownDecision::Acquired
                    }
                }
            })
            .await?;

        Ok(decision.unwrap_or(CooldownDecision::UnknownUser))
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::from_hours(3)
    }
}
