//! Logical game clock advanced once per dedicated tick

use std::time::Instant;

/// Real and scaled game time in milliseconds.
///
/// `total_millis` follows the wall clock since start. `last_millis` is game
/// time: each tick adds `cur_time`, the real elapsed time scaled by the game
/// speed. The part of the scaled time that does not make up a whole
/// millisecond is carried into the next tick.
#[derive(Debug, Clone)]
pub struct Clock {
    start: Instant,
    pub total_millis: u64,
    pub last_millis: u64,
    pub cur_time: u64,
    time_err: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            total_millis: 0,
            last_millis: 0,
            cur_time: 0,
            time_err: 0,
        }
    }

    /// Advances to the current wall-clock time.
    pub fn update(&mut self, paused: bool, game_speed: u32) {
        let millis = self.start.elapsed().as_millis() as u64;
        self.advance_to(millis, paused, game_speed);
    }

    /// Advances to `millis` since start; `game_speed` is in percent.
    pub fn advance_to(&mut self, millis: u64, paused: bool, game_speed: u32) {
        let elapsed = millis.saturating_sub(self.total_millis);
        let scaled = elapsed * u64::from(game_speed) + self.time_err;
        self.cur_time = scaled / 100;
        self.time_err = scaled % 100;
        if paused {
            self.cur_time = 0;
        }
        self.last_millis += self.cur_time;
        self.total_millis = millis;
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
