/// What the connection task should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send the next heartbeat.
    Send,
    /// The miss threshold was reached; the connection is dead.
    Dead,
}

/// Miss counter behind the keepalive.
///
/// A heartbeat goes out when the connection starts and on every tick. Each
/// tick that arrives with no response since the previous one counts as a
/// miss; reaching the threshold declares the connection dead. The monitor
/// lives inside one connection, so leaving `Connected` discards it.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    missed: u32,
    threshold: u32,
    dead: bool,
}

impl HeartbeatMonitor {
    pub fn new(threshold: u32) -> Self {
        Self {
            missed: 0,
            threshold: threshold.max(1),
            dead: false,
        }
    }

    /// Account for one elapsed interval.
    ///
    /// [`HeartbeatAction::Dead`] is returned exactly once. Ticks after that
    /// return `None`.
    pub fn on_interval(&mut self) -> Option<HeartbeatAction> {
        if self.dead {
            return None;
        }
        self.missed += 1;
        if self.missed >= self.threshold {
            self.dead = true;
            Some(HeartbeatAction::Dead)
        } else {
            Some(HeartbeatAction::Send)
        }
    }

    /// A heartbeat response arrived.
    pub fn on_response(&mut self) {
        if !self.dead {
            self.missed = 0;
        }
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }
}
