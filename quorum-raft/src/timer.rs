use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::rpc::Message;

enum Ctl {
    Restart(Duration),
    Stop,
}

/// A handle to a timer task that delivers a fixed message into the server's
/// inbound queue when it fires.
///
/// One-shot timers are created unarmed and fire once per `restart`.
/// Auto-restart timers re-arm themselves after every firing; `restart` also
/// replaces the stored period. `stop` disarms without consuming the handle
/// and is idempotent. Dropping every handle tears the task down.
#[derive(Clone)]
pub struct Timer {
    ctl_tx: mpsc::UnboundedSender<Ctl>,
}

impl Timer {
    pub fn one_shot(message: Message, tx: mpsc::UnboundedSender<Message>) -> Timer {
        Timer::spawn(None, message, tx)
    }

    pub fn auto_restart(
        period: Duration,
        message: Message,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Timer {
        Timer::spawn(Some(period), message, tx)
    }

    fn spawn(
        period: Option<Duration>,
        message: Message,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Timer {
        let (ctl_tx, mut ctl_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let auto = period.is_some();
            let mut period = period;
            let mut deadline: Option<Instant> = period.map(|p| Instant::now() + p);
            loop {
                match deadline {
                    Some(at) => {
                        tokio::select! {
                            _ = time::sleep_until(at) => {
                                if tx.send(message.clone()).is_err() {
                                    return;
                                }
                                deadline = period.map(|p| Instant::now() + p);
                            }
                            ctl = ctl_rx.recv() => match ctl {
                                Some(Ctl::Restart(delay)) => {
                                    if auto {
                                        period = Some(delay);
                                    }
                                    deadline = Some(Instant::now() + delay);
                                }
                                Some(Ctl::Stop) => deadline = None,
                                None => return,
                            },
                        }
                    }
                    None => match ctl_rx.recv().await {
                        Some(Ctl::Restart(delay)) => {
                            if auto {
                                period = Some(delay);
                            }
                            deadline = Some(Instant::now() + delay);
                        }
                        Some(Ctl::Stop) => {}
                        None => return,
                    },
                }
            }
        });
        Timer { ctl_tx }
    }

    /// Arm (or re-arm) the timer to fire after `delay`.
    pub fn restart(&self, delay: Duration) {
        let _ = self.ctl_tx.send(Ctl::Restart(delay));
    }

    /// Disarm the timer. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        let _ = self.ctl_tx.send(Ctl::Stop);
    }
}

/// The two timers every raft server runs: the randomized election timeout and
/// the fixed-period heartbeat tick.
#[derive(Clone)]
pub struct RaftTimers {
    pub election: Timer,
    pub heartbeat: Timer,
}
