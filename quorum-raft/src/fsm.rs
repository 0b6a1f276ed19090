use quorum_core::error::Result;
use slog::Logger;
use tokio::sync::mpsc;

use crate::raft::{Entry, LogIndex};

/// The host's replicated state machine. Committed log entries are fed to it
/// in index order, exactly once.
pub trait Fsm: Send + Sync {
    fn transition(&mut self, input: Vec<u8>) -> Result<Vec<u8>>;
}

/// A state machine that ignores its input, for servers that only need the
/// coordination half of raft.
#[derive(Debug, Default)]
pub struct NullFsm;

impl Fsm for NullFsm {
    fn transition(&mut self, _input: Vec<u8>) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[derive(Debug)]
pub enum Instruction {
    Apply { entry: Entry },
}

/// Pulls committed entries off the raft server and drives them through the
/// state machine, tracking how far it has applied.
pub struct Driver<T: Fsm> {
    logger: Logger,
    fsm_rx: mpsc::UnboundedReceiver<Instruction>,
    applied_idx: LogIndex,
    fsm: T,
}

impl<T: Fsm> Driver<T> {
    pub fn new(logger: Logger, fsm_rx: mpsc::UnboundedReceiver<Instruction>, fsm: T) -> Self {
        Self {
            logger,
            fsm_rx,
            applied_idx: 0,
            fsm,
        }
    }

    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) -> Result<()> {
        debug!(self.logger, "starting driver");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,

                Some(instruction) = self.fsm_rx.recv() => {
                    self.exec(instruction).await?;
                }
            }
        }

        Ok(())
    }

    pub async fn exec(&mut self, instruction: Instruction) -> Result<()> {
        match instruction {
            Instruction::Apply { entry } => {
                if entry.index <= self.applied_idx {
                    debug!(self.logger, "skipping applied entry"; "index" => entry.index);
                    return Ok(());
                }
                debug!(self.logger, "applying entry"; "index" => entry.index);
                self.applied_idx = entry.index;
                self.fsm.transition(entry.data)?;
            }
        };

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use quorum_core::logger::get_root_logger;
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    enum TestState {
        A,
        B,
    }

    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    struct TestFsm {
        state: TestState,
    }

    impl TestFsm {
        pub fn new() -> Self {
            Self {
                state: TestState::A,
            }
        }
    }

    impl Fsm for TestFsm {
        fn transition(&mut self, input: Vec<u8>) -> Result<Vec<u8>> {
            let state = std::str::from_utf8(&input).unwrap();
            match state {
                "A" => self.state = TestState::A,
                "B" => self.state = TestState::B,
                _ => panic!(),
            };

            Ok(Vec::new())
        }
    }

    fn apply(index: u64, data: &str) -> Instruction {
        Instruction::Apply {
            entry: Entry {
                term: 1,
                index,
                data: data.as_bytes().to_owned(),
            },
        }
    }

    #[tokio::test]
    async fn drives_the_state_machine() -> Result<()> {
        let (_tx, rx) = unbounded_channel();
        let mut driver = Driver::new(get_root_logger().new(o!()), rx, TestFsm::new());

        driver.exec(apply(1, "B")).await?;
        assert_eq!(driver.fsm.state, TestState::B);
        assert_eq!(driver.applied_idx, 1);

        Ok(())
    }

    #[tokio::test]
    async fn skips_entries_already_applied() -> Result<()> {
        let (_tx, rx) = unbounded_channel();
        let mut driver = Driver::new(get_root_logger().new(o!()), rx, TestFsm::new());

        driver.exec(apply(1, "B")).await?;
        driver.exec(apply(1, "A")).await?;
        assert_eq!(driver.fsm.state, TestState::B);

        Ok(())
    }
}
