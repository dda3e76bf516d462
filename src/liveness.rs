//! Liveness monitor
//!
//! The supervising console keeps a pipe open to the daemon's stdin for the whole
//! run. End-of-stream on that pipe means the console is gone, and the daemon must
//! shut down (and power its sensor off) rather than keep recording unattended.
//!
//! The same pipe carries console commands, one per line:
//!
//! ```text
//! RANGE 4.5
//! ```
//!
//! Unknown or malformed lines are logged and ignored.

use crate::error::CaptureError;
use crate::lifecycle::LifecycleController;
use crate::run_state::{RunState, ShutdownReason};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::mpsc;

/// Commands accepted on the liveness channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    /// Change the sonar operating range (metres).
    SetRange(f64),
}

impl FromStr for ConsoleCommand {
    type Err = CaptureError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let keyword = parts.next().unwrap_or_default();
        if !keyword.eq_ignore_ascii_case("RANGE") {
            return Err(CaptureError::InvalidCommand(line.to_string()));
        }
        let value = match (parts.next(), parts.next()) {
            (Some(value), None) => value,
            _ => return Err(CaptureError::InvalidCommand(line.to_string())),
        };
        let range_m: f64 = value
            .parse()
            .map_err(|_| CaptureError::InvalidCommand(line.to_string()))?;
        if !(range_m.is_finite() && range_m > 0.0) {
            return Err(CaptureError::InvalidCommand(line.to_string()));
        }
        Ok(ConsoleCommand::SetRange(range_m))
    }
}

/// Why the monitor returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessExit {
    /// The channel closed (or failed); a stop was requested.
    Disconnected,
    /// The run stopped for another reason first.
    Stopped,
}

/// Watches the liveness channel until it closes or the run stops.
pub struct LivenessMonitor<R> {
    reader: R,
    run_state: Arc<RunState>,
    commands: Option<mpsc::Sender<ConsoleCommand>>,
}

impl<R: AsyncBufRead + Unpin + Send> LivenessMonitor<R> {
    /// Monitor `reader`; closure stops `run_state`.
    pub fn new(reader: R, run_state: Arc<RunState>) -> Self {
        Self {
            reader,
            run_state,
            commands: None,
        }
    }

    /// Forward parsed commands to `commands`.
    pub fn with_commands(mut self, commands: mpsc::Sender<ConsoleCommand>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Read lines until end-of-stream or until the run stops.
    pub async fn run(mut self) -> LivenessExit {
        let mut line = Vec::with_capacity(64);
        loop {
            line.clear();
            let read = tokio::select! {
                biased;
                _ = self.run_state.stopped() => return LivenessExit::Stopped,
                read = self.reader.read_until(b'\n', &mut line) => read,
            };

            match read {
                Ok(0) => {
                    tracing::warn!("Liveness channel closed; supervising process disconnected");
                    self.run_state.request_stop(ShutdownReason::ParentDisconnected);
                    return LivenessExit::Disconnected;
                }
                Ok(_) => self.dispatch(&String::from_utf8_lossy(&line)),
                Err(e) => {
                    tracing::warn!(error = %e, "Liveness channel failed; treating as disconnect");
                    self.run_state.request_stop(ShutdownReason::ParentDisconnected);
                    return LivenessExit::Disconnected;
                }
            }
        }
    }

    fn dispatch(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match line.parse::<ConsoleCommand>() {
            Ok(command) => {
                tracing::debug!(?command, "Console command received");
                if let Some(commands) = &self.commands {
                    if commands.try_send(command).is_err() {
                        tracing::warn!(?command, "Command handler busy; console command dropped");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring console line"),
        }
    }
}

/// The process's stdin as a liveness channel.
pub fn stdin_channel() -> BufReader<Stdin> {
    BufReader::new(tokio::io::stdin())
}

/// Apply console commands through the lifecycle controller.
///
/// Returns when the sender closes or the run stops; an in-flight command is
/// abandoned on stop so it cannot race the power-off.
pub async fn handle_commands(
    mut commands: mpsc::Receiver<ConsoleCommand>,
    lifecycle: Arc<LifecycleController>,
    run_state: Arc<RunState>,
) {
    loop {
        let command = tokio::select! {
            biased;
            _ = run_state.stopped() => return,
            command = commands.recv() => command,
        };
        let Some(ConsoleCommand::SetRange(range_m)) = command else {
            return;
        };
        tokio::select! {
            biased;
            _ = run_state.stopped() => return,
            result = lifecycle.apply_range(range_m) => {
                if let Err(e) = result {
                    tracing::warn!(range_m, error = %e, "Range change failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_range_command() {
        assert_eq!("RANGE 4.5".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::SetRange(4.5));
        assert_eq!("range 12".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::SetRange(12.0));
    }

    #[test]
    fn test_rejects_malformed_commands() {
        for line in ["RANGE", "RANGE abc", "RANGE -1", "RANGE 1 2", "GAIN 3", "RANGE inf"] {
            assert!(line.parse::<ConsoleCommand>().is_err(), "{line} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_end_of_stream_requests_stop() {
        let state = Arc::new(RunState::new());
        let reader: &[u8] = b"RANGE 3.0\nnoise\n";
        let exit = LivenessMonitor::new(reader, state.clone()).run().await;
        assert_eq!(exit, LivenessExit::Disconnected);
        assert_eq!(state.reason(), Some(ShutdownReason::ParentDisconnected));
    }

    #[tokio::test]
    async fn test_commands_are_forwarded() {
        let state = Arc::new(RunState::new());
        let (tx, mut rx) = mpsc::channel(4);
        let reader: &[u8] = b"RANGE 6.0\n\nbogus\nRANGE 9\n";
        LivenessMonitor::new(reader, state).with_commands(tx).run().await;

        assert_eq!(rx.recv().await, Some(ConsoleCommand::SetRange(6.0)));
        assert_eq!(rx.recv().await, Some(ConsoleCommand::SetRange(9.0)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_returns_when_run_stops_first() {
        let state = Arc::new(RunState::new());
        let (_writer, reader) = tokio::io::duplex(64);
        let monitor = tokio::spawn(LivenessMonitor::new(BufReader::new(reader), state.clone()).run());
        state.request_stop(ShutdownReason::Interrupted);
        assert_eq!(monitor.await.unwrap(), LivenessExit::Stopped);
        assert_eq!(state.reason(), Some(ShutdownReason::Interrupted));
    }
}
