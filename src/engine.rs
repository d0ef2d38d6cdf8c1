//! The single logical printer shared by every connection.
//!
//! [`Printer`] bundles the parser, the printer state and the fault
//! simulator. [`PrinterEngine`] moves it into one task and hands out a
//! cloneable handle; each request runs to completion before the next one
//! starts, so every command is applied atomically no matter how many
//! connections are feeding it.

use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::codepage::Codepage;
use crate::command::{Command, PrintJob};
use crate::config::EmulatorConfig;
use crate::error::{EmulatorError, Result};
use crate::faults::{ErrorCondition, ErrorEvent, ErrorSimulator, CONNECTION_ERROR, RESET, TIMEOUT};
use crate::parser::CommandParser;
use crate::protocol::CommandKind;
use crate::state::{PrinterState, StatusSnapshot};

/// Result of applying one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// First fault this command activated
    pub activated: Option<String>,
    /// Bytes to write back to the client
    pub response: Option<Vec<u8>>,
    /// The connection should be dropped
    pub disconnect: bool,
}

#[derive(Debug)]
pub struct Printer {
    pub parser: CommandParser,
    pub state: PrinterState,
    pub simulator: ErrorSimulator,
}

impl Printer {
    pub fn new(config: &EmulatorConfig) -> Self {
        Self {
            parser: CommandParser::new(Codepage::select(config.initial_codepage)),
            state: PrinterState::new(config.coalesce_window),
            simulator: ErrorSimulator::new(config.rng_seed),
        }
    }

    pub fn decode(&mut self, bytes: &[u8]) -> Vec<Command> {
        self.parser.feed(bytes)
    }

    /// Runs one command through the fault simulator, then the state machine.
    pub fn apply(&mut self, command: Command) -> Applied {
        let outcome = self
            .simulator
            .process_at(command.command_type, Instant::now());
        for error_type in &outcome.activated {
            self.state.simulate_error(error_type);
        }
        self.restore(&outcome.recovered);

        // A timed-out printer stops answering
        let response = match command.kind {
            CommandKind::StatusRequest { .. } if !self.simulator.is_active(TIMEOUT) => {
                Some(vec![self.state.status().status_byte()])
            }
            _ => None,
        };

        self.state.update(command);

        Applied {
            activated: outcome.activated.into_iter().next(),
            response,
            disconnect: self.simulator.is_active(CONNECTION_ERROR),
        }
    }

    /// Forces a fault active and applies it to the state, exactly like a
    /// trigger-driven activation. `reset` resets the printer instead.
    pub fn trigger_error(&mut self, error_type: &str) {
        if error_type == RESET {
            self.reset();
            return;
        }
        self.simulator.trigger_error(error_type);
        self.state.simulate_error(error_type);
    }

    /// Same as [`trigger_error`](Self::trigger_error).
    pub fn simulate_error(&mut self, error_type: &str) {
        self.trigger_error(error_type);
    }

    pub fn add_condition(&mut self, condition: ErrorCondition) {
        let error_type = condition.error_type.clone();
        if self.simulator.add_condition(condition) {
            self.restore(&[error_type]);
        }
    }

    pub fn remove_condition(&mut self, error_type: &str) {
        if self.simulator.remove_condition(error_type) {
            self.restore(&[error_type.to_string()]);
        }
    }

    pub fn is_offline(&self) -> bool {
        !self.state.online
    }

    /// Back online with paper loaded. Every active fault is recovered so
    /// the simulator agrees with the state.
    pub fn reset(&mut self) {
        let recovered = self.simulator.recover_all();
        if !recovered.is_empty() {
            debug!(?recovered, "reset recovered faults");
        }
        self.state.reset();
        self.parser.clear();
    }

    /// Forgets every condition and the fault history, undoing the effect
    /// of whatever was active.
    pub fn reset_faults(&mut self) {
        let active = self.simulator.active_errors();
        self.simulator.reset();
        self.restore(&active);
    }

    // Undo recovered faults, then reapply what is still active: two faults
    // can share one status field.
    fn restore(&mut self, recovered: &[String]) {
        if recovered.is_empty() {
            return;
        }
        for error_type in recovered {
            self.state.clear_error(error_type);
        }
        for error_type in self.simulator.active_errors() {
            self.state.simulate_error(&error_type);
        }
    }

    pub fn clear_history(&mut self) {
        self.state.clear_history();
        self.parser.clear();
    }
}

type Job = Box<dyn FnOnce(&mut Printer) + Send>;

/// Cloneable handle to the task that owns the [`Printer`].
#[derive(Debug, Clone)]
pub struct PrinterEngine {
    tx: mpsc::Sender<Job>,
}

impl PrinterEngine {
    /// Spawns the owning task; it runs until every handle is dropped.
    pub fn spawn(mut printer: Printer) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(64);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job(&mut printer);
            }
            debug!("printer engine stopped");
        });
        Self { tx }
    }

    /// Runs `f` against the printer, exclusively.
    pub async fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Printer) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |printer| {
            let _ = reply_tx.send(f(printer));
        });
        self.tx
            .send(job)
            .await
            .map_err(|_| EmulatorError::EngineClosed)?;
        reply_rx.await.map_err(|_| EmulatorError::EngineClosed)
    }

    pub async fn decode(&self, bytes: Vec<u8>) -> Result<Vec<Command>> {
        self.call(move |p| p.decode(&bytes)).await
    }

    pub async fn apply(&self, command: Command) -> Result<Applied> {
        self.call(move |p| p.apply(command)).await
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        self.call(|p| p.state.status()).await
    }

    pub async fn print_history(&self) -> Result<Vec<PrintJob>> {
        self.call(|p| p.state.print_history().to_vec()).await
    }

    pub async fn command_log(&self) -> Result<Vec<Command>> {
        self.call(|p| p.state.command_log().to_vec()).await
    }

    pub async fn error_history(&self) -> Result<Vec<ErrorEvent>> {
        self.call(|p| p.simulator.history().to_vec()).await
    }

    pub async fn active_errors(&self) -> Result<Vec<String>> {
        self.call(|p| p.simulator.active_errors()).await
    }

    pub async fn add_condition(&self, condition: ErrorCondition) -> Result<()> {
        self.call(move |p| p.add_condition(condition)).await
    }

    pub async fn remove_condition(&self, error_type: String) -> Result<()> {
        self.call(move |p| p.remove_condition(&error_type)).await
    }

    pub async fn trigger_error(&self, error_type: String) -> Result<()> {
        self.call(move |p| p.trigger_error(&error_type)).await
    }

    pub async fn simulate_error(&self, error_type: String) -> Result<()> {
        self.call(move |p| p.simulate_error(&error_type)).await
    }

    pub async fn is_offline(&self) -> Result<bool> {
        self.call(|p| p.is_offline()).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.call(|p| p.reset()).await
    }

    pub async fn reset_faults(&self) -> Result<()> {
        self.call(|p| p.reset_faults()).await
    }

    pub async fn clear_history(&self) -> Result<()> {
        self.call(|p| p.clear_history()).await
    }
}
