use qrcode::QrCode;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::command::{Command, CommandOrigin, ContentType, Parameters, PrintJob};
use crate::faults::{OFFLINE, PAPER_JAM, PAPER_OUT, RESET};
use crate::protocol::{CommandKind, CommandType, QrFunction};

pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    Loaded,
    Out,
    Jammed,
}

/// Point-in-time view handed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub online: bool,
    pub paper_status: PaperStatus,
    pub buffer_size: usize,
    pub print_history_count: usize,
    pub command_log_count: usize,
}

impl StatusSnapshot {
    /// The byte answered to a real-time status request.
    pub fn status_byte(&self) -> u8 {
        let mut status = 0x00;
        if !self.online {
            status |= 0x08;
        }
        if self.paper_status != PaperStatus::Loaded {
            status |= 0x20;
        }
        status
    }
}

/// The emulated printer engine: status, pending text, command log and the
/// print jobs derived from it.
#[derive(Debug)]
pub struct PrinterState {
    pub online: bool,
    pub paper_status: PaperStatus,
    buffer: Vec<Vec<u8>>,
    command_log: Vec<Command>,
    print_history: Vec<PrintJob>,
    coalesce_window: Duration,
    last_text_at: Option<Instant>,
    // GS ( k store function data, printed by the next print function
    pending_qr: Option<Vec<u8>>,
}

impl Default for PrinterState {
    fn default() -> Self {
        Self::new(DEFAULT_COALESCE_WINDOW)
    }
}

impl PrinterState {
    pub fn new(coalesce_window: Duration) -> Self {
        Self {
            online: true,
            paper_status: PaperStatus::Loaded,
            buffer: Vec::new(),
            command_log: Vec::new(),
            print_history: Vec::new(),
            coalesce_window,
            last_text_at: None,
            pending_qr: None,
        }
    }

    /// Folds one command into the state. Never rejects a command.
    pub fn update(&mut self, command: Command) {
        if command.command_type == CommandType::Text {
            self.update_text(command);
            return;
        }

        match &command.kind {
            CommandKind::Cut { .. } => {
                if !self.buffer.is_empty() {
                    let data = self.buffer.concat();
                    self.buffer.clear();
                    self.add_print_job(ContentType::Text, data, command.parameters());
                }
            }
            CommandKind::Image { .. } => {
                self.add_print_job(ContentType::Image, command.raw_data.clone(), command.parameters());
            }
            CommandKind::Barcode { .. } => {
                self.add_print_job(ContentType::Barcode, command.raw_data.clone(), command.parameters());
            }
            CommandKind::Qr(QrFunction::Store { data }) => {
                self.pending_qr = Some(data.clone());
            }
            CommandKind::Qr(QrFunction::Print) => match self.pending_qr.take() {
                Some(data) if !data.is_empty() => {
                    let parameters = qr_parameters(&data);
                    self.add_print_job(ContentType::Qr, data, parameters);
                }
                _ => debug!("QR print without stored symbol data"),
            },
            // Feeds, mode changes and everything else are only logged
            _ => {}
        }

        self.command_log.push(command);
    }

    fn update_text(&mut self, command: Command) {
        let at = command.received;
        let recent = self
            .last_text_at
            .is_some_and(|last| at.saturating_duration_since(last) < self.coalesce_window);
        let follows_text = self
            .command_log
            .last()
            .is_some_and(|c| c.command_type == CommandType::Text);
        self.last_text_at = Some(at);

        match command.origin {
            CommandOrigin::Mirrored if recent && follows_text => {
                debug!("dropping mirrored text already recorded");
            }
            CommandOrigin::Stream if recent && follows_text => self.merge_text(command),
            _ => {
                self.buffer.push(command.raw_data.clone());
                self.add_print_job(ContentType::Text, command.raw_data.clone(), command.parameters());
                self.command_log.push(command);
            }
        }
    }

    fn merge_text(&mut self, command: Command) {
        if let Some(last) = self.command_log.last_mut() {
            last.raw_data.extend_from_slice(&command.raw_data);
            if let (CommandKind::Text { text }, CommandKind::Text { text: more }) =
                (&mut last.kind, &command.kind)
            {
                text.push_str(more);
            }
        }
        match self.buffer.last_mut() {
            Some(pending) => pending.extend_from_slice(&command.raw_data),
            None => self.buffer.push(command.raw_data.clone()),
        }
        if let Some(job) = self.print_history.last_mut() {
            if job.content_type == ContentType::Text {
                job.data.extend_from_slice(&command.raw_data);
                if let Some(Value::String(text)) = job.parameters.get_mut("text") {
                    text.push_str(&String::from_utf8_lossy(&command.raw_data));
                }
            }
        }
    }

    fn add_print_job(&mut self, content_type: ContentType, data: Vec<u8>, parameters: Parameters) {
        debug!(content_type = content_type.as_str(), bytes = data.len(), "print job");
        self.print_history.push(PrintJob::new(content_type, data, parameters));
    }

    /// Applies a fault's effect on status. Unknown fault types change nothing.
    pub fn simulate_error(&mut self, error_type: &str) {
        match error_type {
            OFFLINE => self.online = false,
            PAPER_OUT => self.paper_status = PaperStatus::Out,
            PAPER_JAM => self.paper_status = PaperStatus::Jammed,
            RESET => self.reset(),
            _ => {}
        }
    }

    /// Undoes the effect of a fault that recovered.
    pub fn clear_error(&mut self, error_type: &str) {
        match error_type {
            OFFLINE => self.online = true,
            PAPER_OUT | PAPER_JAM => self.paper_status = PaperStatus::Loaded,
            _ => {}
        }
    }

    /// Back to online with paper loaded and nothing pending. History is kept.
    pub fn reset(&mut self) {
        self.online = true;
        self.paper_status = PaperStatus::Loaded;
        self.buffer.clear();
        self.pending_qr = None;
    }

    pub fn clear_history(&mut self) {
        self.print_history.clear();
        self.command_log.clear();
        self.buffer.clear();
        self.pending_qr = None;
        self.last_text_at = None;
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// The next text command starts a new block even inside the window.
    pub fn start_new_text_block(&mut self) {
        self.last_text_at = None;
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            online: self.online,
            paper_status: self.paper_status,
            buffer_size: self.buffer.len(),
            print_history_count: self.print_history.len(),
            command_log_count: self.command_log.len(),
        }
    }

    pub fn buffer(&self) -> &[Vec<u8>] {
        &self.buffer
    }

    pub fn command_log(&self) -> &[Command] {
        &self.command_log
    }

    pub fn print_history(&self) -> &[PrintJob] {
        &self.print_history
    }
}

fn qr_parameters(data: &[u8]) -> Parameters {
    let mut parameters = Parameters::new();
    parameters.insert("data".into(), Value::from(String::from_utf8_lossy(data).into_owned()));
    match QrCode::new(data) {
        Ok(code) => {
            parameters.insert("encodable".into(), Value::from(true));
            parameters.insert("modules".into(), Value::from(code.width()));
        }
        Err(e) => {
            debug!("QR data not encodable: {:?}", e);
            parameters.insert("encodable".into(), Value::from(false));
        }
    }
    parameters
}
