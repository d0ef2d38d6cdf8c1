use std::time::Duration;

use crate::state::DEFAULT_COALESCE_WINDOW;

/// Runtime settings for one emulated printer.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub host: String,
    /// 0 picks a free port
    pub port: u16,
    /// Pause after each command, like a real print head
    pub command_delay: Duration,
    /// Text commands closer together than this merge into one entry
    pub coalesce_window: Duration,
    /// `ESC t` table active at power-on
    pub initial_codepage: u8,
    pub read_buffer_size: usize,
    /// Seed for `random` fault triggers
    pub rng_seed: Option<u64>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9100,
            command_delay: Duration::from_millis(2),
            coalesce_window: DEFAULT_COALESCE_WINDOW,
            initial_codepage: 0,
            read_buffer_size: 8192,
            rng_seed: None,
        }
    }
}

impl EmulatorConfig {
    pub fn with_addr(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    pub fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce_window = window;
        self
    }

    pub fn with_initial_codepage(mut self, codepage: u8) -> Self {
        self.initial_codepage = codepage;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
