//! Virtual ESC/POS receipt printer for testing client software.
//!
//! The emulator accepts the same byte stream a network receipt printer
//! receives on port 9100, decodes it into [`Command`]s, keeps a log of
//! everything it was sent plus the [`PrintJob`]s that would have come out
//! of the printer, and can be told to fail: paper out, paper jam, offline,
//! timeouts and dropped connections, either on demand or on a trigger.
//!
//! ```no_run
//! use escpos_emulator::{EmulatorConfig, VirtualPrinterServer};
//!
//! # async fn example() -> escpos_emulator::Result<()> {
//! let server = VirtualPrinterServer::start(EmulatorConfig::default().with_addr("127.0.0.1", 0)).await?;
//! println!("printer at {}", server.local_addr());
//! // ... point the client under test at it ...
//! let jobs = server.print_history().await?;
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod codepage;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod faults;
pub mod parser;
pub mod protocol;
pub mod server;
pub mod state;

pub use command::{Command, CommandOrigin, ContentType, PrintJob};
pub use config::EmulatorConfig;
pub use engine::{Applied, Printer, PrinterEngine};
pub use error::{EmulatorError, Result};
pub use faults::{ErrorAction, ErrorCondition, ErrorEvent, ErrorSimulator, Recovery, RecoveryCondition, Trigger};
pub use parser::CommandParser;
pub use protocol::{CommandKind, CommandType};
pub use server::{ClientConnection, VirtualPrinterServer};
pub use state::{PaperStatus, PrinterState, StatusSnapshot};
