//! TCP front end: one accept loop plus one task per client, all feeding
//! the same [`PrinterEngine`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::command::{Command, PrintJob};
use crate::config::EmulatorConfig;
use crate::engine::{Printer, PrinterEngine};
use crate::error::{EmulatorError, Result};
use crate::faults::{ErrorCondition, ErrorEvent};
use crate::state::StatusSnapshot;

type Clients = Arc<Mutex<HashMap<u64, SocketAddr>>>;

fn lock(clients: &Clients) -> MutexGuard<'_, HashMap<u64, SocketAddr>> {
    clients.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One accepted client. Its commands are applied strictly in arrival order.
pub struct ClientConnection {
    socket: TcpStream,
    addr: SocketAddr,
    engine: PrinterEngine,
    command_delay: Duration,
    read_buffer_size: usize,
}

impl ClientConnection {
    pub fn new(socket: TcpStream, addr: SocketAddr, engine: PrinterEngine, config: &EmulatorConfig) -> Self {
        Self {
            socket,
            addr,
            engine,
            command_delay: config.command_delay,
            read_buffer_size: config.read_buffer_size.max(1),
        }
    }

    /// Read loop. Returns on EOF, read error, an injected connection fault
    /// or server shutdown; a command being applied always completes first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Client connected: {}", self.addr);
        let mut buffer = vec![0u8; self.read_buffer_size];

        while !*shutdown.borrow() {
            let read = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                read = self.socket.read(&mut buffer) => read,
            };

            match read {
                Ok(0) => break,
                Ok(n) => {
                    debug!("Received {} bytes from {}: {:02X?}", n, self.addr, &buffer[..n]);
                    match self.process_data(&buffer[..n]).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => {
                            warn!("Error processing data from {}: {}", self.addr, e);
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!("Error reading from {}: {}", self.addr, e);
                    break;
                }
            }
        }

        let _ = self.socket.shutdown().await;
        info!("Client disconnected: {}", self.addr);
    }

    /// Decodes `data` and applies each command in turn. Returns false when
    /// the connection should be dropped.
    async fn process_data(&mut self, data: &[u8]) -> Result<bool> {
        let commands = self.engine.decode(data.to_vec()).await?;
        for command in commands {
            let command_type = command.command_type;
            let applied = self.engine.apply(command).await?;
            if let Some(fault) = &applied.activated {
                info!("{} activated {} on {}", command_type, fault, self.addr);
            }

            if let Some(response) = applied.response {
                debug!("Sending {} response bytes: {:02X?}", response.len(), response);
                self.socket.write_all(&response).await?;
                self.socket.flush().await?;
            }

            if applied.disconnect {
                info!("Dropping {} while connection fault is active", self.addr);
                return Ok(false);
            }

            // Print-head timing; only this connection waits
            if !self.command_delay.is_zero() {
                tokio::time::sleep(self.command_delay).await;
            }
        }
        Ok(true)
    }
}

/// A virtual ESC/POS printer listening on TCP, plus the operator controls
/// a test harness uses to inspect it and inject faults.
pub struct VirtualPrinterServer {
    local_addr: SocketAddr,
    engine: PrinterEngine,
    clients: Clients,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl VirtualPrinterServer {
    /// Binds the listener and starts accepting connections.
    pub async fn start(config: EmulatorConfig) -> Result<Self> {
        let addr = config.bind_addr();
        info!("Starting virtual printer server on {}", addr);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| EmulatorError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let engine = PrinterEngine::spawn(Printer::new(&config));
        let clients = Clients::default();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            engine.clone(),
            clients.clone(),
            shutdown_rx,
            config,
        ));

        info!("Virtual printer server listening on {}", local_addr);
        Ok(Self {
            local_addr,
            engine,
            clients,
            shutdown,
            accept_task: Mutex::new(Some(accept_task)),
            running: AtomicBool::new(true),
        })
    }

    /// Closes every client connection, then the listener. Commands already
    /// being applied finish first.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping virtual printer server");
        let _ = self.shutdown.send(true);

        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Accept loop ended abnormally: {}", e);
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn client_count(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn clients(&self) -> Vec<SocketAddr> {
        lock(&self.clients).values().copied().collect()
    }

    pub fn engine(&self) -> &PrinterEngine {
        &self.engine
    }

    pub async fn add_error_condition(&self, condition: ErrorCondition) -> Result<()> {
        self.engine.add_condition(condition).await
    }

    pub async fn remove_error_condition(&self, error_type: &str) -> Result<()> {
        self.engine.remove_condition(error_type.to_string()).await
    }

    pub async fn trigger_error(&self, error_type: &str) -> Result<()> {
        self.engine.trigger_error(error_type.to_string()).await
    }

    /// Applies a fault to the printer and records it in the fault history.
    pub async fn simulate_error(&self, error_type: &str) -> Result<()> {
        self.engine.simulate_error(error_type.to_string()).await?;
        info!("Simulated printer error: {}", error_type);
        Ok(())
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        self.engine.status().await
    }

    pub async fn print_history(&self) -> Result<Vec<PrintJob>> {
        self.engine.print_history().await
    }

    pub async fn command_log(&self) -> Result<Vec<Command>> {
        self.engine.command_log().await
    }

    pub async fn error_history(&self) -> Result<Vec<ErrorEvent>> {
        self.engine.error_history().await
    }

    pub async fn active_errors(&self) -> Result<Vec<String>> {
        self.engine.active_errors().await
    }

    pub async fn clear_history(&self) -> Result<()> {
        self.engine.clear_history().await?;
        info!("Printer history and buffers cleared");
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.engine.reset().await?;
        info!("Printer reset to initial state");
        Ok(())
    }

    /// Drops every fault condition and the fault history.
    pub async fn reset_faults(&self) -> Result<()> {
        self.engine.reset_faults().await?;
        info!("Fault conditions and history cleared");
        Ok(())
    }
}

impl Drop for VirtualPrinterServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    engine: PrinterEngine,
    clients: Clients,
    mut shutdown: watch::Receiver<bool>,
    config: EmulatorConfig,
) {
    let mut connections = JoinSet::new();
    let mut next_id = 0u64;

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        let (socket, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Error accepting connection: {}", e);
                continue;
            }
        };

        match engine.is_offline().await {
            Ok(false) => {}
            Ok(true) => {
                info!("Rejecting connection while offline: {}", addr);
                drop(socket);
                continue;
            }
            Err(e) => {
                warn!("Stopping accept loop: {}", e);
                break;
            }
        }

        next_id += 1;
        let id = next_id;
        lock(&clients).insert(id, addr);

        let connection = ClientConnection::new(socket, addr, engine.clone(), &config);
        let clients = clients.clone();
        let shutdown = shutdown.clone();
        connections.spawn(async move {
            connection.run(shutdown).await;
            lock(&clients).remove(&id);
        });

        // Reap finished connections
        while connections.try_join_next().is_some() {}
    }

    // Connections watch the same signal; wait for them before the listener goes
    while connections.join_next().await.is_some() {}
    drop(listener);
    info!("Virtual printer server stopped");
}
