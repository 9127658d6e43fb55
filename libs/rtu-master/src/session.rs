//! Modbus RTU transport session
//!
//! A single tokio task owns the serial line together with the transaction
//! table, the reassembly buffer and the request queue, so none of them need
//! locking. Callers hold a cloneable [`Session`] handle and talk to the task
//! over a command channel; results come back on a per-request oneshot.
//!
//! RTU frames carry no transaction id, so the bus is request-at-a-time:
//! requests issued while one is in flight wait in a FIFO queue and are
//! written as soon as the current one resolves.
//!
//! ```text
//! Closed -> Opening -> Open -> Closed
//!                       |
//!                       +--> Faulted (read/write failure, EOF)
//! ```

use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, trace, warn};

use crate::config::RtuConfig;
use crate::constants::{EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, MAX_RTU_FRAME_SIZE};
use crate::error::{Result, RtuError};
use crate::frame::{try_decode_response, DecodeOutcome, ReadRequest, ReadResponse};
use crate::logging::hex_dump;
use crate::reassembly::ReassemblyBuffer;
use crate::transaction::{Completion, Transaction, TransactionTable};

/// Session lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    /// Unrecoverable transport error, with its description
    Faulted(String),
}

#[derive(Debug)]
enum Command {
    Read {
        request: ReadRequest,
        reply: Completion,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running session
#[derive(Debug, Clone)]
pub struct Session {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
}

impl Session {
    /// Open the configured serial port and start the session task
    pub async fn open(config: &RtuConfig) -> Result<Self> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(SessionState::Opening);
        debug!("RTU: {} @{}baud", config.device, config.baud_rate);

        let port = tokio_serial::new(&config.device, config.baud_rate)
            .data_bits(config.data_bits())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits())
            .open_native_async();

        match port {
            Ok(port) => {
                info!("RTU opened: {}", config.device);
                Ok(Self::spawn(port, config, state_tx, state_rx))
            },
            Err(e) => {
                error!("RTU err: {} - {}", config.device, e);
                state_tx.send_replace(SessionState::Closed);
                Err(RtuError::transport(format!(
                    "Failed to open serial port {}: {e}",
                    config.device
                )))
            },
        }
    }

    /// Run a session over an already open byte stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach<T>(io: T, config: &RtuConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(SessionState::Opening);
        Self::spawn(io, config, state_tx, state_rx)
    }

    fn spawn<T>(
        io: T,
        config: &RtuConfig,
        state_tx: watch::Sender<SessionState>,
        state_rx: watch::Receiver<SessionState>,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::channel(config.queue_depth.max(1));
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();
        let (reader, writer) = tokio::io::split(io);

        let task = SessionTask {
            writer,
            config: config.clone(),
            table: TransactionTable::new(),
            reassembly: ReassemblyBuffer::new(),
            queue: VecDeque::new(),
            current: None,
            timers: timers_tx,
            state: state_tx,
        };
        task.set_state(SessionState::Open);
        tokio::spawn(task.run(reader, commands_rx, timers_rx));

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    /// Issue one read holding registers request and wait for its outcome
    pub async fn send(&self, request: ReadRequest) -> Result<ReadResponse> {
        if !self.is_open() {
            return Err(RtuError::PortNotOpen);
        }
        request.check_addresses()?;

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Read { request, reply })
            .await
            .map_err(|_| RtuError::PortNotOpen)?;

        response.await.map_err(|_| RtuError::PortNotOpen)?
    }

    /// Close the line. Outstanding and queued requests fail with `SessionClosed`.
    pub async fn close(&self) {
        let (done, closed) = oneshot::channel();
        if self.commands.send(Command::Close { done }).await.is_ok() {
            let _ = closed.await;
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow() == SessionState::Open
    }

    /// Watch state transitions, e.g. to learn about a fault exactly once
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

struct SessionTask<W> {
    writer: W,
    config: RtuConfig,
    table: TransactionTable,
    reassembly: ReassemblyBuffer,
    /// Requests waiting for the bus, at most `config.queue_depth`
    queue: VecDeque<(ReadRequest, Completion)>,
    /// Transaction currently on the wire
    current: Option<u16>,
    timers: mpsc::UnboundedSender<u16>,
    state: watch::Sender<SessionState>,
}

impl<W> SessionTask<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn run<R>(
        mut self,
        mut reader: R,
        mut commands: mpsc::Receiver<Command>,
        mut expired: mpsc::UnboundedReceiver<u16>,
    ) where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; MAX_RTU_FRAME_SIZE];

        loop {
            let outcome = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Read { request, reply }) => self.enqueue(request, reply).await,
                    Some(Command::Close { done }) => {
                        self.shutdown().await;
                        reject_backlog(&mut commands, &RtuError::SessionClosed);
                        let _ = done.send(());
                        return;
                    },
                    None => {
                        debug!("Session handles dropped");
                        self.shutdown().await;
                        return;
                    },
                },
                read = reader.read(&mut buf) => match read {
                    Ok(0) => Err(RtuError::transport("Serial connection closed")),
                    Ok(n) => self.on_data(&buf[..n]).await,
                    Err(e) => Err(RtuError::transport(format!("Serial read error: {e}"))),
                },
                Some(id) = expired.recv() => self.on_timeout(id).await,
            };

            if let Err(e) = outcome {
                self.fault(e);
                reject_backlog(&mut commands, &RtuError::PortNotOpen);
                return;
            }
        }
    }

    async fn enqueue(&mut self, request: ReadRequest, reply: Completion) -> Result<()> {
        if self.current.is_some() {
            if self.queue.len() >= self.config.queue_depth {
                warn!("RTU queue full: unit={} rejected", request.unit);
                let _ = reply.send(Err(RtuError::QueueFull(self.queue.len())));
                return Ok(());
            }
            self.queue.push_back((request, reply));
            debug!("RTU queued: unit={} ({} waiting)", request.unit, self.queue.len());
            return Ok(());
        }
        self.start(request, reply).await
    }

    async fn start_next(&mut self) -> Result<()> {
        while self.current.is_none() {
            let Some((request, reply)) = self.queue.pop_front() else {
                break;
            };
            self.start(request, reply).await?;
        }
        Ok(())
    }

    /// Encode, register, write, arm the timer. Only transport failures are
    /// returned; request-level failures go to the caller's completion.
    async fn start(&mut self, request: ReadRequest, reply: Completion) -> Result<()> {
        let frame = match request.encode() {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(e));
                return Ok(());
            },
        };
        let expected_len = self
            .config
            .expected_response_len
            .unwrap_or_else(|| request.expected_response_len());

        let id = self.table.next_id();
        let transaction = Transaction::new(id, request.unit, expected_len, reply);
        if let Err(e) = self.table.register(transaction) {
            warn!("RTU register: {}", e);
            return Ok(());
        }
        self.current = Some(id);

        debug!(
            "RTU TX: id={} unit={} start={} count={}",
            id, request.unit, request.start, request.count
        );
        trace!("RTU TX: [{}]", hex_dump(&frame));

        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| RtuError::transport(format!("Serial send error: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| RtuError::transport(format!("Serial flush error: {e}")))?;

        if let Some(after) = self.config.timeout() {
            self.arm_timer(id, after);
        }
        Ok(())
    }

    fn arm_timer(&mut self, id: u16, after: Duration) {
        let expired = self.timers.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = expired.send(id);
        });
        self.table.arm_timeout(id, timer.abort_handle(), after);
    }

    async fn on_data(&mut self, chunk: &[u8]) -> Result<()> {
        trace!("RTU RX: [{}]", hex_dump(chunk));

        let pending = self
            .current
            .and_then(|id| self.table.get(id))
            .map(|tx| (tx.id, tx.unit, tx.expected_len));
        let Some((id, unit, expected_len)) = pending else {
            debug!("RTU RX: {}B dropped, nothing pending", chunk.len());
            return Ok(());
        };

        let threshold = self.config.frame_threshold(expected_len);
        let Some(frame) = self.reassembly.push(chunk, threshold) else {
            debug!("RTU partial: {}B held", self.reassembly.held_len());
            return Ok(());
        };

        let result = match try_decode_response(&frame, expected_len) {
            DecodeOutcome::Incomplete => {
                debug!("RTU partial: {}/{}B", frame.len(), expected_len);
                self.reassembly.restore(&frame);
                return Ok(());
            },
            DecodeOutcome::ChecksumMismatch { expected, received } => {
                warn!(
                    "RTU CRC mismatch: expected 0x{:04X}, got 0x{:04X}",
                    expected, received
                );
                Err(RtuError::ChecksumMismatch { expected, received })
            },
            DecodeOutcome::Frame(response) => {
                let function = response.function_code() & !EXCEPTION_FLAG;
                if response.unit_address() != unit || function != FC_READ_HOLDING_REGISTERS {
                    warn!(
                        "RTU RX: ignored frame unit={} FC={:02X}, waiting for unit={}",
                        response.unit_address(),
                        response.function_code(),
                        unit
                    );
                    return Ok(());
                }
                match response.exception_code() {
                    Some(code) => {
                        warn!("RTU exception: unit={} code={:02X}", unit, code);
                        Err(RtuError::Exception { function, code })
                    },
                    None if !response.byte_count_matches() => {
                        warn!(
                            "RTU RX: byte count {} but {}B payload",
                            response.byte_count(),
                            response.payload().len()
                        );
                        Err(RtuError::InvalidResponse(format!(
                            "byte count {} does not match {}-byte payload",
                            response.byte_count(),
                            response.payload().len()
                        )))
                    },
                    None => {
                        debug!("RTU RX: id={} {}B", id, response.raw().len());
                        Ok(response.to_response())
                    },
                }
            },
        };

        self.finish(id, result).await
    }

    async fn finish(&mut self, id: u16, result: Result<ReadResponse>) -> Result<()> {
        self.table.complete(id, result);
        if self.current == Some(id) {
            self.current = None;
        }
        self.start_next().await
    }

    async fn on_timeout(&mut self, id: u16) -> Result<()> {
        if !self.table.timeout_expired(id) {
            debug!("RTU timer {} fired after completion", id);
            return Ok(());
        }
        warn!("RTU timeout: id={}", id);

        // Leftover bytes belong to the expired request
        self.reassembly.clear();
        if self.current == Some(id) {
            self.current = None;
        }
        self.start_next().await
    }

    async fn shutdown(&mut self) {
        let failed = self.table.fail_all(&RtuError::SessionClosed)
            + self.drain_queue(&RtuError::SessionClosed);
        self.current = None;
        self.reassembly.clear();

        if let Err(e) = self.writer.shutdown().await {
            debug!("RTU shutdown: {}", e);
        }
        self.set_state(SessionState::Closed);
        info!("Session closed, {} request(s) failed", failed);
    }

    fn fault(&mut self, err: RtuError) {
        error!("RTU fault: {}", err);
        // The in-flight request carries the error; everything behind it
        // simply finds the port gone.
        self.table.fail_all(&err);
        self.drain_queue(&RtuError::PortNotOpen);
        self.current = None;
        self.reassembly.clear();
        self.set_state(SessionState::Faulted(err.to_string()));
    }

    fn drain_queue(&mut self, err: &RtuError) -> usize {
        let count = self.queue.len();
        for (_, reply) in self.queue.drain(..) {
            let _ = reply.send(Err(err.clone()));
        }
        count
    }

    fn set_state(&self, state: SessionState) {
        debug!("Session state: {:?}", state);
        self.state.send_replace(state);
    }
}

/// Answer commands that were sent but never picked up
fn reject_backlog(commands: &mut mpsc::Receiver<Command>, err: &RtuError) {
    commands.close();
    while let Ok(command) = commands.try_recv() {
        match command {
            Command::Read { reply, .. } => {
                let _ = reply.send(Err(err.clone()));
            },
            Command::Close { done } => {
                let _ = done.send(());
            },
        }
    }
}
