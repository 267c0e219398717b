/// Async driver - runs a link over a tokio byte stream
///
/// The link itself is synchronous and tick-driven. The driver supplies the
/// host loop: it feeds bytes read from the stream into a [`QueueTransport`],
/// calls `poll_input` and `service` on every tick, and writes whatever the
/// link produced back to the stream. Applications talk to the running
/// driver through a cloneable [`LinkHandle`].
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::errors::{LinkError, Result};
use crate::link::{Fault, LinkEvent, SerialDataLink};
use crate::transport::{Clock, QueueTransport};

/// Default tick period; one outgoing byte per tick
pub const DEFAULT_TICK: Duration = Duration::from_millis(1);

const READ_CHUNK: usize = 64;

/// Requests from handles to the driver task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Publish { index: u8, value: i16 },
    ResendAll,
    Shutdown,
}

/// Latest view of the link published by the driver
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    /// Values learned from the peer, by slot index
    pub values: Vec<i16>,

    /// Acknowledgment timeouts and dropped packets so far
    pub transmission_errors: u64,

    /// Receive-side faults so far
    pub read_errors: u64,

    /// Packets applied so far
    pub packets_applied: u64,
}

/// Cloneable handle to a running driver
#[derive(Debug, Clone)]
pub struct LinkHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<LinkStatus>,
    capacity: usize,
}

impl LinkHandle {
    /// Publish a local value
    pub fn publish(&self, index: u8, value: i16) -> Result<()> {
        if index as usize >= self.capacity {
            return Err(LinkError::IndexOutOfRange {
                index,
                capacity: self.capacity,
            });
        }
        self.send(Command::Publish { index, value })
    }

    /// Ask the peer to republish its whole table
    pub fn request_resend_all(&self) -> Result<()> {
        self.send(Command::ResendAll)
    }

    /// Stop the driver after its current step
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Snapshot of the current status
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Latest value learned from the peer
    pub fn read(&self, index: u8) -> Option<i16> {
        self.status.borrow().values.get(index as usize).copied()
    }

    /// Wait until the driver publishes a new status
    pub async fn changed(&mut self) -> Result<()> {
        self.status.changed().await.map_err(|_| LinkError::Closed)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| LinkError::Closed)
    }
}

/// Owns a link and the stream it runs over
pub struct LinkDriver<S, C: Clock> {
    link: SerialDataLink<QueueTransport, C>,
    stream: S,
    tick: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<LinkStatus>,
}

impl<S, C> LinkDriver<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: Clock,
{
    /// Build a driver and the handle used to reach it
    pub fn new(stream: S, clock: C, config: LinkConfig) -> Result<(Self, LinkHandle)> {
        let capacity = config.table_capacity;
        let link = SerialDataLink::new(QueueTransport::new(), clock, config)?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus {
            values: vec![0; capacity],
            ..LinkStatus::default()
        });

        let driver = Self {
            link,
            stream,
            tick: DEFAULT_TICK,
            commands: command_rx,
            status: status_tx,
        };
        let handle = LinkHandle {
            commands: command_tx,
            status: status_rx,
            capacity,
        };
        Ok((driver, handle))
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn link(&self) -> &SerialDataLink<QueueTransport, C> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut SerialDataLink<QueueTransport, C> {
        &mut self.link
    }

    /// One host-loop iteration: poll input, service, flush output
    pub async fn step(&mut self) -> Result<Vec<LinkEvent>> {
        let mut events = self.link.poll_input();
        events.extend(self.link.service());

        let outbound = self.link.transport_mut().drain_outbound();
        if !outbound.is_empty() {
            self.stream.write_all(&outbound).await?;
            self.stream.flush().await?;
        }

        if !events.is_empty() {
            self.publish_status(&events);
        }
        Ok(events)
    }

    /// Run until shutdown, end of stream, or every handle is dropped
    ///
    /// # Errors
    /// `Io` if the stream fails.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; READ_CHUNK];

        info!(tick_ms = self.tick.as_millis() as u64, "link driver started");
        loop {
            tokio::select! {
                read = self.stream.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        debug!("stream closed by peer");
                        return Ok(());
                    }
                    self.link.transport_mut().push_inbound(&buf[..n]);
                }
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Publish { index, value }) => {
                            if let Err(err) = self.link.publish(index, value) {
                                warn!(%err, "publish rejected");
                            }
                        }
                        Some(Command::ResendAll) => self.link.request_resend_all(),
                        Some(Command::Shutdown) | None => {
                            info!("link driver stopping");
                            return Ok(());
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.step().await?;
                }
            }
        }
    }

    fn publish_status(&mut self, events: &[LinkEvent]) {
        let capacity = self.link.config().table_capacity;
        let values: Vec<i16> = (0..capacity)
            .map(|idx| self.link.read(idx as u8).unwrap_or_default())
            .collect();

        self.status.send_modify(|status| {
            status.values = values;
            for event in events {
                match event {
                    LinkEvent::DataApplied { .. } => status.packets_applied += 1,
                    LinkEvent::Fault(Fault::AcknowledgmentTimeout) | LinkEvent::PacketDropped => {
                        status.transmission_errors += 1
                    }
                    LinkEvent::Fault(_) => status.read_errors += 1,
                    _ => {}
                }
            }
        });
    }
}
