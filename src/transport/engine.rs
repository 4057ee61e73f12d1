//! Transport Engine
//!
//! Per-link state of the transparent UART service and the application facing
//! data path. Each link has:
//!
//! * TX and Control channel state, opened by the peer through their CCCDs
//! * a [`CreditLedger`] for both flow control directions
//! * an [`InputQueue`] of received packets
//! * one retry slot for a write response the stack could not take, and one
//!   pending credit grant
//!
//! Deferred work is flushed on [`StackEvent::TxBufferAvailable`], response
//! first, and no application data is admitted until it has been.

use bt_hci::param::ConnHandle;
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, channel::Sender};
use heapless::Vec;

use super::{
    ServiceHandles, TransportEvent, TransportOptions,
    control::{CTRL_OP_VENDOR_MIN, ControlCommand, CreditGrant},
    credit::CreditLedger,
    queue::InputQueue,
};
use crate::{
    BleError, BleResult,
    att::{AttErrorCode, CCCD_DISABLED, CCCD_NOTIFY},
    constants::{
        ATT_DEFAULT_MTU, ATT_HEADER_SIZE, ATT_MAX_MTU, EVENT_QUEUE_DEPTH, MAX_CONNECTIONS,
        MAX_PAYLOAD_SIZE, PACKET_POOL_SIZE,
    },
    packet_pool::PacketPool,
    slots::ConnectionSlots,
    stack::{GapEvent, GattServer, GattServerEvent, StackEvent, WriteKind, WriteResponse},
};

/// Sending half of the transport event channel
pub type TransportEventSender<'ch> = Sender<'ch, NoopRawMutex, TransportEvent, EVENT_QUEUE_DEPTH>;

type RxPool = PacketPool<MAX_PAYLOAD_SIZE, PACKET_POOL_SIZE>;

fn emit(events: &TransportEventSender<'_>, event: TransportEvent) {
    if let Err(e) = events.try_send(event) {
        warn!("[TRSPS] Event queue full, dropping {:?}", e);
    }
}

/// What a connection needs to talk back to the stack and the application
struct Io<'a, 'ch, S> {
    stack: &'a mut S,
    conn: ConnHandle,
    handles: ServiceHandles,
    events: &'a TransportEventSender<'ch>,
}

impl<S: GattServer> Io<'_, '_, S> {
    fn emit(&self, event: TransportEvent) {
        emit(self.events, event);
    }
}

#[derive(Debug)]
struct TrspsConnection {
    mtu: u16,
    tx_open: bool,
    ctrl_open: bool,
    credits: CreditLedger,
    retry: Option<WriteResponse>,
    grant_pending: Option<CreditGrant>,
    queue: InputQueue,
}

impl TrspsConnection {
    const fn new() -> Self {
        Self {
            mtu: ATT_DEFAULT_MTU,
            tx_open: false,
            ctrl_open: false,
            credits: CreditLedger::new(),
            retry: None,
            grant_pending: None,
            queue: InputQueue::new(),
        }
    }

    fn has_deferred_work(&self) -> bool {
        self.retry.is_some() || self.grant_pending.is_some()
    }

    /// Notification payload bound; receive buffers cap it at `ATT_MAX_MTU`
    fn max_payload(&self) -> usize {
        usize::from(self.mtu.min(ATT_MAX_MTU).saturating_sub(ATT_HEADER_SIZE))
    }

    /// Answer a write, parking the response if the stack cannot take it
    fn respond<S: GattServer>(
        &mut self,
        io: &mut Io<'_, '_, S>,
        kind: WriteKind,
        attr_handle: u16,
        result: Result<(), AttErrorCode>,
    ) {
        if !kind.needs_response() {
            return;
        }
        let response = match result {
            Ok(()) => WriteResponse::Accept,
            Err(error) => WriteResponse::Reject {
                request_opcode: kind.opcode(),
                attr_handle,
                error,
            },
        };
        if let Err(e) = io.stack.send_write_response(io.conn, &response) {
            if self.retry.is_none() {
                debug!(
                    "[TRSPS] Write response on {} deferred: {:?}",
                    io.conn.raw(),
                    e
                );
                self.retry = Some(response);
            } else {
                warn!("[TRSPS] Write response on {} lost: {:?}", io.conn.raw(), e);
                io.emit(TransportEvent::ErrorUnspecified { conn: io.conn });
            }
        }
    }

    /// Send a credit notification, or keep it for the next TX buffer
    fn grant<S: GattServer>(&mut self, io: &mut Io<'_, '_, S>, kind: CreditGrant) {
        if self.retry.is_some() {
            if self.grant_pending.is_none() || kind == CreditGrant::ServerEnabled {
                self.grant_pending = Some(kind);
            }
            return;
        }
        let credit = self.credits.peer_credit();
        let value = kind.encode(self.mtu, credit);
        match io
            .stack
            .send_notification(io.conn, io.handles.ctrl_value, &value)
        {
            Ok(()) => {
                debug!("[TRSPS] Granted {} credits on {}", credit, io.conn.raw());
                self.credits.granted();
                self.grant_pending = None;
            }
            Err(e) => {
                debug!(
                    "[TRSPS] Credit grant on {} deferred: {:?}",
                    io.conn.raw(),
                    e
                );
                if self.grant_pending.is_none() || kind == CreditGrant::ServerEnabled {
                    self.grant_pending = Some(kind);
                }
            }
        }
    }

    fn write_cccd<S: GattServer>(
        &mut self,
        io: &Io<'_, '_, S>,
        tx: bool,
        data: &[u8],
    ) -> Result<(), AttErrorCode> {
        let &[lo, hi] = data else {
            return Err(AttErrorCode::INVALID_ATTRIBUTE_VALUE_LENGTH);
        };
        let enabled = match u16::from_le_bytes([lo, hi]) {
            CCCD_NOTIFY => true,
            CCCD_DISABLED => false,
            other => {
                warn!("[TRSPS] Unsupported CCCD value {} on {}", other, io.conn.raw());
                return Err(AttErrorCode::APPLICATION_ERROR);
            }
        };
        if tx {
            self.tx_open = enabled;
            io.emit(TransportEvent::TxStatus {
                conn: io.conn,
                enabled,
            });
        } else {
            self.ctrl_open = enabled;
            io.emit(TransportEvent::CtrlStatus {
                conn: io.conn,
                enabled,
            });
        }
        Ok(())
    }

    fn receive<S: GattServer>(
        &mut self,
        io: &Io<'_, '_, S>,
        pool: &mut RxPool,
        kind: WriteKind,
        data: &[u8],
    ) -> Result<(), AttErrorCode> {
        let packet = if self.queue.is_full() {
            None
        } else {
            pool.alloc(data)
        };
        let queued = match packet {
            Some(packet) => self.queue.push(kind, packet).map_err(|rejected| {
                pool.free(rejected.packet);
            }),
            None => Err(()),
        };
        if queued.is_err() {
            warn!(
                "[TRSPS] Dropping {} byte packet on {}, {} queued",
                data.len(),
                io.conn.raw(),
                self.queue.len()
            );
            io.emit(TransportEvent::ErrorNoMemory { conn: io.conn });
            return Err(AttErrorCode::INSUFFICIENT_RESOURCES);
        }
        trace!("[TRSPS] Queued {} bytes on {}", data.len(), io.conn.raw());
        io.emit(TransportEvent::ReceiveData { conn: io.conn });
        Ok(())
    }

    fn control<S: GattServer>(&mut self, io: &mut Io<'_, '_, S>, command: ControlCommand<'_>) {
        match command {
            ControlCommand::ServerEnabled => {
                info!("[TRSPS] Credit based flow control enabled on {}", io.conn.raw());
                self.credits.enable_rx();
                self.grant(io, CreditGrant::ServerEnabled);
                io.emit(TransportEvent::CbfcEnabled { conn: io.conn });
            }
            ControlCommand::GiveCredit(credit) => {
                self.credits.give(credit);
                trace!(
                    "[TRSPS] {} credits on {}, {} available",
                    credit,
                    io.conn.raw(),
                    self.credits.local_credit()
                );
                io.emit(TransportEvent::CbfcCredit {
                    conn: io.conn,
                    credit,
                });
            }
            ControlCommand::Vendor(payload) => match Vec::from_slice(payload) {
                Ok(payload) => io.emit(TransportEvent::VendorCommand {
                    conn: io.conn,
                    payload,
                }),
                Err(()) => warn!("[TRSPS] Vendor command of {} bytes dropped", payload.len()),
            },
            ControlCommand::Reserved(opcode) => {
                debug!("[TRSPS] Ignoring reserved control opcode {}", opcode);
            }
        }
    }

    fn on_write<S: GattServer>(
        &mut self,
        io: &mut Io<'_, '_, S>,
        pool: &mut RxPool,
        attr_handle: u16,
        kind: WriteKind,
        data: &[u8],
    ) {
        if kind == WriteKind::PrepareWrite {
            debug!("[TRSPS] Prepare write on {} not supported", attr_handle);
            self.respond(io, kind, attr_handle, Err(AttErrorCode::REQUEST_NOT_SUPPORTED));
            return;
        }

        let handles = io.handles;
        if attr_handle == handles.tx_cccd || attr_handle == handles.ctrl_cccd {
            let result = self.write_cccd(io, attr_handle == handles.tx_cccd, data);
            self.respond(io, kind, attr_handle, result);
        } else if attr_handle == handles.rx_value {
            let result = self.receive(io, pool, kind, data);
            self.respond(io, kind, attr_handle, result);
        } else if attr_handle == handles.ctrl_value {
            match ControlCommand::parse(data) {
                Ok(command) => {
                    self.respond(io, kind, attr_handle, Ok(()));
                    self.control(io, command);
                }
                Err(error) => {
                    warn!("[TRSPS] Malformed control write on {}", io.conn.raw());
                    self.respond(io, kind, attr_handle, Err(error));
                }
            }
        } else {
            trace!("[TRSPS] Write to {} ignored", attr_handle);
        }
    }

    fn on_tx_buffer_available<S: GattServer>(&mut self, io: &mut Io<'_, '_, S>) {
        if let Some(response) = self.retry {
            if io.stack.send_write_response(io.conn, &response).is_err() {
                return;
            }
            debug!("[TRSPS] Deferred write response sent on {}", io.conn.raw());
            self.retry = None;
        }
        if let Some(kind) = self.grant_pending {
            self.grant(io, kind);
        }
    }
}

/// Transparent UART service engine
///
/// Owns the receive buffers of every link. The stack is passed into each call
/// that may answer the peer.
pub struct TransportEngine<'ch> {
    options: TransportOptions,
    pool: RxPool,
    connections: ConnectionSlots<TrspsConnection, MAX_CONNECTIONS>,
    events: TransportEventSender<'ch>,
}

impl<'ch> TransportEngine<'ch> {
    /// Create an engine with no links
    #[must_use]
    pub fn new(options: TransportOptions, events: TransportEventSender<'ch>) -> Self {
        Self {
            options,
            pool: RxPool::new(),
            connections: ConnectionSlots::new(),
            events,
        }
    }

    /// Release every link and every queued packet
    pub fn shutdown(&mut self) {
        self.connections = ConnectionSlots::new();
        self.pool = RxPool::new();
    }

    /// Engine options
    #[must_use]
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Free receive buffers shared by all links
    #[must_use]
    pub fn available_buffers(&self) -> usize {
        self.pool.available()
    }

    /// Negotiated ATT MTU of a link, as reported in the flow control
    /// acknowledgement
    #[must_use]
    pub fn mtu(&self, conn: ConnHandle) -> Option<u16> {
        self.connections.get(conn).map(|c| c.mtu)
    }

    /// Credit counters of a link
    #[must_use]
    pub fn credits(&self, conn: ConnHandle) -> Option<CreditLedger> {
        self.connections.get(conn).map(|c| c.credits)
    }

    /// Whether the peer enabled TX notifications
    #[must_use]
    pub fn tx_open(&self, conn: ConnHandle) -> Option<bool> {
        self.connections.get(conn).map(|c| c.tx_open)
    }

    /// Whether the peer enabled Control notifications
    #[must_use]
    pub fn ctrl_open(&self, conn: ConnHandle) -> Option<bool> {
        self.connections.get(conn).map(|c| c.ctrl_open)
    }

    /// Whether a write response or credit grant waits for a TX buffer
    #[must_use]
    pub fn has_deferred_work(&self, conn: ConnHandle) -> Option<bool> {
        self.connections.get(conn).map(TrspsConnection::has_deferred_work)
    }

    /// Feed one stack event to the engine
    pub fn handle_event<S: GattServer>(&mut self, stack: &mut S, event: &StackEvent<'_>) {
        match *event {
            StackEvent::Gap(GapEvent::Connected { conn, status, .. }) => {
                if status == 0 {
                    self.on_connected(conn);
                }
            }
            StackEvent::Gap(GapEvent::Disconnected { conn, .. }) => self.on_disconnected(conn),
            StackEvent::Gap(GapEvent::EncryptionChanged { .. }) | StackEvent::GattClient(_) => {}
            StackEvent::GattServer(GattServerEvent::Write {
                conn,
                attr_handle,
                kind,
                data,
            }) => self.on_write(stack, conn, attr_handle, kind, data),
            StackEvent::GattServer(GattServerEvent::Read { conn, attr_handle }) => {
                self.on_read(stack, conn, attr_handle);
            }
            StackEvent::MtuUpdated { conn, mtu } => self.on_mtu_updated(conn, mtu),
            StackEvent::TxBufferAvailable { conn } => self.on_tx_buffer_available(stack, conn),
        }
    }

    /// A link came up
    ///
    /// A repeated connect for a live handle starts it over; whatever the old
    /// state still queued goes back to the pool.
    pub fn on_connected(&mut self, conn: ConnHandle) {
        if let Some(mut stale) = self.connections.remove(conn) {
            warn!(
                "[TRSPS] {} connected again, dropping {} queued",
                conn.raw(),
                stale.queue.len()
            );
            stale.queue.drain(&mut self.pool);
        }
        match self.connections.insert(conn, TrspsConnection::new()) {
            Ok(slot) => debug!("[TRSPS] {} uses slot {}", conn.raw(), slot),
            Err(_) => error!("[TRSPS] No free transport slot for {}", conn.raw()),
        }
    }

    /// A link went down; queued packets and deferred work are dropped
    pub fn on_disconnected(&mut self, conn: ConnHandle) {
        if let Some(mut connection) = self.connections.remove(conn) {
            debug!(
                "[TRSPS] Releasing {}: {} queued, response pending {}",
                conn.raw(),
                connection.queue.len(),
                connection.retry.is_some()
            );
            connection.queue.drain(&mut self.pool);
        }
    }

    /// The ATT MTU of a link changed
    pub fn on_mtu_updated(&mut self, conn: ConnHandle, mtu: u16) {
        if let Some(connection) = self.connections.get_mut(conn) {
            connection.mtu = mtu.max(ATT_DEFAULT_MTU);
            debug!("[TRSPS] MTU of {} is {}", conn.raw(), connection.mtu);
        }
    }

    /// The peer wrote one of the service's attributes
    ///
    /// A write needing a response on a link without transport state is
    /// refused with `INSUFFICIENT_RESOURCES`. That response is sent once and
    /// never retried, as there is no retry slot to park it in.
    pub fn on_write<S: GattServer>(
        &mut self,
        stack: &mut S,
        conn: ConnHandle,
        attr_handle: u16,
        kind: WriteKind,
        data: &[u8],
    ) {
        let handles = self.options.handles;
        if !handles.contains(attr_handle) {
            return;
        }
        let mut io = Io {
            stack,
            conn,
            handles,
            events: &self.events,
        };
        let Some(connection) = self.connections.get_mut(conn) else {
            error!("[TRSPS] Write on unknown link {}", conn.raw());
            if kind.needs_response() {
                let response = WriteResponse::Reject {
                    request_opcode: kind.opcode(),
                    attr_handle,
                    error: AttErrorCode::INSUFFICIENT_RESOURCES,
                };
                if let Err(e) = io.stack.send_write_response(conn, &response) {
                    warn!("[TRSPS] Write response on {} lost: {:?}", conn.raw(), e);
                }
            }
            io.emit(TransportEvent::ErrorUnspecified { conn });
            return;
        };
        connection.on_write(&mut io, &mut self.pool, attr_handle, kind, data);
    }

    /// The peer reads a CCCD of the service
    pub fn on_read<S: GattServer>(&mut self, stack: &mut S, conn: ConnHandle, attr_handle: u16) {
        let handles = self.options.handles;
        let tx = attr_handle == handles.tx_cccd;
        if !tx && attr_handle != handles.ctrl_cccd {
            return;
        }
        let enabled = match self.connections.get(conn) {
            Some(connection) if tx => connection.tx_open,
            Some(connection) => connection.ctrl_open,
            None => {
                error!("[TRSPS] Read on unknown link {}", conn.raw());
                emit(&self.events, TransportEvent::ErrorUnspecified { conn });
                false
            }
        };
        let value = if enabled { CCCD_NOTIFY } else { CCCD_DISABLED };
        if let Err(e) = stack.send_read_response(conn, &value.to_le_bytes()) {
            warn!("[TRSPS] Read response on {} failed: {:?}", conn.raw(), e);
        }
    }

    /// A TX buffer was released: flush the deferred response, then the
    /// deferred credit grant
    pub fn on_tx_buffer_available<S: GattServer>(&mut self, stack: &mut S, conn: ConnHandle) {
        let Some(connection) = self.connections.get_mut(conn) else {
            return;
        };
        let mut io = Io {
            stack,
            conn,
            handles: self.options.handles,
            events: &self.events,
        };
        connection.on_tx_buffer_available(&mut io);
    }

    /// Notify `data` on the TX characteristic
    ///
    /// # Errors
    /// * `InvalidParameter` for an unknown link or a payload over `MTU - 3`,
    ///   with the MTU capped at `ATT_MAX_MTU`
    /// * `BadState` while the peer has TX notifications off
    /// * `NoResource` without TX credit, or while deferred work is pending
    /// * whatever the stack returns for the notification
    pub fn send_data<S: GattServer>(
        &mut self,
        stack: &mut S,
        conn: ConnHandle,
        data: &[u8],
    ) -> BleResult {
        let tx_value = self.options.handles.tx_value;
        let connection = self
            .connections
            .get_mut(conn)
            .ok_or(BleError::InvalidParameter)?;
        if !connection.tx_open {
            return Err(BleError::BadState);
        }
        if !connection.credits.can_send() || connection.has_deferred_work() {
            return Err(BleError::NoResource);
        }
        if data.len() > connection.max_payload() {
            return Err(BleError::InvalidParameter);
        }
        stack.send_notification(conn, tx_value, data)?;
        connection.credits.consume();
        Ok(())
    }

    /// Notify a vendor command on the Control characteristic
    ///
    /// # Errors
    /// * `InvalidParameter` for an unknown link, a reserved `id` or a payload
    ///   over `MTU - 4`, with the MTU capped at `ATT_MAX_MTU`
    /// * `BadState` while the peer has Control notifications off
    /// * whatever the stack returns for the notification
    pub fn send_vendor_command<S: GattServer>(
        &mut self,
        stack: &mut S,
        conn: ConnHandle,
        id: u8,
        payload: &[u8],
    ) -> BleResult {
        let ctrl_value = self.options.handles.ctrl_value;
        let connection = self
            .connections
            .get(conn)
            .ok_or(BleError::InvalidParameter)?;
        if id < CTRL_OP_VENDOR_MIN {
            return Err(BleError::InvalidParameter);
        }
        if !connection.ctrl_open {
            return Err(BleError::BadState);
        }
        if payload.len() + 1 > connection.max_payload() {
            return Err(BleError::InvalidParameter);
        }
        let mut value: Vec<u8, MAX_PAYLOAD_SIZE> = Vec::new();
        value.push(id).map_err(|_| BleError::InvalidParameter)?;
        value
            .extend_from_slice(payload)
            .map_err(|()| BleError::InvalidParameter)?;
        stack.send_notification(conn, ctrl_value, &value)
    }

    /// Length of the oldest queued packet, zero when nothing is queued
    ///
    /// # Errors
    /// `InvalidParameter` for an unknown link.
    pub fn queued_len(&self, conn: ConnHandle) -> BleResult<usize> {
        let connection = self
            .connections
            .get(conn)
            .ok_or(BleError::InvalidParameter)?;
        Ok(connection.queue.front().map_or(0, |q| q.packet.len()))
    }

    /// Number of queued packets
    ///
    /// # Errors
    /// `InvalidParameter` for an unknown link.
    pub fn queued_packets(&self, conn: ConnHandle) -> BleResult<usize> {
        self.connections
            .get(conn)
            .map(|c| c.queue.len())
            .ok_or(BleError::InvalidParameter)
    }

    /// Move the oldest queued packet into `buf` and return its length
    ///
    /// Draining write commands earns the peer credit back once flow control is
    /// on; the grant goes out from here when it is due.
    ///
    /// # Errors
    /// * `InvalidParameter` for an unknown link or a `buf` shorter than the packet
    /// * `Fail` when nothing is queued
    pub fn get_data<S: GattServer>(
        &mut self,
        stack: &mut S,
        conn: ConnHandle,
        buf: &mut [u8],
    ) -> BleResult<usize> {
        let connection = self
            .connections
            .get_mut(conn)
            .ok_or(BleError::InvalidParameter)?;
        let len = connection.queue.front().ok_or(BleError::Fail)?.packet.len();
        if buf.len() < len {
            return Err(BleError::InvalidParameter);
        }
        let queued = connection.queue.pop().ok_or(BleError::Fail)?;
        buf[..len].copy_from_slice(self.pool.get(&queued.packet));
        self.pool.free(queued.packet);

        if connection.credits.on_drained(queued.kind) {
            let mut io = Io {
                stack,
                conn,
                handles: self.options.handles,
                events: &self.events,
            };
            connection.grant(&mut io, CreditGrant::GiveCredit);
        }
        Ok(len)
    }
}
