//! Discovery Engine
//!
//! Per-connection sequential state machine driving service, characteristic and
//! descriptor discovery across the [`DiscoveryRegistry`].
//!
//! Exactly one GATT client request is outstanding per connection. A request is
//! only issued from a state that has none in flight: after the previous one
//! resolved, or from a paused state whose resumption trigger fired. Different
//! connections progress independently.

use bt_hci::param::{ConnHandle, LeConnRole};
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, channel::Sender};

use super::{
    DiscoveryError, DiscoveryEvent, DiscoveryOptions,
    registry::{CharacteristicResult, DiscoveryRegistry, ServiceDescriptor},
};
use crate::{
    BleError,
    att::{
        ATT_FIND_BY_TYPE_VALUE_REQ, ATT_FIND_INFORMATION_REQ, ATT_READ_BY_TYPE_REQ, AttErrorCode,
    },
    constants::{ATT_HANDLE_MAX, ATT_HANDLE_MIN, EVENT_QUEUE_DEPTH, MAX_CONNECTIONS},
    slots::ConnectionSlots,
    stack::{
        CharacteristicDeclaration, DescriptorInfo, GapEvent, GattClient, GattClientEvent,
        HandleRange, StackEvent,
    },
};

/// Sending half of the discovery event channel
pub type DiscoveryEventSender<'ch> = Sender<'ch, NoopRawMutex, DiscoveryEvent, EVENT_QUEUE_DEPTH>;

/// GATT client procedure used by discovery
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procedure {
    /// Primary service discovery by UUID
    ServiceByUuid,
    /// Discovery of all characteristics of a service
    AllCharacteristics,
    /// Discovery of all descriptors of a service
    AllDescriptors,
}

impl Procedure {
    /// ATT request opcode the procedure is carried by
    #[must_use]
    pub const fn opcode(self) -> u8 {
        match self {
            Self::ServiceByUuid => ATT_FIND_BY_TYPE_VALUE_REQ,
            Self::AllCharacteristics => ATT_READ_BY_TYPE_REQ,
            Self::AllDescriptors => ATT_FIND_INFORMATION_REQ,
        }
    }

    /// Procedure carried by an ATT request opcode
    #[must_use]
    pub const fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            ATT_FIND_BY_TYPE_VALUE_REQ => Some(Self::ServiceByUuid),
            ATT_READ_BY_TYPE_REQ => Some(Self::AllCharacteristics),
            ATT_FIND_INFORMATION_REQ => Some(Self::AllDescriptors),
            _ => None,
        }
    }
}

/// Discovery progress of one connection
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// Nothing in flight; discovery not started, aborted or deferred
    Idle,
    /// A request for the procedure is outstanding
    Discovering(Procedure),
    /// The peer asked for a secured link before answering the procedure
    PausedSecurity(Procedure),
    /// The stack refused to issue the procedure's request
    PausedBusy(Procedure),
    /// Every registered service has been processed
    Done,
}

/// Scratch state of the service currently being discovered
#[derive(Debug, Clone, Copy, Default)]
struct DiscoveryInstance {
    start_handle: u16,
    end_handle: u16,
    found: bool,
}

/// Outcome of handing a request to the stack
enum Issue {
    /// Sent, or parked until `ProtocolAvailable`
    Pending,
    /// Could not be sent; the current service is given up
    Skipped,
    /// The stack ran out of memory; the pass is abandoned
    Aborted,
}

#[derive(Debug)]
struct DiscConnection {
    role: LeConnRole,
    service_index: usize,
    state: DiscoveryState,
    instance: DiscoveryInstance,
    start_on_encryption: bool,
}

/// Everything a connection needs from the engine while it makes progress
struct Link<'a, 'ch, S> {
    stack: &'a mut S,
    conn: ConnHandle,
    slot: usize,
    registry: &'a mut DiscoveryRegistry,
    events: &'a DiscoveryEventSender<'ch>,
}

impl<S: GattClient> Link<'_, '_, S> {
    fn emit(&self, event: DiscoveryEvent) {
        emit(self.events, event);
    }
}

fn emit(events: &DiscoveryEventSender<'_>, event: DiscoveryEvent) {
    if events.try_send(event).is_err() {
        warn!("[DD] Event queue full, dropping {:?}", event);
    }
}

impl DiscConnection {
    fn new(role: LeConnRole) -> Self {
        Self {
            role,
            service_index: 0,
            state: DiscoveryState::Idle,
            instance: DiscoveryInstance::default(),
            start_on_encryption: false,
        }
    }

    /// Begin a pass over the registry from the first service.
    fn begin<S: GattClient>(&mut self, link: &mut Link<'_, '_, S>) -> Result<(), BleError> {
        self.service_index = 0;
        self.instance = DiscoveryInstance::default();
        self.start_on_encryption = false;
        link.registry.clear_results(link.slot);
        debug!("[DD] Starting discovery on {}", link.conn.raw());

        if link.registry.is_empty() {
            self.complete(link);
            return Ok(());
        }
        match self.issue(link, Procedure::ServiceByUuid) {
            Issue::Pending => Ok(()),
            Issue::Skipped => {
                self.next_service(link);
                Ok(())
            }
            Issue::Aborted => Err(BleError::OutOfMemory),
        }
    }

    fn issue<S: GattClient>(&mut self, link: &mut Link<'_, '_, S>, procedure: Procedure) -> Issue {
        let (start, end) = (self.instance.start_handle, self.instance.end_handle);
        let result = match procedure {
            Procedure::ServiceByUuid => match link.registry.get(self.service_index) {
                Some(service) => link.stack.discover_primary_service_by_uuid(
                    link.conn,
                    ATT_HANDLE_MIN,
                    ATT_HANDLE_MAX,
                    service.uuid(),
                ),
                None => return Issue::Skipped,
            },
            Procedure::AllCharacteristics => {
                link.stack.discover_all_characteristics(link.conn, start, end)
            }
            Procedure::AllDescriptors => link.stack.discover_all_descriptors(link.conn, start, end),
        };

        match result {
            Ok(()) => {
                trace!(
                    "[DD] {:?} issued on {} for service {}",
                    procedure,
                    link.conn.raw(),
                    self.service_index
                );
                self.state = DiscoveryState::Discovering(procedure);
                Issue::Pending
            }
            Err(BleError::Busy) => {
                debug!("[DD] {:?} queued on {}, stack busy", procedure, link.conn.raw());
                self.state = DiscoveryState::PausedBusy(procedure);
                Issue::Pending
            }
            Err(BleError::OutOfMemory) => {
                warn!("[DD] {:?} aborted on {}, out of memory", procedure, link.conn.raw());
                self.state = DiscoveryState::Idle;
                self.instance = DiscoveryInstance::default();
                Issue::Aborted
            }
            Err(e) => {
                warn!(
                    "[DD] {:?} failed on {}: {:?}, skipping service {}",
                    procedure,
                    link.conn.raw(),
                    e,
                    self.service_index
                );
                Issue::Skipped
            }
        }
    }

    /// Issue `procedure`, moving on to the next service if it cannot be sent.
    fn run<S: GattClient>(&mut self, link: &mut Link<'_, '_, S>, procedure: Procedure) {
        if let Issue::Skipped = self.issue(link, procedure) {
            self.next_service(link);
        }
    }

    fn next_service<S: GattClient>(&mut self, link: &mut Link<'_, '_, S>) {
        loop {
            self.service_index += 1;
            if self.service_index >= link.registry.len() {
                self.complete(link);
                return;
            }
            self.instance = DiscoveryInstance::default();
            if !matches!(self.issue(link, Procedure::ServiceByUuid), Issue::Skipped) {
                return;
            }
        }
    }

    fn after_characteristics<S: GattClient>(&mut self, link: &mut Link<'_, '_, S>) {
        let needs_descriptors = link
            .registry
            .get(self.service_index)
            .is_some_and(ServiceDescriptor::needs_descriptor_discovery);
        if needs_descriptors {
            self.run(link, Procedure::AllDescriptors);
        } else {
            self.next_service(link);
        }
    }

    fn complete<S: GattClient>(&mut self, link: &mut Link<'_, '_, S>) {
        info!("[DD] Discovery complete on {}", link.conn.raw());
        self.state = DiscoveryState::Done;
        self.instance = DiscoveryInstance::default();
        link.emit(DiscoveryEvent::DiscoveryComplete { conn: link.conn });
    }

    fn on_services<S: GattClient>(
        &mut self,
        link: &mut Link<'_, '_, S>,
        services: &[HandleRange],
        finished: bool,
    ) {
        for range in services {
            if !self.instance.found {
                debug!(
                    "[DD] Service {} found on {} at {}..{}",
                    self.service_index,
                    link.conn.raw(),
                    range.start,
                    range.end
                );
                self.instance = DiscoveryInstance {
                    start_handle: range.start,
                    end_handle: range.end,
                    found: true,
                };
            }
        }
        if finished {
            if self.instance.found {
                self.run(link, Procedure::AllCharacteristics);
            } else {
                self.next_service(link);
            }
        }
    }

    fn on_characteristics<S: GattClient>(
        &mut self,
        link: &mut Link<'_, '_, S>,
        characteristics: &[CharacteristicDeclaration],
        finished: bool,
    ) {
        if let Some(service) = link.registry.get_mut(self.service_index) {
            for decl in characteristics {
                if service.record_characteristic(link.slot, decl) {
                    trace!("[DD] Characteristic at {} matched", decl.value_handle);
                }
            }
        }
        if finished {
            self.after_characteristics(link);
        }
    }

    fn on_descriptors<S: GattClient>(
        &mut self,
        link: &mut Link<'_, '_, S>,
        descriptors: &[DescriptorInfo],
        finished: bool,
    ) {
        if let Some(service) = link.registry.get_mut(self.service_index) {
            for desc in descriptors {
                if service.record_descriptor(link.slot, desc) {
                    trace!("[DD] Descriptor at {} matched", desc.handle);
                }
            }
        }
        if finished {
            self.next_service(link);
        }
    }

    fn on_error<S: GattClient>(
        &mut self,
        link: &mut Link<'_, '_, S>,
        procedure: Procedure,
        error: AttErrorCode,
    ) {
        if error.is_security_error() {
            info!(
                "[DD] {:?} on {} needs security (error {})",
                procedure,
                link.conn.raw(),
                error.value()
            );
            self.state = DiscoveryState::PausedSecurity(procedure);
            link.emit(DiscoveryEvent::SecurityRequired { conn: link.conn });
            return;
        }

        match procedure {
            Procedure::ServiceByUuid if self.instance.found => {
                self.run(link, Procedure::AllCharacteristics);
            }
            Procedure::ServiceByUuid | Procedure::AllDescriptors => self.next_service(link),
            Procedure::AllCharacteristics => self.after_characteristics(link),
        }
    }
}

/// GATT database discovery engine
///
/// Owns the registry and the discovery state of up to [`MAX_CONNECTIONS`]
/// links. The BLE stack is passed into every call that may issue a request.
pub struct DiscoveryEngine<'ch> {
    options: DiscoveryOptions,
    registry: DiscoveryRegistry,
    connections: ConnectionSlots<DiscConnection, MAX_CONNECTIONS>,
    skip_next_connection: bool,
    events: DiscoveryEventSender<'ch>,
}

impl<'ch> DiscoveryEngine<'ch> {
    /// Create an engine with an empty registry
    #[must_use]
    pub fn new(options: DiscoveryOptions, events: DiscoveryEventSender<'ch>) -> Self {
        Self {
            options,
            registry: DiscoveryRegistry::new(),
            connections: ConnectionSlots::new(),
            skip_next_connection: false,
            events,
        }
    }

    /// Release every connection. The registry is kept.
    pub fn shutdown(&mut self) {
        self.connections = ConnectionSlots::new();
        self.skip_next_connection = false;
    }

    /// Engine options
    #[must_use]
    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Registered services
    #[must_use]
    pub fn registry(&self) -> &DiscoveryRegistry {
        &self.registry
    }

    /// Register a service for discovery and return its index
    ///
    /// Services should be registered before the first connection.
    ///
    /// # Errors
    /// Returns `DiscoveryError::CapacityExceeded` once the registry is full.
    pub fn register(&mut self, service: ServiceDescriptor) -> Result<usize, DiscoveryError> {
        if !self.connections.is_empty() {
            warn!("[DD] Registering a service with live connections");
        }
        self.registry.register(service)
    }

    /// Do not start discovery automatically on the next connection
    pub fn disable_next_connection_discovery(&mut self) {
        self.skip_next_connection = true;
    }

    /// Discovery progress of a connection
    #[must_use]
    pub fn state(&self, conn: ConnHandle) -> Option<DiscoveryState> {
        self.connections.get(conn).map(|c| c.state)
    }

    /// Index of the service being (or last) discovered on a connection
    #[must_use]
    pub fn service_index(&self, conn: ConnHandle) -> Option<usize> {
        self.connections.get(conn).map(|c| c.service_index)
    }

    /// Local role on a connection
    #[must_use]
    pub fn role(&self, conn: ConnHandle) -> Option<LeConnRole> {
        self.connections.get(conn).map(|c| c.role)
    }

    /// Discovery results of registered service `service` on a connection
    #[must_use]
    pub fn characteristics(
        &self,
        conn: ConnHandle,
        service: usize,
    ) -> Option<&[CharacteristicResult]> {
        let slot = self.connections.index_of(conn)?;
        self.registry.get(service).map(|s| s.results(slot))
    }

    fn link<'a, S: GattClient>(
        &'a mut self,
        stack: &'a mut S,
        conn: ConnHandle,
    ) -> Option<(&'a mut DiscConnection, Link<'a, 'ch, S>)> {
        let (slot, connection) = self.connections.get_indexed_mut(conn)?;
        Some((
            connection,
            Link {
                stack,
                conn,
                slot,
                registry: &mut self.registry,
                events: &self.events,
            },
        ))
    }

    /// Feed one stack event to the engine
    pub fn handle_event<S: GattClient>(&mut self, stack: &mut S, event: &StackEvent<'_>) {
        match *event {
            StackEvent::Gap(GapEvent::Connected { conn, role, status }) => {
                if status == 0 {
                    self.on_connected(stack, conn, role);
                } else {
                    debug!("[DD] Connection failed with status {}", status);
                }
            }
            StackEvent::Gap(GapEvent::Disconnected { conn, .. }) => self.on_disconnected(conn),
            StackEvent::Gap(GapEvent::EncryptionChanged { conn, status }) => {
                if status == 0 {
                    self.on_encrypt_success(stack, conn);
                } else {
                    debug!("[DD] Encryption failed on {}: {}", conn.raw(), status);
                }
            }
            StackEvent::GattClient(event) => self.handle_client_event(stack, &event),
            StackEvent::GattServer(_)
            | StackEvent::MtuUpdated { .. }
            | StackEvent::TxBufferAvailable { .. } => {}
        }
    }

    fn handle_client_event<S: GattClient>(&mut self, stack: &mut S, event: &GattClientEvent<'_>) {
        match *event {
            GattClientEvent::ServiceByUuidResponse {
                conn,
                services,
                finished,
            } => self.on_service_by_uuid_response(stack, conn, services, finished),
            GattClientEvent::CharacteristicsResponse {
                conn,
                characteristics,
                finished,
            } => self.on_characteristics_response(stack, conn, characteristics, finished),
            GattClientEvent::DescriptorsResponse {
                conn,
                descriptors,
                finished,
            } => self.on_descriptors_response(stack, conn, descriptors, finished),
            GattClientEvent::ErrorResponse {
                conn,
                request_opcode,
                error,
                ..
            } => self.on_error_response(stack, conn, request_opcode, error),
            GattClientEvent::ProtocolAvailable { conn } => self.on_protocol_available(stack, conn),
            GattClientEvent::Timeout { conn } => self.on_timeout(conn),
        }
    }

    /// A link came up
    pub fn on_connected<S: GattClient>(&mut self, stack: &mut S, conn: ConnHandle, role: LeConnRole) {
        emit(&self.events, DiscoveryEvent::Connected { conn, role });

        match self.connections.insert(conn, DiscConnection::new(role)) {
            // The slot may have served an earlier link; none of its results
            // belong to this one.
            Ok(slot) => self.registry.clear_results(slot),
            Err(_) => {
                error!("[DD] No free discovery slot for {}", conn.raw());
                return;
            }
        }
        if core::mem::take(&mut self.skip_next_connection) {
            info!("[DD] Discovery disabled for {}", conn.raw());
            return;
        }
        if !self.options.starts_in(role) {
            return;
        }
        let wait_for_security = self.options.wait_for_security;
        if let Some((connection, mut link)) = self.link(stack, conn) {
            if wait_for_security {
                debug!("[DD] Discovery on {} waits for security", conn.raw());
                connection.start_on_encryption = true;
            } else if connection.begin(&mut link).is_err() {
                warn!("[DD] Could not start discovery on {}", conn.raw());
            }
        }
    }

    /// A link went down; its state is released whatever it was doing
    pub fn on_disconnected(&mut self, conn: ConnHandle) {
        if let Some(slot) = self.connections.index_of(conn) {
            self.connections.remove(conn);
            self.registry.clear_results(slot);
            debug!("[DD] Released {} from slot {}", conn.raw(), slot);
        }
        emit(&self.events, DiscoveryEvent::Disconnected { conn });
    }

    /// The link is encrypted: replay a security-paused request or start a
    /// deferred discovery
    pub fn on_encrypt_success<S: GattClient>(&mut self, stack: &mut S, conn: ConnHandle) {
        let Some((connection, mut link)) = self.link(stack, conn) else {
            return;
        };
        match connection.state {
            DiscoveryState::PausedSecurity(procedure) => {
                debug!("[DD] Replaying {:?} on {} after encryption", procedure, conn.raw());
                connection.run(&mut link, procedure);
            }
            DiscoveryState::Idle if connection.start_on_encryption => {
                if connection.begin(&mut link).is_err() {
                    warn!("[DD] Could not start discovery on {}", conn.raw());
                }
            }
            _ => {}
        }
    }

    /// The stack can take a request again: replay a busy-paused request
    pub fn on_protocol_available<S: GattClient>(&mut self, stack: &mut S, conn: ConnHandle) {
        let Some((connection, mut link)) = self.link(stack, conn) else {
            return;
        };
        if let DiscoveryState::PausedBusy(procedure) = connection.state {
            debug!("[DD] Replaying {:?} on {}", procedure, conn.raw());
            connection.run(&mut link, procedure);
        }
    }

    /// Results of primary service discovery by UUID
    pub fn on_service_by_uuid_response<S: GattClient>(
        &mut self,
        stack: &mut S,
        conn: ConnHandle,
        services: &[HandleRange],
        finished: bool,
    ) {
        let Some((connection, mut link)) = self.link(stack, conn) else {
            return;
        };
        if connection.state == DiscoveryState::Discovering(Procedure::ServiceByUuid) {
            connection.on_services(&mut link, services, finished);
        }
    }

    /// Results of all-characteristics discovery
    pub fn on_characteristics_response<S: GattClient>(
        &mut self,
        stack: &mut S,
        conn: ConnHandle,
        characteristics: &[CharacteristicDeclaration],
        finished: bool,
    ) {
        let Some((connection, mut link)) = self.link(stack, conn) else {
            return;
        };
        if connection.state == DiscoveryState::Discovering(Procedure::AllCharacteristics) {
            connection.on_characteristics(&mut link, characteristics, finished);
        }
    }

    /// Results of all-descriptors discovery
    pub fn on_descriptors_response<S: GattClient>(
        &mut self,
        stack: &mut S,
        conn: ConnHandle,
        descriptors: &[DescriptorInfo],
        finished: bool,
    ) {
        let Some((connection, mut link)) = self.link(stack, conn) else {
            return;
        };
        if connection.state == DiscoveryState::Discovering(Procedure::AllDescriptors) {
            connection.on_descriptors(&mut link, descriptors, finished);
        }
    }

    /// The peer answered the outstanding discovery request with an error
    pub fn on_error_response<S: GattClient>(
        &mut self,
        stack: &mut S,
        conn: ConnHandle,
        request_opcode: u8,
        error: AttErrorCode,
    ) {
        let Some(procedure) = Procedure::from_opcode(request_opcode) else {
            return;
        };
        let Some((connection, mut link)) = self.link(stack, conn) else {
            return;
        };
        if connection.state == DiscoveryState::Discovering(procedure) {
            connection.on_error(&mut link, procedure, error);
        }
    }

    /// The ATT bearer timed out; the pass is abandoned and the link left
    /// `Idle` until it is restarted or torn down
    pub fn on_timeout(&mut self, conn: ConnHandle) {
        if let Some(connection) = self.connections.get_mut(conn) {
            warn!("[DD] ATT timeout on {}, discovery abandoned", conn.raw());
            connection.state = DiscoveryState::Idle;
            connection.instance = DiscoveryInstance::default();
            connection.start_on_encryption = false;
        }
    }

    /// Start discovery over from the first registered service, for example
    /// after a Service Changed indication
    ///
    /// # Errors
    /// * `DiscoveryError::InvalidHandle` if `conn` is not a live connection
    /// * `DiscoveryError::OutOfResources` if the stack could not allocate the
    ///   first request; the link is left `Idle`
    pub fn restart<S: GattClient>(
        &mut self,
        stack: &mut S,
        conn: ConnHandle,
    ) -> Result<(), DiscoveryError> {
        let (connection, mut link) = self
            .link(stack, conn)
            .ok_or(DiscoveryError::InvalidHandle)?;
        connection.state = DiscoveryState::Idle;
        connection
            .begin(&mut link)
            .map_err(|_| DiscoveryError::OutOfResources)
    }
}
