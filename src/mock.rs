//! Recording BLE stack used by the engine tests

use bt_hci::param::ConnHandle;
use heapless::{Deque, Vec};

use crate::{
    BleResult,
    stack::{GattClient, GattServer, WriteResponse},
    uuid::Uuid,
};

pub(crate) const MAX_CALLS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    ServiceByUuid {
        conn: ConnHandle,
        start: u16,
        end: u16,
        uuid: Uuid,
    },
    AllCharacteristics {
        conn: ConnHandle,
        start: u16,
        end: u16,
    },
    AllDescriptors {
        conn: ConnHandle,
        start: u16,
        end: u16,
    },
    Notification {
        conn: ConnHandle,
        attr_handle: u16,
        value: Vec<u8, 256>,
    },
    WriteResponse {
        conn: ConnHandle,
        response: WriteResponse,
    },
    ReadResponse {
        conn: ConnHandle,
        value: Vec<u8, 16>,
    },
}

/// Every call is recorded, successful or not. Results are taken from the
/// script in order; an empty script answers `Ok`.
#[derive(Debug, Default)]
pub(crate) struct MockStack {
    calls: Vec<Call, MAX_CALLS>,
    script: Deque<BleResult, 16>,
}

impl MockStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next call
    pub(crate) fn script(&mut self, result: BleResult) {
        self.script.push_back(result).unwrap();
    }

    /// Take the calls recorded so far
    pub(crate) fn take_calls(&mut self) -> Vec<Call, MAX_CALLS> {
        core::mem::take(&mut self.calls)
    }

    pub(crate) fn calls(&self) -> &[Call] {
        &self.calls
    }

    fn record(&mut self, call: Call) -> BleResult {
        self.calls.push(call).unwrap();
        self.script.pop_front().unwrap_or(Ok(()))
    }
}

impl GattClient for MockStack {
    fn discover_primary_service_by_uuid(
        &mut self,
        conn: ConnHandle,
        start: u16,
        end: u16,
        uuid: &Uuid,
    ) -> BleResult {
        self.record(Call::ServiceByUuid {
            conn,
            start,
            end,
            uuid: *uuid,
        })
    }

    fn discover_all_characteristics(
        &mut self,
        conn: ConnHandle,
        start: u16,
        end: u16,
    ) -> BleResult {
        self.record(Call::AllCharacteristics { conn, start, end })
    }

    fn discover_all_descriptors(&mut self, conn: ConnHandle, start: u16, end: u16) -> BleResult {
        self.record(Call::AllDescriptors { conn, start, end })
    }
}

impl GattServer for MockStack {
    fn send_notification(
        &mut self,
        conn: ConnHandle,
        attr_handle: u16,
        value: &[u8],
    ) -> BleResult {
        self.record(Call::Notification {
            conn,
            attr_handle,
            value: Vec::from_slice(value).unwrap(),
        })
    }

    fn send_write_response(&mut self, conn: ConnHandle, response: &WriteResponse) -> BleResult {
        self.record(Call::WriteResponse {
            conn,
            response: *response,
        })
    }

    fn send_read_response(&mut self, conn: ConnHandle, value: &[u8]) -> BleResult {
        self.record(Call::ReadResponse {
            conn,
            value: Vec::from_slice(value).unwrap(),
        })
    }
}
