//! Wireless-stack adapters implementing [`GattStack`].
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: [`BluedroidStack`], the Bluedroid GATT
//!   server via `esp_idf_svc::sys`.
//! - **all other targets**: [`SimStack`], a recording attribute table with
//!   fault injection for host-side tests.
//!
//! Bluedroid reports connections and writes on its own task. The GATTS
//! callback copies each one into an [`OwnedStackEvent`], queues it, and
//! wakes the main loop; the main loop borrows it back as a
//! [`StackEvent`] for dispatch.

use crate::gatt::stack::{AttrHandle, ConnHandle, StackEvent, WriteEvent};

/// Longest attribute write kept from a stack event.
pub const MAX_WRITE_LEN: usize = 20;

/// Stack events queued between the stack task and the main loop.
pub const STACK_EVENT_DEPTH: usize = 16;

// ───────────────────────────────────────────────────────────────
// Owned events
// ───────────────────────────────────────────────────────────────

/// A stack event detached from the stack's callback buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedStackEvent {
    Connected { conn: ConnHandle },
    Disconnected { conn: ConnHandle, reason: u8 },
    Write {
        conn: ConnHandle,
        handle: AttrHandle,
        offset: u16,
        data: heapless::Vec<u8, MAX_WRITE_LEN>,
    },
    HvnTxComplete { conn: ConnHandle },
    Other { id: u16 },
}

impl OwnedStackEvent {
    /// Copy a write out of the callback buffer. Payloads longer than
    /// [`MAX_WRITE_LEN`] cannot belong to any attribute here and are
    /// refused.
    pub fn write(conn: ConnHandle, handle: AttrHandle, offset: u16, data: &[u8]) -> Option<Self> {
        let data = heapless::Vec::from_slice(data).ok()?;
        Some(Self::Write { conn, handle, offset, data })
    }

    /// Borrow as the event type the dispatcher consumes.
    pub fn as_event(&self) -> StackEvent<'_> {
        match self {
            Self::Connected { conn } => StackEvent::Connected { conn: *conn },
            Self::Disconnected { conn, reason } => StackEvent::Disconnected { conn: *conn, reason: *reason },
            Self::Write { conn, handle, offset, data } => StackEvent::Write(WriteEvent {
                conn: *conn,
                handle: *handle,
                offset: *offset,
                data: data.as_slice(),
            }),
            Self::HvnTxComplete { conn } => StackEvent::HvnTxComplete { conn: *conn, count: 1 },
            Self::Other { id } => StackEvent::Other { id: *id },
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Stack bring-up
// ───────────────────────────────────────────────────────────────

/// One named bring-up call returning a platform error code (0 = OK).
type BringUpStep<'a> = (&'static str, &'a mut dyn FnMut() -> i32);

/// Run bring-up calls in order. The first non-zero return code ends the
/// sequence and is returned with the step name; later calls are not made.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
fn bring_up(steps: &mut [BringUpStep<'_>]) -> Result<(), (&'static str, i32)> {
    for (name, call) in steps.iter_mut() {
        let rc = (*call)();
        if rc != 0 {
            return Err((*name, rc));
        }
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF adapter
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod bluedroid {
    use core::sync::atomic::{AtomicU8, AtomicU16, Ordering};
    use core::time::Duration;
    use std::sync::{Condvar, Mutex};

    use esp_idf_svc::sys::*;
    use log::{debug, error, info, warn};

    use super::{BringUpStep, OwnedStackEvent, STACK_EVENT_DEPTH, bring_up};
    use crate::error::Error;
    use crate::events::{EVENTS, Event};
    use crate::gatt::stack::{
        AttrHandle, BleUuid, CharHandles, CharacteristicSpec, ConnHandle, GattStack, HvxKind, HvxParams,
        SecurityMode, StackError, Uuid128, UuidType,
    };

    /// Attribute handles reserved per service (declaration, two
    /// characteristics with values and one CCCD, with room to spare).
    const SERVICE_HANDLES: u16 = 8;
    const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(1);
    const CCCD_UUID: u16 = 0x2902;
    const APP_ID: u16 = 0;

    // ── Callback bridge ───────────────────────────────────────
    //
    // Bluedroid callbacks are C function pointers that cannot capture Rust
    // closures. Registration replies go through a mutex + condvar, runtime
    // events through a bounded queue.

    #[derive(Debug, Clone, Copy)]
    enum Reply {
        AppRegistered { status: u32 },
        ServiceCreated { status: u32, handle: u16 },
        CharAdded { status: u32, handle: u16 },
        DescrAdded { status: u32, handle: u16 },
    }

    static REPLY: Mutex<Option<Reply>> = Mutex::new(None);
    static REPLY_READY: Condvar = Condvar::new();
    static STACK_EVENTS: Mutex<heapless::Deque<OwnedStackEvent, STACK_EVENT_DEPTH>> =
        Mutex::new(heapless::Deque::new());
    static GATTS_IF: AtomicU8 = AtomicU8::new(ESP_GATT_IF_NONE as u8);
    static DROPPED_EVENTS: AtomicU16 = AtomicU16::new(0);

    fn post_reply(reply: Reply) {
        if let Ok(mut slot) = REPLY.lock() {
            *slot = Some(reply);
            REPLY_READY.notify_one();
        }
    }

    fn wait_reply() -> Result<Reply, StackError> {
        let slot = REPLY.lock().map_err(|_| StackError::Other(ESP_FAIL))?;
        let (mut slot, timeout) = REPLY_READY
            .wait_timeout_while(slot, REGISTRATION_TIMEOUT, |r| r.is_none())
            .map_err(|_| StackError::Other(ESP_FAIL))?;
        if timeout.timed_out() {
            warn!("ble: no registration reply within {:?}", REGISTRATION_TIMEOUT);
            return Err(StackError::Busy);
        }
        slot.take().ok_or(StackError::InvalidState)
    }

    fn clear_reply() {
        if let Ok(mut slot) = REPLY.lock() {
            *slot = None;
        }
    }

    fn queue_event(event: OwnedStackEvent) {
        let queued = STACK_EVENTS.lock().map(|mut q| q.push_back(event).is_ok()).unwrap_or(false);
        if queued {
            EVENTS.push(Event::StackEvent);
        } else {
            DROPPED_EVENTS.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn map_err(rc: esp_err_t) -> StackError {
        match rc as u32 {
            ESP_ERR_NO_MEM => StackError::NoMem,
            ESP_ERR_INVALID_ARG => StackError::InvalidParam,
            ESP_ERR_INVALID_STATE => StackError::InvalidState,
            ESP_ERR_INVALID_SIZE => StackError::DataSize,
            ESP_ERR_NOT_FOUND => StackError::NotFound,
            _ => StackError::Other(rc),
        }
    }

    fn check(rc: esp_err_t) -> Result<(), StackError> {
        if rc == ESP_OK as esp_err_t { Ok(()) } else { Err(map_err(rc)) }
    }

    fn check_status(status: u32) -> Result<(), StackError> {
        if status == esp_gatt_status_t_ESP_GATT_OK {
            Ok(())
        } else {
            Err(StackError::Other(status as i32))
        }
    }

    fn adv_params() -> esp_ble_adv_params_t {
        esp_ble_adv_params_t {
            adv_int_min: 0x20,
            adv_int_max: 0x40,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            ..Default::default()
        }
    }

    unsafe extern "C" fn gap_event_handler(event: esp_gap_ble_cb_event_t, _param: *mut esp_ble_gap_cb_param_t) {
        #[allow(non_upper_case_globals)]
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => debug!("ble: advertising"),
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => debug!("ble: advertising stopped"),
            _ => {}
        }
    }

    unsafe extern "C" fn gatts_event_handler(
        event: esp_gatts_cb_event_t,
        gatts_if: esp_gatt_if_t,
        param: *mut esp_ble_gatts_cb_param_t,
    ) {
        // SAFETY: Bluedroid passes a parameter block valid for this call,
        // and the union member read matches `event`.
        let p = unsafe { &*param };
        #[allow(non_upper_case_globals)]
        match event {
            esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
                GATTS_IF.store(gatts_if, Ordering::Release);
                post_reply(Reply::AppRegistered { status: unsafe { p.reg.status } });
            }
            esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
                let c = unsafe { p.create };
                post_reply(Reply::ServiceCreated { status: c.status, handle: c.service_handle });
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
                let c = unsafe { p.add_char };
                post_reply(Reply::CharAdded { status: c.status, handle: c.attr_handle });
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
                let c = unsafe { p.add_char_descr };
                post_reply(Reply::DescrAdded { status: c.status, handle: c.attr_handle });
            }
            esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                let conn = ConnHandle::new(unsafe { p.connect.conn_id });
                queue_event(OwnedStackEvent::Connected { conn });
            }
            esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
                let d = unsafe { p.disconnect };
                queue_event(OwnedStackEvent::Disconnected {
                    conn: ConnHandle::new(d.conn_id),
                    reason: d.reason as u8,
                });
                let mut params = adv_params();
                // SAFETY: params outlives the call.
                unsafe { esp_ble_gap_start_advertising(&mut params) };
            }
            esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
                let w = unsafe { p.write };
                // SAFETY: `value` points at `len` bytes owned by Bluedroid
                // for the duration of the callback.
                let data = unsafe { core::slice::from_raw_parts(w.value, usize::from(w.len)) };
                match OwnedStackEvent::write(ConnHandle::new(w.conn_id), w.handle, w.offset, data) {
                    Some(ev) => queue_event(ev),
                    None => warn!("ble: {}-byte write to 0x{:04X} dropped", w.len, w.handle),
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_CONF_EVT => {
                queue_event(OwnedStackEvent::HvnTxComplete { conn: ConnHandle::new(unsafe { p.conf.conn_id }) });
            }
            other => debug!("ble: gatts event {} ignored", other),
        }
    }

    fn uuid128(bytes: [u8; 16]) -> esp_bt_uuid_t {
        let mut uuid = esp_bt_uuid_t { len: ESP_UUID_LEN_128 as u16, ..Default::default() };
        uuid.uuid.uuid128 = bytes;
        uuid
    }

    fn uuid16(short: u16) -> esp_bt_uuid_t {
        let mut uuid = esp_bt_uuid_t { len: ESP_UUID_LEN_16 as u16, ..Default::default() };
        uuid.uuid.uuid16 = short;
        uuid
    }

    fn read_perm(mode: SecurityMode) -> u32 {
        match mode {
            SecurityMode::NoAccess => 0,
            SecurityMode::Open => ESP_GATT_PERM_READ,
            SecurityMode::EncryptedNoMitm => ESP_GATT_PERM_READ_ENCRYPTED,
            SecurityMode::EncryptedMitm => ESP_GATT_PERM_READ_ENC_MITM,
        }
    }

    fn write_perm(mode: SecurityMode) -> u32 {
        match mode {
            SecurityMode::NoAccess => 0,
            SecurityMode::Open => ESP_GATT_PERM_WRITE,
            SecurityMode::EncryptedNoMitm => ESP_GATT_PERM_WRITE_ENCRYPTED,
            SecurityMode::EncryptedMitm => ESP_GATT_PERM_WRITE_ENC_MITM,
        }
    }

    /// Bluedroid GATT server.
    pub struct BluedroidStack {
        gatts_if: esp_gatt_if_t,
        bases: heapless::Vec<Uuid128, 4>,
    }

    impl BluedroidStack {
        /// Bring up the controller and Bluedroid and register the GATT
        /// application. Services are added afterwards through [`GattStack`].
        pub fn start(device_name: &str) -> Result<Self, Error> {
            // SAFETY: one-time stack bring-up from the main task.
            unsafe {
                esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);
                let mut bt_cfg = esp_bt_controller_config_t::default();
                let mut steps: [BringUpStep<'_>; 4] = [
                    ("controller init", &mut || esp_bt_controller_init(&mut bt_cfg)),
                    ("controller enable", &mut || esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE)),
                    ("bluedroid init", &mut || esp_bluedroid_init()),
                    ("bluedroid enable", &mut || esp_bluedroid_enable()),
                ];
                if let Err((step, rc)) = bring_up(&mut steps) {
                    error!("ble: {} failed ({})", step, rc);
                    return Err(Error::Init("BLE stack bring-up failed"));
                }

                esp_ble_gap_register_callback(Some(gap_event_handler));
                esp_ble_gatts_register_callback(Some(gatts_event_handler));
                clear_reply();
                if esp_ble_gatts_app_register(APP_ID) != ESP_OK as esp_err_t {
                    return Err(Error::Init("GATT app register failed"));
                }
            }
            match wait_reply() {
                Ok(Reply::AppRegistered { status }) if status == esp_gatt_status_t_ESP_GATT_OK => {}
                other => {
                    error!("ble: GATT app registration failed: {:?}", other);
                    return Err(Error::Init("GATT app register failed"));
                }
            }

            let mut name: heapless::Vec<u8, 32> = heapless::Vec::new();
            name.extend_from_slice(device_name.as_bytes())
                .and_then(|_| name.push(0))
                .map_err(|_| Error::Config("device name too long"))?;
            // SAFETY: `name` is NUL-terminated and outlives the call.
            unsafe { esp_ble_gap_set_device_name(name.as_ptr() as *const _) };

            let gatts_if = GATTS_IF.load(Ordering::Acquire);
            info!("ble: Bluedroid up as '{}' (gatts_if={})", device_name, gatts_if);
            Ok(Self { gatts_if, bases: heapless::Vec::new() })
        }

        /// Start advertising; call once every service is registered.
        pub fn advertise(&mut self) -> Result<(), Error> {
            let mut adv_data = esp_ble_adv_data_t {
                set_scan_rsp: false,
                include_name: true,
                include_txpower: false,
                flag: (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8,
                ..Default::default()
            };
            let mut params = adv_params();
            // SAFETY: both structs outlive the calls.
            unsafe {
                check(esp_ble_gap_config_adv_data(&mut adv_data))
                    .and_then(|_| check(esp_ble_gap_start_advertising(&mut params)))
                    .map_err(|e| {
                        error!("ble: advertising failed: {}", e);
                        Error::Init("BLE advertising failed")
                    })
            }
        }

        /// Next queued stack event, oldest first.
        pub fn next_event(&self) -> Option<OwnedStackEvent> {
            STACK_EVENTS.lock().ok().and_then(|mut q| q.pop_front())
        }

        /// Events lost because the queue was full.
        pub fn dropped_events(&self) -> u16 {
            DROPPED_EVENTS.load(Ordering::Relaxed)
        }

        fn base(&self, uuid_type: UuidType) -> Result<&Uuid128, StackError> {
            self.bases.get(usize::from(uuid_type.0)).ok_or(StackError::NotFound)
        }

        fn full_uuid(&self, uuid: BleUuid) -> Result<esp_bt_uuid_t, StackError> {
            Ok(uuid128(self.base(uuid.uuid_type)?.with_short(uuid.uuid)))
        }
    }

    impl GattStack for BluedroidStack {
        fn uuid_base_add(&mut self, base: &Uuid128) -> Result<UuidType, StackError> {
            if let Some(i) = self.bases.iter().position(|b| b == base) {
                return Ok(UuidType(i as u8));
            }
            self.bases.push(*base).map_err(|_| StackError::NoMem)?;
            Ok(UuidType((self.bases.len() - 1) as u8))
        }

        fn service_add(&mut self, uuid: BleUuid) -> Result<AttrHandle, StackError> {
            let mut id = esp_gatt_srvc_id_t {
                id: esp_gatt_id_t { uuid: self.full_uuid(uuid)?, inst_id: 0 },
                is_primary: true,
            };
            clear_reply();
            // SAFETY: `id` outlives the call.
            check(unsafe { esp_ble_gatts_create_service(self.gatts_if, &mut id, SERVICE_HANDLES) })?;
            let Reply::ServiceCreated { status, handle } = wait_reply()? else {
                return Err(StackError::InvalidState);
            };
            check_status(status)?;
            // SAFETY: handle reported by the create event.
            check(unsafe { esp_ble_gatts_start_service(handle) })?;
            Ok(handle)
        }

        fn characteristic_add(
            &mut self,
            service: AttrHandle,
            spec: &CharacteristicSpec<'_>,
        ) -> Result<CharHandles, StackError> {
            let mut uuid = self.full_uuid(spec.uuid)?;
            let mut props = 0u32;
            if spec.props.read {
                props |= ESP_GATT_CHAR_PROP_BIT_READ;
            }
            if spec.props.write {
                props |= ESP_GATT_CHAR_PROP_BIT_WRITE;
            }
            if spec.props.notify {
                props |= ESP_GATT_CHAR_PROP_BIT_NOTIFY;
            }
            let perm = read_perm(spec.read_perm) | write_perm(spec.write_perm);
            let mut value = esp_attr_value_t {
                attr_max_len: spec.max_len,
                attr_len: spec.initial_value.len() as u16,
                attr_value: spec.initial_value.as_ptr() as *mut u8,
            };
            let mut control = esp_attr_control_t { auto_rsp: ESP_GATT_AUTO_RSP as u8 };

            clear_reply();
            // SAFETY: all pointers are valid for the call; Bluedroid copies
            // the initial value.
            check(unsafe {
                esp_ble_gatts_add_char(service, &mut uuid, perm as _, props as _, &mut value, &mut control)
            })?;
            let Reply::CharAdded { status, handle: value_handle } = wait_reply()? else {
                return Err(StackError::InvalidState);
            };
            check_status(status)?;

            let cccd_handle = match spec.cccd_write_perm {
                Some(mode) => {
                    let mut cccd_uuid = uuid16(CCCD_UUID);
                    let initial = [0u8; 2];
                    let mut cccd_value = esp_attr_value_t {
                        attr_max_len: 2,
                        attr_len: 2,
                        attr_value: initial.as_ptr() as *mut u8,
                    };
                    let perm = ESP_GATT_PERM_READ | write_perm(mode);
                    clear_reply();
                    // SAFETY: as above.
                    check(unsafe {
                        esp_ble_gatts_add_char_descr(service, &mut cccd_uuid, perm as _, &mut cccd_value, &mut control)
                    })?;
                    let Reply::DescrAdded { status, handle } = wait_reply()? else {
                        return Err(StackError::InvalidState);
                    };
                    check_status(status)?;
                    Some(handle)
                }
                None => None,
            };
            Ok(CharHandles { value_handle, cccd_handle })
        }

        fn value_set(&mut self, _conn: ConnHandle, handle: AttrHandle, offset: u16, value: &[u8]) -> Result<(), StackError> {
            if offset != 0 {
                return Err(StackError::InvalidParam);
            }
            let len = u16::try_from(value.len()).map_err(|_| StackError::DataSize)?;
            // SAFETY: Bluedroid copies `value` before returning.
            check(unsafe { esp_ble_gatts_set_attr_value(handle, len, value.as_ptr()) })
        }

        fn notify(&mut self, conn: ConnHandle, params: &HvxParams<'_>) -> Result<(), StackError> {
            if !conn.is_valid() {
                return Err(StackError::InvalidState);
            }
            let len = u16::try_from(params.data.len()).map_err(|_| StackError::DataSize)?;
            let need_confirm = params.kind == HvxKind::Indication;
            // SAFETY: Bluedroid copies the payload into its transmit queue.
            check(unsafe {
                esp_ble_gatts_send_indicate(
                    self.gatts_if,
                    conn.raw(),
                    params.handle,
                    len,
                    params.data.as_ptr() as *mut u8,
                    need_confirm,
                )
            })
        }
    }
}

#[cfg(target_os = "espidf")]
pub use bluedroid::BluedroidStack;

// ───────────────────────────────────────────────────────────────
// Simulation adapter
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub use sim::{SentNotification, SimStack, StackCall};

#[cfg(not(target_os = "espidf"))]
mod sim {
    use std::collections::BTreeMap;

    use log::debug;

    use crate::gatt::stack::{
        AttrHandle, BleUuid, CharHandles, CharacteristicSpec, ConnHandle, GattStack, HvxParams, StackError,
        Uuid128, UuidType,
    };

    /// First vendor-specific UUID type, as on the reference stack.
    const UUID_TYPE_VENDOR_BEGIN: u8 = 2;
    const FIRST_HANDLE: AttrHandle = 0x000C;

    /// One recorded call on the stack port.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum StackCall {
        UuidBaseAdd(Uuid128),
        ServiceAdd(u16),
        CharacteristicAdd {
            service: AttrHandle,
            uuid: u16,
            notify: bool,
            max_len: u16,
        },
        ValueSet {
            conn: ConnHandle,
            handle: AttrHandle,
            len: usize,
        },
        Notify {
            conn: ConnHandle,
            handle: AttrHandle,
        },
    }

    /// A notification the simulated stack accepted for transmission.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentNotification {
        pub conn: ConnHandle,
        pub handle: AttrHandle,
        pub data: Vec<u8>,
    }

    struct Attribute {
        max_len: u16,
        value: Vec<u8>,
    }

    /// Recording in-memory GATT stack.
    #[derive(Default)]
    pub struct SimStack {
        calls: Vec<StackCall>,
        bases: Vec<Uuid128>,
        next_handle: AttrHandle,
        attributes: BTreeMap<AttrHandle, Attribute>,
        notifications: Vec<SentNotification>,
        fail_at: Option<(usize, StackError)>,
        fail_value_set: Option<StackError>,
        fail_notify: Option<StackError>,
    }

    impl SimStack {
        pub fn new() -> Self {
            Self { next_handle: FIRST_HANDLE, ..Default::default() }
        }

        /// Every call made so far, in order.
        pub fn calls(&self) -> &[StackCall] {
            &self.calls
        }

        /// Current stored value of an attribute.
        pub fn stored_value(&self, handle: AttrHandle) -> Option<&[u8]> {
            self.attributes.get(&handle).map(|a| a.value.as_slice())
        }

        pub fn notifications(&self) -> &[SentNotification] {
            &self.notifications
        }

        pub fn notify_count(&self) -> usize {
            self.notifications.len()
        }

        /// Fail the call with zero-based index `index` (counting every call
        /// on the port) with `err`.
        pub fn fail_call(&mut self, index: usize, err: StackError) {
            self.fail_at = Some((index, err));
        }

        pub fn fail_next_value_set(&mut self, err: StackError) {
            self.fail_value_set = Some(err);
        }

        pub fn fail_next_notify(&mut self, err: StackError) {
            self.fail_notify = Some(err);
        }

        fn record(&mut self, call: StackCall) -> Result<(), StackError> {
            let index = self.calls.len();
            self.calls.push(call);
            match self.fail_at {
                Some((at, err)) if at == index => {
                    self.fail_at = None;
                    Err(err)
                }
                _ => Ok(()),
            }
        }

        fn alloc(&mut self) -> AttrHandle {
            let h = self.next_handle;
            self.next_handle += 1;
            h
        }
    }

    impl GattStack for SimStack {
        fn uuid_base_add(&mut self, base: &Uuid128) -> Result<UuidType, StackError> {
            self.record(StackCall::UuidBaseAdd(*base))?;
            let index = match self.bases.iter().position(|b| b == base) {
                Some(i) => i,
                None => {
                    self.bases.push(*base);
                    self.bases.len() - 1
                }
            };
            Ok(UuidType(UUID_TYPE_VENDOR_BEGIN + index as u8))
        }

        fn service_add(&mut self, uuid: BleUuid) -> Result<AttrHandle, StackError> {
            self.record(StackCall::ServiceAdd(uuid.uuid))?;
            let index = usize::from(uuid.uuid_type.0.wrapping_sub(UUID_TYPE_VENDOR_BEGIN));
            if index >= self.bases.len() {
                return Err(StackError::NotFound);
            }
            Ok(self.alloc())
        }

        fn characteristic_add(
            &mut self,
            service: AttrHandle,
            spec: &CharacteristicSpec<'_>,
        ) -> Result<CharHandles, StackError> {
            self.record(StackCall::CharacteristicAdd {
                service,
                uuid: spec.uuid.uuid,
                notify: spec.props.notify,
                max_len: spec.max_len,
            })?;
            if spec.initial_value.len() > usize::from(spec.max_len) {
                return Err(StackError::InvalidParam);
            }
            let _declaration = self.alloc();
            let value_handle = self.alloc();
            self.attributes.insert(
                value_handle,
                Attribute { max_len: spec.max_len, value: spec.initial_value.to_vec() },
            );
            let cccd_handle = spec.cccd_write_perm.map(|_| {
                let h = self.alloc();
                self.attributes.insert(h, Attribute { max_len: 2, value: vec![0, 0] });
                h
            });
            Ok(CharHandles { value_handle, cccd_handle })
        }

        fn value_set(&mut self, conn: ConnHandle, handle: AttrHandle, offset: u16, value: &[u8]) -> Result<(), StackError> {
            self.record(StackCall::ValueSet { conn, handle, len: value.len() })?;
            if let Some(err) = self.fail_value_set.take() {
                return Err(err);
            }
            let attr = self.attributes.get_mut(&handle).ok_or(StackError::NotFound)?;
            let end = usize::from(offset) + value.len();
            if end > usize::from(attr.max_len) {
                return Err(StackError::DataSize);
            }
            attr.value.resize(end.max(attr.value.len()), 0);
            attr.value[usize::from(offset)..end].copy_from_slice(value);
            attr.value.truncate(end);
            Ok(())
        }

        fn notify(&mut self, conn: ConnHandle, params: &HvxParams<'_>) -> Result<(), StackError> {
            self.record(StackCall::Notify { conn, handle: params.handle })?;
            if let Some(err) = self.fail_notify.take() {
                return Err(err);
            }
            if !conn.is_valid() {
                return Err(StackError::InvalidState);
            }
            if !self.attributes.contains_key(&params.handle) {
                return Err(StackError::NotFound);
            }
            debug!("ble(sim): notify 0x{:04X} {:02X?}", params.handle, params.data);
            self.notifications.push(SentNotification {
                conn,
                handle: params.handle,
                data: params.data.to_vec(),
            });
            Ok(())
        }
    }
}
