//! The wireless-stack collaborator, seen through a narrow port.
//!
//! The attribute services never talk to a BLE stack directly. They allocate
//! identifiers, add attributes, store values and request notifications
//! through [`GattStack`], and they consume connection and write activity as
//! [`StackEvent`]s. Adapters in [`crate::adapters::ble`] implement both
//! sides for Bluedroid (target) and for simulation (host).

use core::fmt;

// ───────────────────────────────────────────────────────────────
// Handles and identifiers
// ───────────────────────────────────────────────────────────────

/// Connection handle assigned by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle(u16);

impl ConnHandle {
    /// "No connection" sentinel understood by the stack.
    pub const INVALID: Self = Self(0xFFFF);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

/// Attribute handle. Zero is never a valid handle.
pub type AttrHandle = u16;

/// A vendor-specific 128-bit base identifier, little-endian, with bytes 12
/// and 13 left zero for the 16-bit short identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uuid128(pub [u8; 16]);

impl Uuid128 {
    /// Full 128-bit identifier of `short` within this base.
    pub fn with_short(&self, short: u16) -> [u8; 16] {
        let mut full = self.0;
        full[12..14].copy_from_slice(&short.to_le_bytes());
        full
    }
}

/// Index of a registered base identifier, allocated by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UuidType(pub u8);

/// A 16-bit identifier within a registered base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleUuid {
    pub uuid_type: UuidType,
    pub uuid: u16,
}

// ───────────────────────────────────────────────────────────────
// Attribute metadata
// ───────────────────────────────────────────────────────────────

/// Link security required to access an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    NoAccess,
    Open,
    EncryptedNoMitm,
    EncryptedMitm,
}

/// Characteristic properties advertised in the declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharProps {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

/// Everything the stack needs to add one characteristic.
#[derive(Debug, Clone, Copy)]
pub struct CharacteristicSpec<'a> {
    pub uuid: BleUuid,
    pub props: CharProps,
    pub read_perm: SecurityMode,
    pub write_perm: SecurityMode,
    /// Write permission for the client characteristic configuration
    /// descriptor. `None` = no CCCD.
    pub cccd_write_perm: Option<SecurityMode>,
    pub initial_value: &'a [u8],
    pub max_len: u16,
}

/// Handles allocated for one characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharHandles {
    pub value_handle: AttrHandle,
    /// Subscription-state (CCCD) handle, when the characteristic notifies.
    pub cccd_handle: Option<AttrHandle>,
}

/// Handle-value transmission kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvxKind {
    Notification,
    Indication,
}

/// One handle-value transmission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HvxParams<'a> {
    pub handle: AttrHandle,
    pub kind: HvxKind,
    pub offset: u16,
    pub data: &'a [u8],
}

// ───────────────────────────────────────────────────────────────
// Stack errors
// ───────────────────────────────────────────────────────────────

/// Error codes returned by the stack, passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    NoMem,
    InvalidParam,
    InvalidState,
    /// Value longer than the attribute's maximum length.
    DataSize,
    NotFound,
    Busy,
    /// Transmit queue full.
    Resources,
    /// Any other stack-specific code.
    Other(i32),
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMem => write!(f, "out of attribute memory"),
            Self::InvalidParam => write!(f, "invalid parameter"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::DataSize => write!(f, "invalid data size"),
            Self::NotFound => write!(f, "attribute not found"),
            Self::Busy => write!(f, "stack busy"),
            Self::Resources => write!(f, "out of transmit buffers"),
            Self::Other(code) => write!(f, "stack error {}", code),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Port trait
// ───────────────────────────────────────────────────────────────

/// Attribute-table and notification operations consumed from the stack.
pub trait GattStack {
    /// Register a vendor-specific base identifier.
    fn uuid_base_add(&mut self, base: &Uuid128) -> Result<UuidType, StackError>;

    /// Add a primary service; returns its service handle.
    fn service_add(&mut self, uuid: BleUuid) -> Result<AttrHandle, StackError>;

    /// Add a characteristic to `service`.
    fn characteristic_add(
        &mut self,
        service: AttrHandle,
        spec: &CharacteristicSpec<'_>,
    ) -> Result<CharHandles, StackError>;

    /// Store `value` at `offset` in the attribute's value.
    fn value_set(
        &mut self,
        conn: ConnHandle,
        handle: AttrHandle,
        offset: u16,
        value: &[u8],
    ) -> Result<(), StackError>;

    /// Queue a handle-value notification or indication.
    fn notify(&mut self, conn: ConnHandle, params: &HvxParams<'_>) -> Result<(), StackError>;
}

// ───────────────────────────────────────────────────────────────
// Raw stack events
// ───────────────────────────────────────────────────────────────

/// Event identifiers as delivered by the stack.
pub mod evt_id {
    pub const GAP_CONNECTED: u16 = 0x10;
    pub const GAP_DISCONNECTED: u16 = 0x11;
    pub const GATTS_WRITE: u16 = 0x50;
    pub const GATTS_HVN_TX_COMPLETE: u16 = 0x57;
}

/// Payload of an attribute write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteEvent<'a> {
    pub conn: ConnHandle,
    pub handle: AttrHandle,
    pub offset: u16,
    /// Borrowed from the stack's event buffer; valid for this dispatch only.
    pub data: &'a [u8],
}

/// One event from the stack, tagged by event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent<'a> {
    Connected { conn: ConnHandle },
    Disconnected { conn: ConnHandle, reason: u8 },
    Write(WriteEvent<'a>),
    HvnTxComplete { conn: ConnHandle, count: u8 },
    Other { id: u16 },
}

impl StackEvent<'_> {
    pub fn id(&self) -> u16 {
        match self {
            Self::Connected { .. } => evt_id::GAP_CONNECTED,
            Self::Disconnected { .. } => evt_id::GAP_DISCONNECTED,
            Self::Write(_) => evt_id::GATTS_WRITE,
            Self::HvnTxComplete { .. } => evt_id::GATTS_HVN_TX_COMPLETE,
            Self::Other { id } => *id,
        }
    }
}
