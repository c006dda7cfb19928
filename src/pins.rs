//! GPIO / peripheral pin assignments for the wearable main board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// I²C bus (accelerometer)
// ---------------------------------------------------------------------------

/// I²C data line.
pub const I2C_SDA_GPIO: i32 = 8;
/// I²C clock line.
pub const I2C_SCL_GPIO: i32 = 9;
/// Digital output feeding VDD of the accelerometer. HIGH = powered.
pub const ACCEL_VDD_GPIO: i32 = 7;

/// Interrupt priority for the I²C completion interrupt (low).
pub const I2C_IRQ_PRIORITY: u8 = 3;

