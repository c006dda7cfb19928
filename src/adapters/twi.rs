//! Two-wire bus adapters implementing [`TwiPort`].
//!
//! - **`target_os = "espidf"`**: [`EspTwi`], the ESP-IDF I²C master driver
//!   in asynchronous mode. The transaction-done callback runs in interrupt
//!   context and forwards to the driver's [`CompletionHandle`].
//! - **all other targets**: [`SimTwi`], a register-file simulator with fault
//!   injection for host-side tests.

use crate::bus::{CompletionHandle, TwiPort};
use crate::config::BusConfig;

#[cfg(not(target_os = "espidf"))]
use crate::bus::TwiEvent;
#[cfg(not(target_os = "espidf"))]
use log::{debug, info};

// ───────────────────────────────────────────────────────────────
// ESP-IDF adapter
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod esp {
    use super::*;
    use crate::bus::TwiEvent;
    use esp_idf_svc::sys::*;
    use log::{info, trace, warn};

    /// Devices the bus can address concurrently.
    const MAX_DEVICES: usize = 4;
    const PROBE_TIMEOUT_MS: i32 = 20;

    unsafe extern "C" fn on_trans_done(
        _dev: i2c_master_dev_handle_t,
        edata: *const i2c_master_event_data_t,
        user_data: *mut core::ffi::c_void,
    ) -> bool {
        // SAFETY: `user_data` is the boxed CompletionHandle owned by EspTwi,
        // which outlives every registered device; `edata` is valid for the
        // duration of the callback.
        let (handle, event) = unsafe { (&*(user_data as *const CompletionHandle), (*edata).event) };
        #[allow(non_upper_case_globals)]
        let event = match event {
            i2c_master_event_t_I2C_EVENT_DONE => TwiEvent::Done,
            // The controller does not report which byte was refused.
            i2c_master_event_t_I2C_EVENT_NACK => TwiEvent::AddressNack,
            i2c_master_event_t_I2C_EVENT_TIMEOUT => TwiEvent::Timeout,
            _ => TwiEvent::Progress,
        };
        handle.on_event(event);
        false
    }

    /// ESP-IDF I²C master bus in asynchronous mode.
    pub struct EspTwi {
        bus: i2c_master_bus_handle_t,
        devices: heapless::LinearMap<u8, i2c_master_dev_handle_t, MAX_DEVICES>,
        completion: Option<Box<CompletionHandle>>,
        scl_speed_hz: u32,
    }

    // SAFETY: the raw handles are only used from the task that owns the
    // adapter; the driver callback touches nothing but the CompletionHandle.
    unsafe impl Send for EspTwi {}

    impl Default for EspTwi {
        fn default() -> Self {
            Self::new()
        }
    }

    impl EspTwi {
        pub fn new() -> Self {
            Self {
                bus: core::ptr::null_mut(),
                devices: heapless::LinearMap::new(),
                completion: None,
                scl_speed_hz: 100_000,
            }
        }

        fn device(&mut self, address: u8) -> Result<i2c_master_dev_handle_t, i32> {
            if let Some(dev) = self.devices.get(&address) {
                return Ok(*dev);
            }
            let completion = self.completion.as_deref().ok_or(ESP_ERR_INVALID_STATE as i32)?;

            let cfg = i2c_device_config_t {
                dev_addr_length: i2c_addr_bit_len_t_I2C_ADDR_BIT_LEN_7,
                device_address: u16::from(address),
                scl_speed_hz: self.scl_speed_hz,
                ..Default::default()
            };
            let mut dev: i2c_master_dev_handle_t = core::ptr::null_mut();
            // SAFETY: `self.bus` is the handle created in `init`.
            esp!(unsafe { i2c_master_bus_add_device(self.bus, &cfg, &mut dev) }).map_err(|e| e.code())?;

            let callbacks = i2c_master_event_callbacks_t { on_trans_done: Some(on_trans_done) };
            let user_data = completion as *const CompletionHandle as *mut core::ffi::c_void;
            // SAFETY: the boxed handle is not moved or dropped while the
            // device exists.
            esp!(unsafe { i2c_master_register_event_callbacks(dev, &callbacks, user_data) }).map_err(|e| e.code())?;

            self.devices.insert(address, dev).map_err(|_| ESP_ERR_NO_MEM as i32)?;
            info!("twi: device 0x{:02X} attached", address);
            Ok(dev)
        }

        /// Address-only transfer. The master driver has no zero-length
        /// transmit, so this runs the blocking probe and reports the result
        /// through the completion handle itself.
        fn probe(&mut self, address: u8) -> Result<(), i32> {
            let completion = self.completion.as_deref().ok_or(ESP_ERR_INVALID_STATE as i32)?;
            // SAFETY: `self.bus` is the handle created in `init`.
            let rc = unsafe { i2c_master_probe(self.bus, u16::from(address), PROBE_TIMEOUT_MS) };
            let event = match rc as u32 {
                ESP_OK => TwiEvent::Done,
                ESP_ERR_NOT_FOUND => TwiEvent::AddressNack,
                ESP_ERR_TIMEOUT => TwiEvent::Timeout,
                _ => return Err(rc),
            };
            completion.on_event(event);
            Ok(())
        }
    }

    impl TwiPort for EspTwi {
        fn init(&mut self, config: &BusConfig, completion: CompletionHandle) -> Result<(), i32> {
            if let Some(pin) = config.sensor_power_pin {
                // SAFETY: plain GPIO register writes on a pin reserved in pins.rs.
                unsafe {
                    esp!(gpio_set_direction(pin, gpio_mode_t_GPIO_MODE_OUTPUT)).map_err(|e| e.code())?;
                    esp!(gpio_set_level(pin, 1)).map_err(|e| e.code())?;
                }
            }

            let bus_cfg = i2c_master_bus_config_t {
                i2c_port: -1,
                sda_io_num: config.sda_pin,
                scl_io_num: config.scl_pin,
                clk_source: soc_periph_i2c_clk_src_t_I2C_CLK_SRC_DEFAULT,
                glitch_ignore_cnt: 7,
                intr_priority: i32::from(config.interrupt_priority),
                // Non-zero queue depth selects asynchronous transfers.
                trans_queue_depth: 1,
                ..Default::default()
            };
            // SAFETY: `bus_cfg` is fully initialised; `self.bus` receives the handle.
            esp!(unsafe { i2c_new_master_bus(&bus_cfg, &mut self.bus) }).map_err(|e| e.code())?;

            if config.clear_bus_on_init {
                // SAFETY: bus handle just created.
                esp!(unsafe { i2c_master_bus_reset(self.bus) }).map_err(|e| e.code())?;
            }

            self.scl_speed_hz = config.frequency.hz();
            self.completion = Some(Box::new(completion));
            Ok(())
        }

        fn enable(&mut self) {
            // The master driver enables the controller on creation.
            trace!("twi: enabled");
        }

        fn start_tx(&mut self, address: u8, bytes: &[u8], stop: bool) -> Result<(), i32> {
            if !stop {
                // The master driver always terminates a transmit with a stop;
                // the devices on this bus keep their register pointer across it.
                trace!("twi: open-ended write to 0x{:02X} issued with stop", address);
            }
            if bytes.is_empty() {
                return self.probe(address);
            }
            let dev = self.device(address)?;
            // SAFETY: the bus driver waits for completion (or aborts) before
            // `bytes` goes out of scope.
            esp!(unsafe { i2c_master_transmit(dev, bytes.as_ptr(), bytes.len(), -1) }).map_err(|e| e.code())
        }

        fn start_rx(&mut self, address: u8, buf: &mut [u8]) -> Result<(), i32> {
            let dev = self.device(address)?;
            // SAFETY: as for `start_tx`, `buf` outlives the transfer.
            esp!(unsafe { i2c_master_receive(dev, buf.as_mut_ptr(), buf.len(), -1) }).map_err(|e| e.code())
        }

        fn abort(&mut self) {
            // SAFETY: resets the controller; pending transfers are dropped.
            if let Err(e) = esp!(unsafe { i2c_master_bus_reset(self.bus) }) {
                warn!("twi: bus reset failed: {}", e);
            }
        }
    }
}

#[cfg(target_os = "espidf")]
pub use esp::EspTwi;

// ───────────────────────────────────────────────────────────────
// Simulation adapter
// ───────────────────────────────────────────────────────────────

/// One-shot fault applied to the next started transfer.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// Complete the transfer with an address NACK.
    Nack,
    /// Refuse to start, returning this code.
    RejectStart(i32),
    /// Accept the transfer and never complete it.
    Stall,
}

#[cfg(not(target_os = "espidf"))]
struct SimDevice {
    regs: [u8; 256],
    pointer: u8,
}

/// Register-file bus simulator.
///
/// The first byte of every write selects the register pointer, further
/// bytes are stored with auto-increment; reads continue from the pointer.
/// Completions are delivered synchronously through the completion handle,
/// as an interrupt that fires before `start_*` returns.
#[cfg(not(target_os = "espidf"))]
pub struct SimTwi {
    devices: std::collections::BTreeMap<u8, SimDevice>,
    completion: Option<CompletionHandle>,
    fault: Option<SimFault>,
    init_rc: Option<i32>,
    powered_pin: Option<i32>,
    enabled: bool,
    last_stop: bool,
    tx_count: usize,
    rx_count: usize,
    abort_count: usize,
}

#[cfg(not(target_os = "espidf"))]
impl Default for SimTwi {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl SimTwi {
    pub fn new() -> Self {
        Self {
            devices: std::collections::BTreeMap::new(),
            completion: None,
            fault: None,
            init_rc: None,
            powered_pin: None,
            enabled: false,
            last_stop: true,
            tx_count: 0,
            rx_count: 0,
            abort_count: 0,
        }
    }

    /// Put a device with an all-zero register file on the bus.
    pub fn attach(&mut self, address: u8) {
        self.devices.entry(address).or_insert(SimDevice { regs: [0; 256], pointer: 0 });
    }

    /// Preload registers of an attached device starting at `register`.
    pub fn load(&mut self, address: u8, register: u8, data: &[u8]) {
        if let Some(dev) = self.devices.get_mut(&address) {
            let mut reg = register;
            for &b in data {
                dev.regs[usize::from(reg)] = b;
                reg = reg.wrapping_add(1);
            }
        }
    }

    pub fn register(&self, address: u8, register: u8) -> Option<u8> {
        self.devices.get(&address).map(|d| d.regs[usize::from(register)])
    }

    /// Apply `fault` to the next started transfer.
    pub fn inject(&mut self, fault: SimFault) {
        self.fault = Some(fault);
    }

    /// Make `init` fail with `rc`.
    pub fn fail_init(&mut self, rc: i32) {
        self.init_rc = Some(rc);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn powered_pin(&self) -> Option<i32> {
        self.powered_pin
    }

    /// Stop flag of the most recent write.
    pub fn last_stop(&self) -> bool {
        self.last_stop
    }

    pub fn tx_count(&self) -> usize {
        self.tx_count
    }

    pub fn rx_count(&self) -> usize {
        self.rx_count
    }

    pub fn abort_count(&self) -> usize {
        self.abort_count
    }

    /// Consume a pending fault. `Err` = refuse to start, `Ok(Some)` = the
    /// event to complete with instead of the normal one, `Ok(None)` = none.
    fn take_fault(&mut self) -> Result<Option<SimFault>, i32> {
        match self.fault.take() {
            Some(SimFault::RejectStart(rc)) => Err(rc),
            other => Ok(other),
        }
    }

    fn complete(&self, event: TwiEvent) {
        if let Some(handle) = &self.completion {
            handle.on_event(event);
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl TwiPort for SimTwi {
    fn init(&mut self, config: &BusConfig, completion: CompletionHandle) -> Result<(), i32> {
        if let Some(rc) = self.init_rc {
            return Err(rc);
        }
        self.powered_pin = config.sensor_power_pin;
        self.completion = Some(completion);
        info!("twi(sim): {} device(s) on the bus", self.devices.len());
        Ok(())
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn start_tx(&mut self, address: u8, bytes: &[u8], stop: bool) -> Result<(), i32> {
        let fault = self.take_fault()?;
        self.tx_count += 1;
        self.last_stop = stop;

        let event = match (fault, self.devices.get_mut(&address)) {
            (Some(SimFault::Stall), _) => return Ok(()),
            (Some(_), _) | (None, None) => TwiEvent::AddressNack,
            (None, Some(dev)) => {
                if let Some((&reg, data)) = bytes.split_first() {
                    dev.pointer = reg;
                    for &b in data {
                        dev.regs[usize::from(dev.pointer)] = b;
                        dev.pointer = dev.pointer.wrapping_add(1);
                    }
                }
                TwiEvent::Done
            }
        };
        debug!("twi(sim): tx 0x{:02X} {:02X?} -> {:?}", address, bytes, event);
        self.complete(event);
        Ok(())
    }

    fn start_rx(&mut self, address: u8, buf: &mut [u8]) -> Result<(), i32> {
        let fault = self.take_fault()?;
        self.rx_count += 1;

        let event = match (fault, self.devices.get_mut(&address)) {
            (Some(SimFault::Stall), _) => return Ok(()),
            (Some(_), _) | (None, None) => TwiEvent::AddressNack,
            (None, Some(dev)) => {
                for slot in buf.iter_mut() {
                    *slot = dev.regs[usize::from(dev.pointer)];
                    dev.pointer = dev.pointer.wrapping_add(1);
                }
                TwiEvent::Done
            }
        };
        self.complete(event);
        Ok(())
    }

    fn abort(&mut self) {
        self.abort_count += 1;
    }
}
