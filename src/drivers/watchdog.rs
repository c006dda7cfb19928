//! Task Watchdog Timer (TWDT) driver.
//!
//! Resets the device if the main loop stalls for longer than the timeout.
//! The main loop feeds it on every `WatchdogTick`.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use log::info;

/// Main-loop stall that triggers a reset.
pub const WATCHDOG_TIMEOUT_MS: u32 = 5_000;

pub struct Watchdog {
    #[cfg(target_os = "espidf")]
    subscribed: bool,
    feeds: u32,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(WATCHDOG_TIMEOUT_MS)
    }
}

impl Watchdog {
    /// Configure the TWDT and subscribe the calling task.
    pub fn new(timeout_ms: u32) -> Self {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: TWDT configuration from the main task.
            unsafe {
                let cfg = esp_task_wdt_config_t {
                    timeout_ms,
                    idle_core_mask: 0,
                    trigger_panic: true,
                };
                let ret = esp_task_wdt_reconfigure(&cfg);
                if ret != ESP_OK as esp_err_t {
                    log::warn!("watchdog: reconfigure returned {} (may already be configured)", ret);
                }
                let subscribed = esp_task_wdt_add(core::ptr::null_mut()) == ESP_OK as esp_err_t;
                if subscribed {
                    info!("watchdog: subscribed ({} ms, panic on trigger)", timeout_ms);
                } else {
                    log::warn!("watchdog: failed to subscribe");
                }
                Self { subscribed, feeds: 0 }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("watchdog(sim): {} ms, no-op", timeout_ms);
            Self { feeds: 0 }
        }
    }

    pub fn feed(&mut self) {
        self.feeds = self.feeds.wrapping_add(1);
        #[cfg(target_os = "espidf")]
        if self.subscribed {
            // SAFETY: the calling task is subscribed.
            unsafe {
                esp_task_wdt_reset();
            }
        }
    }

    pub fn feeds(&self) -> u32 {
        self.feeds
    }
}
