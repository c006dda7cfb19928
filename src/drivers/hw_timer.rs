//! Periodic timers that push events into an [`EventQueue`].
//!
//! On ESP-IDF the timer is an `esp_timer` dispatched from the timer task
//! (not ISR), so the callback can push into the lock-free queue. On
//! simulation targets a thread sleeps between pushes.
//!
//! The timer stops when the [`PeriodicTimer`] is dropped.

use crate::events::{Event, EventQueue};

struct TimerCtx {
    queue: &'static EventQueue,
    event: Event,
}

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
unsafe extern "C" fn timer_cb(arg: *mut core::ffi::c_void) {
    // SAFETY: `arg` is the boxed TimerCtx owned by the PeriodicTimer, which
    // deletes the timer before freeing it.
    let ctx = unsafe { &*(arg as *const TimerCtx) };
    ctx.queue.push(ctx.event);
}

/// A running periodic event source.
pub struct PeriodicTimer {
    #[cfg(target_os = "espidf")]
    handle: esp_timer_handle_t,
    #[cfg(target_os = "espidf")]
    ctx: *mut TimerCtx,
    #[cfg(not(target_os = "espidf"))]
    stop: std::sync::Arc<core::sync::atomic::AtomicBool>,
    #[cfg(not(target_os = "espidf"))]
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PeriodicTimer {
    /// Push `event` into `queue` every `interval_ms`.
    #[cfg(target_os = "espidf")]
    pub fn start(
        name: &'static core::ffi::CStr,
        interval_ms: u32,
        queue: &'static EventQueue,
        event: Event,
    ) -> Result<Self, crate::error::Error> {
        let ctx = Box::into_raw(Box::new(TimerCtx { queue, event }));
        let args = esp_timer_create_args_t {
            callback: Some(timer_cb),
            arg: ctx as *mut core::ffi::c_void,
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: name.as_ptr(),
            skip_unhandled_events: true,
        };
        let mut handle: esp_timer_handle_t = core::ptr::null_mut();
        // SAFETY: `args` is fully initialised; `ctx` stays alive until Drop.
        unsafe {
            let ret = esp_timer_create(&args, &mut handle);
            if ret != ESP_OK as esp_err_t {
                drop(Box::from_raw(ctx));
                log::error!("hw_timer: {:?} create failed (rc={})", name, ret);
                return Err(crate::error::Error::Init("timer create failed"));
            }
            let ret = esp_timer_start_periodic(handle, u64::from(interval_ms) * 1000);
            if ret != ESP_OK as esp_err_t {
                esp_timer_delete(handle);
                drop(Box::from_raw(ctx));
                log::error!("hw_timer: {:?} start failed (rc={})", name, ret);
                return Err(crate::error::Error::Init("timer start failed"));
            }
        }
        log::info!("hw_timer: {:?} every {} ms -> {:?}", name, interval_ms, event);
        Ok(Self { handle, ctx })
    }

    /// Push `event` into `queue` every `interval_ms`.
    #[cfg(not(target_os = "espidf"))]
    pub fn start(
        name: &'static core::ffi::CStr,
        interval_ms: u32,
        queue: &'static EventQueue,
        event: Event,
    ) -> Result<Self, crate::error::Error> {
        use core::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let ctx = TimerCtx { queue, event };
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let period = std::time::Duration::from_millis(u64::from(interval_ms));
        let thread = std::thread::Builder::new()
            .name(name.to_string_lossy().into_owned())
            .spawn(move || {
                loop {
                    std::thread::sleep(period);
                    // Dropped during the sleep: no tick after stop.
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    ctx.queue.push(ctx.event);
                }
            })
            .map_err(|_| crate::error::Error::Init("timer thread spawn failed"))?;
        log::info!("hw_timer(sim): {:?} every {} ms -> {:?}", name, interval_ms, event);
        Ok(Self { stop, thread: Some(thread) })
    }
}

impl Drop for PeriodicTimer {
    #[cfg(target_os = "espidf")]
    fn drop(&mut self) {
        // SAFETY: the handle is valid until deleted here; once deleted no
        // callback can observe `ctx`.
        unsafe {
            esp_timer_stop(self.handle);
            esp_timer_delete(self.handle);
            drop(Box::from_raw(self.ctx));
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn drop(&mut self) {
        self.stop.store(true, core::sync::atomic::Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static QUEUE: EventQueue = EventQueue::new();

    #[test]
    fn pushes_periodically_until_dropped() {
        let timer = PeriodicTimer::start(c"poll", 2, &QUEUE, Event::SensorPollTick).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(30));
        drop(timer);
        let mut ticks = 0;
        QUEUE.drain(|e| {
            assert_eq!(e, Event::SensorPollTick);
            ticks += 1;
        });
        assert!(ticks >= 1);
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(QUEUE.pop(), None);
    }

    #[test]
    fn drop_mid_interval_pushes_nothing() {
        static SLOW: EventQueue = EventQueue::new();
        let timer = PeriodicTimer::start(c"slow", 50, &SLOW, Event::WatchdogTick).unwrap();
        drop(timer);
        assert_eq!(SLOW.pop(), None);
    }
}
