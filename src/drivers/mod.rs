//! Timer and watchdog drivers used by the firmware main loop.

pub mod hw_timer;
pub mod watchdog;
