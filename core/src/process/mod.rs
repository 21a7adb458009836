//! OS process management
//!
//! Only Unix can spawn: commands are run through `/bin/sh` inside their own
//! process group so termination reaches every descendant.

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;

/// Signal numbers have no portable names elsewhere
#[cfg(not(unix))]
pub fn signal_name(signal: i32) -> String {
    signal.to_string()
}
