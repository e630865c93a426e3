//! Logging macros used inside the crate.
//!
//! With the `log` feature off the format arguments are still type-checked,
//! but nothing is evaluated or emitted.
#![allow(unused_macros)]

#[cfg(feature = "log")]
macro_rules! log_event {
    ($level:ident, $($arg:tt)+) => {
        ::log::$level!($($arg)+)
    };
}

#[cfg(not(feature = "log"))]
macro_rules! log_event {
    ($level:ident, $($arg:tt)+) => {{
        if false {
            let _ = ::std::format_args!($($arg)+);
        }
    }};
}

macro_rules! trace { ($($arg:tt)+) => { log_event!(trace, $($arg)+) }; }
macro_rules! debug { ($($arg:tt)+) => { log_event!(debug, $($arg)+) }; }
macro_rules! info { ($($arg:tt)+) => { log_event!(info, $($arg)+) }; }
macro_rules! warn { ($($arg:tt)+) => { log_event!(warn, $($arg)+) }; }
macro_rules! error { ($($arg:tt)+) => { log_event!(error, $($arg)+) }; }
