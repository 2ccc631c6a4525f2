//! Component logging.
//!
//! Lines look like `[12.500 INFO  node3] message`: simulation time, level, component name.

use atty::Stream;
use colored::{Color, ColoredString, Colorize};
use log::error;
use serde_json::json;
use serde_type_name::type_name;

use crate::event::Event;

/// Colors the label only when stderr is a terminal.
pub fn get_colored(s: &str, color: Color) -> ColoredString {
    if atty::is(Stream::Stderr) {
        s.color(color)
    } else {
        s.normal()
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_event {
    ($level:ident, $label:expr, $color:ident, $ctx:expr, $format:literal $($arg:tt)*) => {
        $crate::__log::log!(
            target: $ctx.name(),
            $crate::__log::Level::$level,
            concat!("[{:.3} {} {}] ", $format),
            $ctx.time(),
            $crate::log::get_colored($label, $crate::colored::Color::$color),
            $ctx.name()
            $($arg)*
        )
    };
}

/// Logs at info level on behalf of the component owning `ctx`.
///
/// # Examples
///
/// ```rust
/// use vmrepair_core::{log_info, Simulation};
///
/// let mut sim = Simulation::new(123);
/// let ctx = sim.create_context("node0");
/// log_info!(ctx, "started with {} peers", 4);
/// log_info!(ctx, String::from("ready"));
/// ```
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $format:literal $($arg:tt)*) => ($crate::__log_event!(Info, "INFO ", Green, $ctx, $format $($arg)*));
    ($ctx:expr, $msg:expr) => ($crate::__log_event!(Info, "INFO ", Green, $ctx, "{}", $msg));
}

#[macro_export]
macro_rules! log_debug {
    ($ctx:expr, $format:literal $($arg:tt)*) => ($crate::__log_event!(Debug, "DEBUG", Blue, $ctx, $format $($arg)*));
    ($ctx:expr, $msg:expr) => ($crate::__log_event!(Debug, "DEBUG", Blue, $ctx, "{}", $msg));
}

#[macro_export]
macro_rules! log_trace {
    ($ctx:expr, $format:literal $($arg:tt)*) => ($crate::__log_event!(Trace, "TRACE", Cyan, $ctx, $format $($arg)*));
    ($ctx:expr, $msg:expr) => ($crate::__log_event!(Trace, "TRACE", Cyan, $ctx, "{}", $msg));
}

#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $format:literal $($arg:tt)*) => ($crate::__log_event!(Warn, "WARN ", Yellow, $ctx, $format $($arg)*));
    ($ctx:expr, $msg:expr) => ($crate::__log_event!(Warn, "WARN ", Yellow, $ctx, "{}", $msg));
}

#[macro_export]
macro_rules! log_error {
    ($ctx:expr, $format:literal $($arg:tt)*) => ($crate::__log_event!(Error, "ERROR", Red, $ctx, $format $($arg)*));
    ($ctx:expr, $msg:expr) => ($crate::__log_event!(Error, "ERROR", Red, $ctx, "{}", $msg));
}

fn report(kind: &str, event: &Event) {
    error!(
        target: "simulation",
        "[{:.3} {} simulation] {}: {}",
        event.time,
        get_colored("ERROR", Color::Red),
        kind,
        json!({
            "type": type_name(&event.data).unwrap_or("unknown"),
            "data": event.data,
            "src": event.src,
            "dst": event.dst,
        })
    );
}

/// Reports an event whose payload matched no arm of [`cast!`](crate::cast!).
pub fn log_unhandled_event(event: Event) {
    report("Unhandled event", &event);
}

pub(crate) fn log_undelivered_event(event: Event) {
    report("Undelivered event", &event);
}

pub(crate) fn log_incorrect_event(event: Event, msg: &str) {
    report(&format!("Incorrect event ({})", msg), &event);
}
