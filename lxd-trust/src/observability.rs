//! Diagnostics routed to whichever backend is enabled.
//!
//! `tracing` wins over `logging`. With neither feature the macros compile to
//! nothing but still type-check their format arguments.

macro_rules! emit {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        { tracing::$level!($($arg)*); }

        #[cfg(all(not(feature = "tracing"), feature = "logging"))]
        { log::$level!($($arg)*); }

        #[cfg(not(any(feature = "tracing", feature = "logging")))]
        { let _ = format_args!($($arg)*); }
    }};
}

macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::observability::emit!(debug, $($arg)*) };
}

macro_rules! log_info {
    ($($arg:tt)*) => { $crate::observability::emit!(info, $($arg)*) };
}

macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::observability::emit!(warn, $($arg)*) };
}

// Reconciliation failures: a certificate the cluster refused to add or remove.
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::observability::emit!(error, $($arg)*) };
}

pub(crate) use emit;
pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_accept_inline_and_positional_arguments() {
        let fp = "33848a3e";
        log_debug!("checking {fp}");
        log_info!("{} added, {} removed", 1, 0);
        log_warn!("skipping {fp}: {}", "bad PEM");
        log_error!("failed adding certificate {fp}");
    }
}
