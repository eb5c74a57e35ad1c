//! Internal prelude for commonly used crate utilities.

pub(crate) use crate::observability::{log_debug as debug, log_warn as warn};
