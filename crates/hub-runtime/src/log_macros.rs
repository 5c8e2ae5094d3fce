/// Domain-aware logging macros.
///
/// Each macro injects a `domain` field automatically so callers never need to
/// remember the string literal. Domains: `sys` (lifecycle), `conn` (drivers
/// and external endpoints), `pipe` (record flow), `res` (metrics and
/// resources), `conf` (registry and pending changes), `clu` (cluster).
///
/// # Usage
///
/// ```ignore
/// hub_info!(sys, projects = 3, "hub bootstrap complete");
/// hub_warn!(pipe, error = %e, ruleset = %id, "evaluation error");
/// hub_debug!(clu, node = %node_id, "heartbeat observed");
/// ```
///
/// The domain identifier is **not** a string — it is a bare identifier that
/// the macro converts to a `&str` literal.

// ---------------------------------------------------------------------------
// Core macro — dispatches to the matching tracing level macro.
// ---------------------------------------------------------------------------

/// Internal helper. Do not call directly; use `hub_error!` … `hub_trace!`.
#[doc(hidden)]
macro_rules! hub_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

// ---------------------------------------------------------------------------
// Public per-level macros
// ---------------------------------------------------------------------------

/// Log at ERROR level with an automatic `domain` field.
#[allow(unused_macros)]
macro_rules! hub_error {
    ($domain:ident, $($rest:tt)*) => {
        hub_log!(error, $domain, $($rest)*)
    };
}

/// Log at WARN level with an automatic `domain` field.
macro_rules! hub_warn {
    ($domain:ident, $($rest:tt)*) => {
        hub_log!(warn, $domain, $($rest)*)
    };
}

/// Log at INFO level with an automatic `domain` field.
macro_rules! hub_info {
    ($domain:ident, $($rest:tt)*) => {
        hub_log!(info, $domain, $($rest)*)
    };
}

/// Log at DEBUG level with an automatic `domain` field.
macro_rules! hub_debug {
    ($domain:ident, $($rest:tt)*) => {
        hub_log!(debug, $domain, $($rest)*)
    };
}

/// Log at TRACE level with an automatic `domain` field.
#[allow(unused_macros)]
macro_rules! hub_trace {
    ($domain:ident, $($rest:tt)*) => {
        hub_log!(trace, $domain, $($rest)*)
    };
}
