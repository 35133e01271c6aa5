// Formatting macros over the Logger `*_args` methods.
//
// The level check runs before the logger expression is evaluated, so a
// scoped logger built inside `log_op!` costs nothing when the level is off.

#[doc(hidden)]
#[macro_export]
macro_rules! __log_at {
    ($level:ident, $method:ident, $logger:expr, $($arg:tt)*) => {{
        if $crate::log::log_enabled!($crate::log::Level::$level) {
            ($logger).$method(format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $crate::__log_at!(Debug, debug_args, $logger, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $crate::__log_at!(Info, info_args, $logger, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {
        $crate::__log_at!(Warn, warn_args, $logger, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {
        $crate::__log_at!(Error, error_args, $logger, $($arg)*)
    };
}

/// Log once under an owner and operation scope without keeping the scoped logger.
///
/// ```ignore
/// log_op!(logger, owner.as_str(), "delete"; warn, "identity {} kept", id);
/// ```
#[macro_export]
macro_rules! log_op {
    ($logger:expr, $owner:expr, $op:expr; debug, $($arg:tt)*) => {
        $crate::__log_at!(Debug, debug_args, ($logger).with_owner($owner).with_operation($op), $($arg)*)
    };
    ($logger:expr, $owner:expr, $op:expr; info, $($arg:tt)*) => {
        $crate::__log_at!(Info, info_args, ($logger).with_owner($owner).with_operation($op), $($arg)*)
    };
    ($logger:expr, $owner:expr, $op:expr; warn, $($arg:tt)*) => {
        $crate::__log_at!(Warn, warn_args, ($logger).with_owner($owner).with_operation($op), $($arg)*)
    };
    ($logger:expr, $owner:expr, $op:expr; error, $($arg:tt)*) => {
        $crate::__log_at!(Error, error_args, ($logger).with_owner($owner).with_operation($op), $($arg)*)
    };
}
