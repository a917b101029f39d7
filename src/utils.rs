//! Small cross-cutting helpers shared by every component.

/// Transforms a `Result` into an `Option`, logging the error if it occurs.
/// Used at points where a failed sub-operation should degrade gracefully
/// rather than abort the control thread.
#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "engine", "{}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "engine", concat!($msg, " {}"), e);
                None
            }
        }
    };
}

/// Transforms a `Result` into an `Option` and logs an error at `warn` level if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms a `Result` into an `Option` and logs an error at `debug` level if it occurs.
/// For paths that are expected to sometimes fail (e.g. probing an optional capability).
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}

/// Logs a list of errors as warnings, without aborting the caller.
#[macro_export]
macro_rules! print_warns {
    ($errors:expr) => {
        $errors.iter().for_each(|e| {
            log::warn!(target: "engine", "{}", e);
        })
    };
}

/// Types that cache a lazily-computed value can implement this to get
/// a uniform "compute once, reuse" accessor.
pub trait TryGetOrInsert<T> {
    /// Returns the inner value if present, otherwise computes it via `f`,
    /// stores it, and returns a reference to the stored value.
    fn try_get_or_insert_with<E>(&mut self, f: impl FnOnce() -> Result<T, E>) -> Result<&mut T, E>;
}

impl<T> TryGetOrInsert<T> for Option<T> {
    fn try_get_or_insert_with<E>(&mut self, f: impl FnOnce() -> Result<T, E>) -> Result<&mut T, E> {
        if self.is_none() {
            *self = Some(f()?);
        }
        Ok(self.as_mut().expect("just inserted"))
    }
}
