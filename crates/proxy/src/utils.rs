//! Utility macros used across the crate.

/// Returns early with an error if a condition is not met.
///
/// Like `assert!`, but returns `Err($error)` instead of panicking.
///
/// ```ignore
/// ensure!(low_water_mark < high_water_mark, ConfigError::invalid_water_marks(high_water_mark, low_water_mark));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
