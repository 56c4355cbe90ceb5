/// A macro similar to `assert!` that returns an error instead of panicking
///
/// This macro is equivalent to `if !$cond { return Err($err); }` and keeps
/// consensus guard clauses on one line throughout the validation paths.
///
/// ```
/// # use ensure_macro::ensure;
/// #[derive(Debug, PartialEq)]
/// enum Error {
///     TooSmall
/// }
///
/// fn check(value: u64) -> Result<(), Error> {
///     ensure!(value >= 10, Error::TooSmall);
///     Ok(())
/// }
///
/// assert_eq!(check(3), Err(Error::TooSmall));
/// assert!(check(30).is_ok());
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}
