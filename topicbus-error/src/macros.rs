/// Немедленно возвращает ошибку (аналогично `anyhow::bail!`).
///
/// Формы:
/// - `bail!(err)`: готовый тип ошибки, совместимый со `StackError`;
/// - `bail!(code, "msg")`: `GenericError` с кодом и сообщением;
/// - `bail!(code, "fmt {}", arg)`: форматированное сообщение.
///
/// ```ignore
/// use topicbus_error::{bail, StatusCode};
///
/// fn check_name(name: &str) -> topicbus_error::BusResult<()> {
///     if name.is_empty() {
///         bail!(StatusCode::InvalidTopic, "Topic name cannot be empty");
///     }
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($crate::StackError::from($err))
    };
    ($code:expr, $msg:expr) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, $msg)
        ))
    };
    ($code:expr, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, format!($fmt, $($arg)*))
        ))
    };
}

/// Проверяет условие и вызывает `bail!`, если условие ложно.
///
/// ```ignore
/// use topicbus_error::{ensure, StatusCode};
///
/// fn check(capacity: usize) -> topicbus_error::BusResult<()> {
///     ensure!(capacity > 0, StatusCode::InvalidArgs, "capacity must be positive");
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            $crate::bail!($err);
        }
    };
    ($cond:expr, $code:expr, $msg:expr) => {
        if !($cond) {
            $crate::bail!($code, $msg);
        }
    };
    ($cond:expr, $code:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($code, $fmt, $($arg)*);
        }
    };
}

/// Трейт-расширение для `Result`: `.context(...)` и `.with_context(...)`
/// превращают ошибку в [`StackError`](crate::StackError) и приклеивают к ней
/// контекст.
pub trait ResultExt<T> {
    fn context<C>(
        self,
        ctx: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>;

    /// Ленивый контекст (вызывается только в случае ошибки).
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<crate::StackError>,
{
    #[track_caller]
    fn context<C>(
        self,
        ctx: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
    {
        self.map_err(|e| e.into().context(ctx))
    }

    #[track_caller]
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BusResult, GenericError, PatternError, StatusCode};

    #[test]
    fn test_bail_simple() {
        fn example() -> BusResult<()> {
            bail!(PatternError::EmptyPattern);
        }

        let err = example().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidPattern);
    }

    #[test]
    fn test_bail_with_format() {
        fn example(value: i32) -> BusResult<()> {
            bail!(StatusCode::InvalidArgs, "Invalid value: {}", value);
        }

        let err = example(42).unwrap_err();
        assert!(err.to_string().contains("Invalid value: 42"));
    }

    #[test]
    fn test_ensure() {
        fn validate(x: usize) -> BusResult<()> {
            ensure!(x > 0, StatusCode::InvalidArgs, "must be positive");
            ensure!(x < 100, StatusCode::InvalidArgs, "too large: {}", x);
            Ok(())
        }

        assert!(validate(50).is_ok());
        assert!(validate(0).is_err());
        assert!(validate(150).is_err());
    }

    #[test]
    fn test_result_ext() {
        fn inner() -> Result<(), GenericError> {
            Err(GenericError::new(StatusCode::Internal, "inner error"))
        }

        fn outer() -> BusResult<()> {
            inner().context("outer context")?;
            Ok(())
        }

        let err = outer().unwrap_err();
        assert_eq!(err.contexts().len(), 1);
        assert_eq!(err.contexts()[0].message, "outer context");
    }

    #[test]
    fn test_with_context_lazy() {
        fn example(success: bool) -> BusResult<()> {
            let result: Result<(), GenericError> = if success {
                Ok(())
            } else {
                Err(GenericError::new(StatusCode::Internal, "error"))
            };

            result.with_context(|| "expensive context".to_string())?;
            Ok(())
        }

        assert!(example(true).is_ok());
        assert!(example(false).is_err());
    }
}
