//! Deferred wrapping: collect diagnostic facts while an operation runs and
//! attach them once, only if the operation fails.

use super::{wrap, Error, Value};

/// Key/value accumulator owned by a single in-flight operation.
///
/// Built early with [`context`], appended to as facts become known, then
/// consumed exactly once by [`ErrorContext::finish`] (or [`defer`]).
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    data: Vec<Value>,
}

/// Creates an accumulator seeded with alternating keys and values.
#[must_use]
pub fn context(pairs: Vec<Value>) -> ErrorContext {
    ErrorContext { data: pairs }
}

impl ErrorContext {
    /// Appends more pairs. Existing pairs are never removed.
    pub fn add(&mut self, pairs: Vec<Value>) {
        self.data.extend(pairs);
    }

    /// Appends a single key/value pair.
    pub fn push(&mut self, key: &str, value: impl Into<Value>) {
        self.data.push(Value::from(key));
        self.data.push(value.into());
    }

    #[must_use]
    pub fn data(&self) -> &[Value] {
        &self.data
    }

    /// Consumes the accumulator. `Ok` passes through; `Err` is wrapped once
    /// with everything collected so far.
    ///
    /// # Errors
    ///
    /// Returns the operation's error wrapped with the accumulated pairs.
    pub fn finish<T, E: Into<Error>>(self, result: Result<T, E>) -> Result<T, Error> {
        result.map_err(|err| wrap(err, self.data))
    }

    /// Runs `body` and applies [`ErrorContext::finish`] to whatever it
    /// returns, so every early return inside `body` is annotated.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `body`, wrapped with the accumulated pairs.
    pub fn scope<T, E, F>(mut self, body: F) -> Result<T, Error>
    where
        E: Into<Error>,
        F: FnOnce(&mut ErrorContext) -> Result<T, E>,
    {
        let result = body(&mut self);
        self.finish(result)
    }
}

/// Free-function form of [`ErrorContext::finish`].
///
/// # Errors
///
/// Returns the error in `result` wrapped with the pairs in `ctx`.
pub fn defer<T, E: Into<Error>>(result: Result<T, E>, ctx: ErrorContext) -> Result<T, Error> {
    ctx.finish(result)
}
