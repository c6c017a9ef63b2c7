//! Linked errors carrying key/value diagnostic context.
//!
//! An [`Error`] is a singly linked chain. Each [`Error::Context`] node owns an
//! older inner error plus the diagnostic pairs attached at that layer; an
//! [`Error::Terminal`] node ends the chain. Lower layers attach context and
//! return, the outermost layer classifies with [`Error::find`].
//!
//! ```
//! use corekit_core::{kv, errors::{self, Error, ResultExt}};
//!
//! let cause = Error::msg("connection reset");
//! let wrapped = errors::wrap(cause.clone(), kv!["component", "sender", "attempt", 2]);
//!
//! assert!(wrapped.is(&cause));
//! assert_eq!(wrapped.to_string(), "component=sender attempt=2 error=\"connection reset\"");
//!
//! let ok: Result<u8, Error> = Ok(1);
//! assert_eq!(ok.wrap_err(kv!["ignored", true]).unwrap(), 1);
//! ```

mod context;
mod value;

pub use context::{context, defer, ErrorContext};
pub use value::Value;

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Capability check used by [`Error::find`]: any `'static` error type can be
/// viewed as `Any` for a runtime type comparison.
pub trait Leaf: StdError + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

impl<E: StdError + Send + Sync + 'static> Leaf for E {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A node in an error chain.
///
/// Cloning is cheap and shares the node, so [`Error::is`] keeps matching
/// clones of the same error.
#[derive(Clone)]
pub enum Error {
    /// Wraps an older error with diagnostic context.
    Context(Arc<ContextError>),
    /// End of the chain.
    Terminal(Arc<dyn Leaf>),
}

impl Error {
    /// Creates a terminal node from any standard error.
    pub fn new<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Error::Terminal(Arc::new(err))
    }

    /// Creates a terminal node carrying only a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Error::new(MessageError(message.to_string()))
    }

    /// Hides `self` behind a terminal node that does not expose it to
    /// [`Error::next`]. Chain walks stop at the returned node.
    #[must_use]
    pub fn opaque(self) -> Self {
        Error::new(NotUnwrapError(self))
    }

    /// The inner error of a context node, `None` at the end of the chain.
    #[must_use]
    pub fn next(&self) -> Option<&Error> {
        match self {
            Error::Context(ctx) => Some(&ctx.inner),
            Error::Terminal(_) => None,
        }
    }

    /// Iterates over the chain from the outermost node to the innermost.
    #[must_use]
    pub fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    /// The innermost node of the chain.
    #[must_use]
    pub fn root(&self) -> &Error {
        self.chain().last().unwrap_or(self)
    }

    /// Reports whether `target` is this node or any node reachable by
    /// unwrapping. Nodes compare by identity.
    #[must_use]
    pub fn is(&self, target: &Error) -> bool {
        self.chain().any(|node| node.same_node(target))
    }

    /// Finds the first node in the chain whose runtime type is `T`.
    ///
    /// Terminal nodes are compared by their wrapped error type; context nodes
    /// match `T = ContextError`.
    #[must_use]
    pub fn find<T: Any>(&self) -> Option<&T> {
        self.chain().find_map(|node| match node {
            Error::Context(ctx) => (&**ctx as &dyn Any).downcast_ref::<T>(),
            Error::Terminal(leaf) => (**leaf).as_any().downcast_ref::<T>(),
        })
    }

    /// Reports whether any node in the chain has runtime type `T`.
    #[must_use]
    pub fn has<T: Any>(&self) -> bool {
        self.find::<T>().is_some()
    }

    /// The outermost context node, if this error was wrapped.
    #[must_use]
    pub fn context(&self) -> Option<&ContextError> {
        match self {
            Error::Context(ctx) => Some(ctx),
            Error::Terminal(_) => None,
        }
    }

    fn same_node(&self, other: &Error) -> bool {
        match (self, other) {
            (Error::Context(a), Error::Context(b)) => Arc::ptr_eq(a, b),
            (Error::Terminal(a), Error::Terminal(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl<E: StdError + Send + Sync + 'static> From<E> for Error {
    fn from(err: E) -> Self {
        Error::new(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Context(ctx) => fmt::Display::fmt(ctx, f),
            Error::Terminal(leaf) => fmt::Display::fmt(leaf, f),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Context(ctx) => f.debug_tuple("Context").field(ctx).finish(),
            Error::Terminal(leaf) => f.debug_tuple("Terminal").field(leaf).finish(),
        }
    }
}

/// An inner error plus the key/value pairs attached when it was wrapped.
pub struct ContextError {
    inner: Error,
    keyvals: Vec<Value>,
}

impl ContextError {
    #[must_use]
    pub fn inner(&self) -> &Error {
        &self.inner
    }

    /// The flat key/value list, always of even length.
    #[must_use]
    pub fn keyvals(&self) -> &[Value] {
        &self.keyvals
    }

    /// Looks up the first value recorded under `key` at this layer.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keyvals
            .chunks_exact(2)
            .find(|pair| pair[0].as_str() == Some(key))
            .map(|pair| &pair[1])
    }
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pair in self.keyvals.chunks_exact(2) {
            write!(f, "{}={} ", pair[0], pair[1])?;
        }
        f.write_str("error=")?;
        value::write_logfmt(f, &self.inner.to_string())
    }
}

impl fmt::Debug for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextError")
            .field("keyvals", &self.keyvals)
            .field("inner", &self.inner)
            .finish()
    }
}

/// Iterator over the nodes of an error chain.
pub struct Chain<'a> {
    next: Option<&'a Error>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Error;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.next();
        Some(current)
    }
}

/// Terminal error holding only a message, as built by [`Error::msg`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct MessageError(pub String);

/// Terminal wrapper that refuses to expose its inner error.
#[derive(Debug, thiserror::Error)]
#[error("NotUnwrapError(error: {0})")]
pub struct NotUnwrapError(Error);

/// Wraps `err` with the given key/value pairs. An odd-length list is padded
/// with [`Value::Missing`].
pub fn wrap(err: impl Into<Error>, mut keyvals: Vec<Value>) -> Error {
    if keyvals.len() % 2 != 0 {
        keyvals.push(Value::Missing);
    }
    Error::Context(Arc::new(ContextError {
        inner: err.into(),
        keyvals,
    }))
}

/// Attaches context to the error side of a `Result`.
pub trait ResultExt<T> {
    /// Leaves `Ok` untouched and wraps `Err` exactly once.
    ///
    /// # Errors
    ///
    /// Returns the error wrapped with `keyvals`.
    fn wrap_err(self, keyvals: Vec<Value>) -> Result<T, Error>;
}

impl<T, E: Into<Error>> ResultExt<T> for Result<T, E> {
    fn wrap_err(self, keyvals: Vec<Value>) -> Result<T, Error> {
        self.map_err(|err| wrap(err, keyvals))
    }
}
