//! Type-erased stream endpoints handed to blocks
//!
//! A worker owns one [`InputStream`] per input port and one
//! [`OutputStream`] per output port. The wrappers erase the element type so
//! the scheduler can assemble port vectors without knowing it; a block
//! recovers its typed endpoint with `get::<T>()` against its resolved
//! signature.

use std::any::Any;
use std::fmt;

use super::stream::{StreamReader, StreamWriter};
use super::types::Frame;

/// Type-erased input port wrapping a [`StreamReader`]
pub struct InputStream {
    inner: Box<dyn Any + Send>,
    label: String,
}

impl InputStream {
    /// Wrap a type-erased reader (from the registry's factories).
    pub(crate) fn from_erased(inner: Box<dyn Any + Send>, label: String) -> Self {
        Self { inner, label }
    }

    /// The typed reader behind this port.
    ///
    /// Returns None if the port does not carry elements of type `T`.
    pub fn get<T: Send + 'static>(&mut self) -> Option<&mut StreamReader<T>> {
        self.inner.downcast_mut::<StreamReader<T>>()
    }

    /// Reader view for object streams.
    pub fn frames(&mut self) -> Option<&mut StreamReader<Frame>> {
        self.get::<Frame>()
    }

    /// Diagnostic label of the edge feeding this port.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for InputStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InputStream({})", self.label)
    }
}

/// Type-erased output port wrapping a [`StreamWriter`]
pub struct OutputStream {
    inner: Box<dyn Any + Send>,
    label: String,
}

impl OutputStream {
    /// Wrap a type-erased writer (from the registry's factories).
    pub(crate) fn from_erased(inner: Box<dyn Any + Send>, label: String) -> Self {
        Self { inner, label }
    }

    /// Placeholder for an output port with no connections. `get` returns
    /// None; blocks skip writing and carry on.
    pub(crate) fn vacant(label: String) -> Self {
        Self {
            inner: Box::new(()),
            label,
        }
    }

    /// The typed writer behind this port.
    ///
    /// Returns None if the port does not carry elements of type `T` or is
    /// unconnected.
    pub fn get<T: Send + 'static>(&mut self) -> Option<&mut StreamWriter<T>> {
        self.inner.downcast_mut::<StreamWriter<T>>()
    }

    /// Writer view for object streams.
    pub fn frames(&mut self) -> Option<&mut StreamWriter<Frame>> {
        self.get::<Frame>()
    }

    /// Whether any consumer is connected to this port.
    pub fn is_connected(&self) -> bool {
        !self.inner.as_ref().is::<()>()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OutputStream({})", self.label)
    }
}
