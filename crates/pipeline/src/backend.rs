//! The boundary between the pipeline builder and the media runtime.
//!
//! Everything the builder needs from the runtime goes through [`Backend`].
//! Property and signal names stay stringly-typed here because the runtime,
//! not this crate, decides which names exist.

use std::fmt;

use crate::error::{BackendError, PipelineError};
use crate::state::{State, StateChange};

/// Control over a blocking dispatch loop.
///
/// A quit issued while the loop is not running is held for the next run,
/// which then returns as soon as it starts dispatching. Any quit still held
/// when a run returns is discarded, so one run never ends the next.
pub trait LoopControl: Clone + Send + Sync + 'static {
    /// Blocks the calling thread until [`LoopControl::quit`] is called.
    fn run(&self);

    /// Stops the loop. Safe to call from callbacks and other threads.
    fn quit(&self);
}

/// Callback invoked by the runtime when a connected signal fires.
pub type SignalCallback<V> = Box<dyn Fn(&[V]) -> Option<V> + Send + Sync + 'static>;

/// The media runtime operations the pipeline builder relies on.
pub trait Backend {
    /// A constructed stage instance.
    type Element: Clone + fmt::Debug;
    /// A parsed format constraint. `Display` yields its textual description.
    type Filter: fmt::Display;
    /// An aggregate that owns stages and drives their combined state.
    type Container: Clone + fmt::Debug;
    type MainLoop: LoopControl;
    /// Signal argument and return values.
    type Value: 'static;
    /// Keeps a bus watch installed for as long as it is held.
    type BusWatch;

    /// One-time runtime initialization. Must be idempotent.
    fn init(&self) -> Result<(), BackendError>;

    fn new_pipeline(&self, name: &str) -> Result<Self::Container, BackendError>;

    fn new_loop(&self) -> Self::MainLoop;

    /// Instantiates a stage of `factory` type named `name`.
    fn make_element(&self, factory: &str, name: &str) -> Result<Self::Element, BackendError>;

    /// Transfers ownership of `element` to `container` on success.
    fn add_to_container(
        &self,
        container: &Self::Container,
        element: &Self::Element,
    ) -> Result<(), BackendError>;

    /// Releases a stage that never made it into a container.
    fn release_element(&self, element: Self::Element);

    fn parse_filter(&self, spec: &str) -> Result<Self::Filter, BackendError>;

    fn release_filter(&self, filter: Self::Filter);

    fn link(&self, src: &Self::Element, dst: &Self::Element) -> Result<(), BackendError>;

    fn link_filtered(
        &self,
        src: &Self::Element,
        dst: &Self::Element,
        filter: &Self::Filter,
    ) -> Result<(), BackendError>;

    /// Issues a property set. `Ok` means the request was issued, not that the
    /// stage accepted the value.
    fn set_property(
        &self,
        element: &Self::Element,
        property: &str,
        value: &PropertyValue,
    ) -> Result<(), BackendError>;

    /// Registers `callback` for `signal`. Same weak guarantee as
    /// [`Backend::set_property`].
    fn connect_signal(
        &self,
        element: &Self::Element,
        signal: &str,
        callback: SignalCallback<Self::Value>,
    ) -> Result<(), BackendError>;

    fn set_element_state(
        &self,
        element: &Self::Element,
        state: State,
    ) -> Result<StateChange, BackendError>;

    fn set_container_state(
        &self,
        container: &Self::Container,
        state: State,
    ) -> Result<StateChange, BackendError>;

    /// Wraps `container` in a fresh outer container.
    fn wrap_in_container(&self, container: &Self::Container) -> Result<Self::Container, BackendError>;

    /// Stops `main_loop` when the container reports end-of-stream or an error.
    fn watch_bus(
        &self,
        container: &Self::Container,
        main_loop: &Self::MainLoop,
    ) -> Result<Self::BusWatch, BackendError>;
}

/// A value for a named stage property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::UInt(v) => write!(f, "{v}"),
            PropertyValue::Double(v) => write!(f, "{v}"),
            PropertyValue::Str(v) => f.write_str(v),
        }
    }
}

macro_rules! property_from {
    ($($ty:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(
            impl From<$ty> for PropertyValue {
                fn from(value: $ty) -> Self {
                    PropertyValue::$variant(value as $target)
                }
            }
        )*
    };
}

property_from! {
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
    f32 => Double as f64,
    f64 => Double as f64,
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}

impl TryFrom<serde_json::Value> for PropertyValue {
    type Error = PipelineError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        match value {
            Value::Bool(b) => Ok(PropertyValue::Bool(b)),
            Value::String(s) => Ok(PropertyValue::Str(s)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(PropertyValue::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(PropertyValue::UInt(u))
                } else if let Some(d) = n.as_f64() {
                    Ok(PropertyValue::Double(d))
                } else {
                    Err(PipelineError::InvalidValue {
                        message: format!("unrepresentable number {n}"),
                    })
                }
            }
            other => Err(PipelineError::InvalidValue {
                message: format!("expected a scalar, got {other}"),
            }),
        }
    }
}
