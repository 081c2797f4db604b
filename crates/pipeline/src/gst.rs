//! GStreamer implementation of [`Backend`].

use gstreamer as gst;

use gst::glib;
use gst::prelude::*;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

use crate::backend::{Backend, LoopControl, PropertyValue, SignalCallback};
use crate::error::BackendError;
use crate::state::{State, StateChange};

static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Stages are GStreamer elements, filters are caps and the dispatch loop is
/// a GLib main loop on the default context.
#[derive(Debug, Clone, Copy, Default)]
pub struct GstBackend;

impl GstBackend {
    pub fn new() -> Self {
        Self
    }
}

/// A GLib main loop that keeps a quit issued while it is not running.
///
/// `g_main_loop_run` resets the loop to running, so a bare quit before the
/// run would be lost. The request is latched in a flag, replayed once the
/// run is dispatching and cleared when the run returns.
#[derive(Debug, Clone)]
pub struct GstLoop {
    main_loop: glib::MainLoop,
    quit_requested: Arc<AtomicBool>,
}

impl GstLoop {
    fn new() -> Self {
        Self {
            main_loop: glib::MainLoop::new(None, false),
            quit_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn main_loop(&self) -> &glib::MainLoop {
        &self.main_loop
    }
}

impl LoopControl for GstLoop {
    fn run(&self) {
        let main_loop = self.main_loop.clone();
        let quit_requested = self.quit_requested.clone();
        let _ = glib::idle_source_new(None, glib::Priority::DEFAULT, move || {
            if quit_requested.load(Ordering::Acquire) {
                main_loop.quit();
            }
            glib::ControlFlow::Break
        })
        .attach(Some(&self.main_loop.context()));

        self.main_loop.run();
        self.quit_requested.store(false, Ordering::Release);
    }

    fn quit(&self) {
        self.quit_requested.store(true, Ordering::Release);
        self.main_loop.quit();
    }
}

fn backend_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::new(e.to_string())
}

fn to_gst_state(state: State) -> gst::State {
    match state {
        State::Null => gst::State::Null,
        State::Ready => gst::State::Ready,
        State::Paused => gst::State::Paused,
        State::Playing => gst::State::Playing,
    }
}

fn from_gst_success(success: gst::StateChangeSuccess) -> StateChange {
    match success {
        gst::StateChangeSuccess::Success => StateChange::Success,
        gst::StateChangeSuccess::Async => StateChange::Async,
        gst::StateChangeSuccess::NoPreroll => StateChange::NoPreroll,
    }
}

impl Backend for GstBackend {
    type Element = gst::Element;
    type Filter = gst::Caps;
    type Container = gst::Bin;
    type MainLoop = GstLoop;
    type Value = glib::Value;
    type BusWatch = gst::bus::BusWatchGuard;

    fn init(&self) -> Result<(), BackendError> {
        GST_INIT
            .get_or_init(|| gst::init().map_err(|e| e.to_string()))
            .clone()
            .map_err(BackendError)
    }

    fn new_pipeline(&self, name: &str) -> Result<Self::Container, BackendError> {
        Ok(gst::Pipeline::builder().name(name).build().upcast())
    }

    fn new_loop(&self) -> Self::MainLoop {
        GstLoop::new()
    }

    fn make_element(&self, factory: &str, name: &str) -> Result<Self::Element, BackendError> {
        gst::ElementFactory::make(factory)
            .name(name)
            .build()
            .map_err(backend_error)
    }

    fn add_to_container(
        &self,
        container: &Self::Container,
        element: &Self::Element,
    ) -> Result<(), BackendError> {
        container.add(element).map_err(backend_error)
    }

    fn release_element(&self, element: Self::Element) {
        drop(element);
    }

    fn parse_filter(&self, spec: &str) -> Result<Self::Filter, BackendError> {
        gst::Caps::from_str(spec).map_err(backend_error)
    }

    fn release_filter(&self, filter: Self::Filter) {
        drop(filter);
    }

    fn link(&self, src: &Self::Element, dst: &Self::Element) -> Result<(), BackendError> {
        src.link(dst).map_err(backend_error)
    }

    fn link_filtered(
        &self,
        src: &Self::Element,
        dst: &Self::Element,
        filter: &Self::Filter,
    ) -> Result<(), BackendError> {
        src.link_filtered(dst, filter).map_err(backend_error)
    }

    fn set_property(
        &self,
        element: &Self::Element,
        property: &str,
        value: &PropertyValue,
    ) -> Result<(), BackendError> {
        // GLib only warns about unknown or read-only properties; keep that.
        let Some(pspec) = element.find_property(property) else {
            warn!("{} has no property named '{}'", element.name(), property);
            return Ok(());
        };
        let flags = pspec.flags();
        if !flags.contains(glib::ParamFlags::WRITABLE)
            || flags.contains(glib::ParamFlags::CONSTRUCT_ONLY)
        {
            warn!("Property '{}' of {} is not writable", property, element.name());
            return Ok(());
        }

        let target = pspec.value_type();
        let converted = match value {
            PropertyValue::Str(s) if target == glib::Type::STRING => s.to_value(),
            other => <glib::Value as GstValueExt>::deserialize(&other.to_string(), target)
                .map_err(|e| {
                    BackendError::new(format!("cannot convert '{other}' to {target}: {e}"))
                })?,
        };
        element.set_property_from_value(property, &converted);
        Ok(())
    }

    fn connect_signal(
        &self,
        element: &Self::Element,
        signal: &str,
        callback: SignalCallback<Self::Value>,
    ) -> Result<(), BackendError> {
        let base = signal.split_once("::").map_or(signal, |(name, _)| name);
        let Some(signal_id) = glib::subclass::SignalId::lookup(base, element.type_()) else {
            warn!("{} has no signal named '{}'", element.name(), signal);
            return Ok(());
        };

        // A returned value must match the signal's return type; anything else
        // becomes that type's default.
        let return_type = signal_id.query().return_type().type_();
        let signal_name = signal.to_string();
        element.connect(signal, false, move |args| {
            let returned = callback(args);
            if return_type == glib::Type::UNIT {
                if returned.is_some() {
                    warn!("Handler for '{}' returned a value; ignoring it", signal_name);
                }
                return None;
            }
            match returned {
                Some(value) if value.type_().is_a(return_type) => Some(value),
                other => {
                    if let Some(value) = other {
                        warn!(
                            "Handler for '{}' returned {} instead of {}",
                            signal_name,
                            value.type_(),
                            return_type
                        );
                    }
                    Some(glib::Value::from_type(return_type))
                }
            }
        });
        Ok(())
    }

    fn set_element_state(
        &self,
        element: &Self::Element,
        state: State,
    ) -> Result<StateChange, BackendError> {
        element
            .set_state(to_gst_state(state))
            .map(from_gst_success)
            .map_err(backend_error)
    }

    fn set_container_state(
        &self,
        container: &Self::Container,
        state: State,
    ) -> Result<StateChange, BackendError> {
        container
            .set_state(to_gst_state(state))
            .map(from_gst_success)
            .map_err(backend_error)
    }

    fn wrap_in_container(&self, container: &Self::Container) -> Result<Self::Container, BackendError> {
        let outer = gst::Bin::builder().build();
        outer.add(container).map_err(backend_error)?;
        Ok(outer)
    }

    fn watch_bus(
        &self,
        container: &Self::Container,
        main_loop: &Self::MainLoop,
    ) -> Result<Self::BusWatch, BackendError> {
        let bus = container
            .bus()
            .ok_or_else(|| BackendError::new(format!("{} has no bus", container.name())))?;
        let main_loop = main_loop.clone();

        bus.add_watch(move |_, msg| {
            use gst::MessageView;

            match msg.view() {
                MessageView::Eos(..) => {
                    info!("End of stream");
                    main_loop.quit();
                }
                MessageView::Error(err) => {
                    error!(
                        "Error from {:?}: {} ({:?})",
                        err.src().map(|s| s.path_string()),
                        err.error(),
                        err.debug()
                    );
                    main_loop.quit();
                }
                _ => (),
            }
            glib::ControlFlow::Continue
        })
        .map_err(backend_error)
    }
}
