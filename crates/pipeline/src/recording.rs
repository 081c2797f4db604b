//! An in-process runtime that records every call made through [`Backend`].
//!
//! Used to dry-run topologies without a media framework and to observe the
//! exact sequence of construction, link and state requests in tests. Failures
//! can be scripted per factory, stage, pair or state target.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::{Backend, LoopControl, PropertyValue, SignalCallback};
use crate::error::BackendError;
use crate::state::{State, StateChange};

/// One request issued to the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Init,
    NewPipeline { name: String },
    MakeElement { factory: String, name: String },
    AddToContainer { container: String, element: String },
    ReleaseElement { name: String },
    ParseFilter { spec: String },
    ReleaseFilter { description: String },
    Link { src: String, dst: String },
    LinkFiltered { src: String, dst: String, filter: String },
    SetProperty { element: String, property: String, value: PropertyValue },
    ConnectSignal { element: String, signal: String },
    SetElementState { element: String, state: State },
    SetContainerState { container: String, state: State },
    WrapInContainer { inner: String, outer: String },
    ReleaseContainer { name: String },
    WatchBus { container: String },
}

impl Call {
    pub fn is_link(&self) -> bool {
        matches!(self, Call::Link { .. } | Call::LinkFiltered { .. })
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Call::Init => f.write_str("init"),
            Call::NewPipeline { name } => write!(f, "new pipeline {name}"),
            Call::MakeElement { factory, name } => write!(f, "make {factory} as {name}"),
            Call::AddToContainer { container, element } => write!(f, "add {element} to {container}"),
            Call::ReleaseElement { name } => write!(f, "release {name}"),
            Call::ParseFilter { spec } => write!(f, "parse filter '{spec}'"),
            Call::ReleaseFilter { description } => write!(f, "release filter '{description}'"),
            Call::Link { src, dst } => write!(f, "link {src} -> {dst}"),
            Call::LinkFiltered { src, dst, filter } => {
                write!(f, "link {src} -> {dst} filtered by '{filter}'")
            }
            Call::SetProperty { element, property, value } => {
                write!(f, "set {element}.{property} = {value}")
            }
            Call::ConnectSignal { element, signal } => write!(f, "connect {element}::{signal}"),
            Call::SetElementState { element, state } => write!(f, "set {element} to {state}"),
            Call::SetContainerState { container, state } => {
                write!(f, "set container {container} to {state}")
            }
            Call::WrapInContainer { inner, outer } => write!(f, "wrap {inner} in {outer}"),
            Call::ReleaseContainer { name } => write!(f, "release container {name}"),
            Call::WatchBus { container } => write!(f, "watch bus of {container}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordedElement {
    id: u64,
    name: Arc<str>,
    factory: Arc<str>,
}

impl RecordedElement {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> &str {
        &self.factory
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordedContainer {
    id: u64,
    name: Arc<str>,
}

impl RecordedContainer {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A filter description that passed the recording parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFilter {
    description: String,
}

impl fmt::Display for RecordedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// A dispatch loop backed by a single-slot channel.
///
/// A quit issued while no run is in progress is kept for the next run. Quits
/// that pile up during a run are discarded when it returns.
#[derive(Debug, Clone)]
pub struct RecordedLoop {
    tx: flume::Sender<()>,
    rx: flume::Receiver<()>,
}

impl RecordedLoop {
    fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        Self { tx, rx }
    }
}

impl LoopControl for RecordedLoop {
    fn run(&self) {
        // Both ends live in `self`, so `recv` can only return on a quit.
        let _ = self.rx.recv();
        self.rx.drain();
    }

    fn quit(&self) {
        // A full slot means a quit is already pending.
        let _ = self.tx.try_send(());
    }
}

type SharedCallback = Arc<dyn Fn(&[PropertyValue]) -> Option<PropertyValue> + Send + Sync>;

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    next_id: u64,
    rejected_factories: HashSet<String>,
    failing_adds: HashSet<String>,
    failing_links: HashSet<(String, String)>,
    failing_states: HashSet<String>,
    async_states: bool,
    parented: HashSet<u64>,
    handlers: Vec<(String, String, SharedCallback)>,
    properties: HashMap<(String, String), PropertyValue>,
    states: HashMap<String, State>,
    watched_loops: Vec<RecordedLoop>,
}

/// Recording runtime. Clones share the same call log and failure script.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for RecordingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingBackend")
            .field("calls", &self.lock().calls.len())
            .finish()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }

    /// Makes `make_element` fail for `factory`.
    pub fn reject_factory(self, factory: &str) -> Self {
        self.lock().rejected_factories.insert(factory.to_string());
        self
    }

    /// Makes adding the stage named `name` to a container fail.
    pub fn fail_add(self, name: &str) -> Self {
        self.lock().failing_adds.insert(name.to_string());
        self
    }

    /// Makes any link from `src` to `dst` fail.
    pub fn fail_link(self, src: &str, dst: &str) -> Self {
        self.lock()
            .failing_links
            .insert((src.to_string(), dst.to_string()));
        self
    }

    /// Makes state requests on the stage or container named `target` fail.
    pub fn fail_state(self, target: &str) -> Self {
        self.lock().failing_states.insert(target.to_string());
        self
    }

    /// Reports accepted state requests as still in progress.
    pub fn async_state_changes(self) -> Self {
        self.lock().async_states = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn link_calls(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_link())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Last value issued for `property` on the stage named `element`.
    pub fn property(&self, element: &str, property: &str) -> Option<PropertyValue> {
        self.lock()
            .properties
            .get(&(element.to_string(), property.to_string()))
            .cloned()
    }

    /// Last state accepted for the stage or container named `target`.
    pub fn state_of(&self, target: &str) -> Option<State> {
        self.lock().states.get(target).copied()
    }

    /// Invokes every callback connected to `signal` on `element`, in
    /// connection order, and returns their results.
    pub fn emit(&self, element: &str, signal: &str, args: &[PropertyValue]) -> Vec<Option<PropertyValue>> {
        let callbacks: Vec<SharedCallback> = self
            .lock()
            .handlers
            .iter()
            .filter(|(e, s, _)| e == element && s == signal)
            .map(|(_, _, cb)| Arc::clone(cb))
            .collect();
        callbacks.iter().map(|cb| cb(args)).collect()
    }

    /// Delivers end-of-stream to every loop installed through `watch_bus`.
    pub fn post_eos(&self) {
        let loops = self.lock().watched_loops.clone();
        for main_loop in loops {
            main_loop.quit();
        }
    }

    fn next_id(&self) -> u64 {
        let mut inner = self.lock();
        inner.next_id += 1;
        inner.next_id
    }

    fn transition(&self, target: &str, state: State) -> Result<StateChange, BackendError> {
        let mut inner = self.lock();
        if inner.failing_states.contains(target) {
            return Err(BackendError::new(format!(
                "{target} refused the transition to {state}"
            )));
        }
        inner.states.insert(target.to_string(), state);
        Ok(if inner.async_states {
            StateChange::Async
        } else {
            StateChange::Success
        })
    }
}

fn validate_filter(spec: &str) -> Result<(), BackendError> {
    if spec.trim().is_empty() {
        return Err(BackendError::new("empty filter description"));
    }
    if spec.split(',').any(|segment| segment.trim().is_empty()) {
        return Err(BackendError::new(format!(
            "empty field in filter description '{spec}'"
        )));
    }
    Ok(())
}

impl Backend for RecordingBackend {
    type Element = RecordedElement;
    type Filter = RecordedFilter;
    type Container = RecordedContainer;
    type MainLoop = RecordedLoop;
    type Value = PropertyValue;
    type BusWatch = ();

    fn init(&self) -> Result<(), BackendError> {
        self.record(Call::Init);
        Ok(())
    }

    fn new_pipeline(&self, name: &str) -> Result<Self::Container, BackendError> {
        self.record(Call::NewPipeline {
            name: name.to_string(),
        });
        Ok(RecordedContainer {
            id: self.next_id(),
            name: name.into(),
        })
    }

    fn new_loop(&self) -> Self::MainLoop {
        RecordedLoop::new()
    }

    fn make_element(&self, factory: &str, name: &str) -> Result<Self::Element, BackendError> {
        self.record(Call::MakeElement {
            factory: factory.to_string(),
            name: name.to_string(),
        });
        let rejected = self.lock().rejected_factories.contains(factory);
        if rejected || factory.trim().is_empty() {
            return Err(BackendError::new(format!("no such element factory '{factory}'")));
        }
        Ok(RecordedElement {
            id: self.next_id(),
            name: name.into(),
            factory: factory.into(),
        })
    }

    fn add_to_container(
        &self,
        container: &Self::Container,
        element: &Self::Element,
    ) -> Result<(), BackendError> {
        self.record(Call::AddToContainer {
            container: container.name().to_string(),
            element: element.name().to_string(),
        });
        let mut inner = self.lock();
        if inner.failing_adds.contains(element.name()) {
            return Err(BackendError::new(format!(
                "{} refused {}",
                container.name(),
                element.name()
            )));
        }
        if !inner.parented.insert(element.id) {
            return Err(BackendError::new(format!(
                "{} already has a parent",
                element.name()
            )));
        }
        Ok(())
    }

    fn release_element(&self, element: Self::Element) {
        self.record(Call::ReleaseElement {
            name: element.name().to_string(),
        });
    }

    fn parse_filter(&self, spec: &str) -> Result<Self::Filter, BackendError> {
        self.record(Call::ParseFilter {
            spec: spec.to_string(),
        });
        validate_filter(spec)?;
        Ok(RecordedFilter {
            description: spec.trim().to_string(),
        })
    }

    fn release_filter(&self, filter: Self::Filter) {
        self.record(Call::ReleaseFilter {
            description: filter.description,
        });
    }

    fn link(&self, src: &Self::Element, dst: &Self::Element) -> Result<(), BackendError> {
        self.record(Call::Link {
            src: src.name().to_string(),
            dst: dst.name().to_string(),
        });
        self.check_link(src, dst)
    }

    fn link_filtered(
        &self,
        src: &Self::Element,
        dst: &Self::Element,
        filter: &Self::Filter,
    ) -> Result<(), BackendError> {
        self.record(Call::LinkFiltered {
            src: src.name().to_string(),
            dst: dst.name().to_string(),
            filter: filter.to_string(),
        });
        self.check_link(src, dst)
    }

    fn set_property(
        &self,
        element: &Self::Element,
        property: &str,
        value: &PropertyValue,
    ) -> Result<(), BackendError> {
        self.record(Call::SetProperty {
            element: element.name().to_string(),
            property: property.to_string(),
            value: value.clone(),
        });
        self.lock().properties.insert(
            (element.name().to_string(), property.to_string()),
            value.clone(),
        );
        Ok(())
    }

    fn connect_signal(
        &self,
        element: &Self::Element,
        signal: &str,
        callback: SignalCallback<Self::Value>,
    ) -> Result<(), BackendError> {
        self.record(Call::ConnectSignal {
            element: element.name().to_string(),
            signal: signal.to_string(),
        });
        self.lock().handlers.push((
            element.name().to_string(),
            signal.to_string(),
            Arc::from(callback),
        ));
        Ok(())
    }

    fn set_element_state(
        &self,
        element: &Self::Element,
        state: State,
    ) -> Result<StateChange, BackendError> {
        self.record(Call::SetElementState {
            element: element.name().to_string(),
            state,
        });
        self.transition(element.name(), state)
    }

    fn set_container_state(
        &self,
        container: &Self::Container,
        state: State,
    ) -> Result<StateChange, BackendError> {
        self.record(Call::SetContainerState {
            container: container.name().to_string(),
            state,
        });
        self.transition(container.name(), state)
    }

    fn wrap_in_container(&self, container: &Self::Container) -> Result<Self::Container, BackendError> {
        let id = self.next_id();
        let outer = RecordedContainer {
            id,
            name: format!("bin{id}").into(),
        };
        self.record(Call::WrapInContainer {
            inner: container.name().to_string(),
            outer: outer.name().to_string(),
        });
        let refused = {
            let mut inner = self.lock();
            if inner.failing_adds.contains(container.name()) {
                Some(format!("{} refused {}", outer.name(), container.name()))
            } else if !inner.parented.insert(container.id) {
                Some(format!("{} already has a parent", container.name()))
            } else {
                None
            }
        };
        match refused {
            Some(message) => {
                self.record(Call::ReleaseContainer {
                    name: outer.name().to_string(),
                });
                Err(BackendError::new(message))
            }
            None => Ok(outer),
        }
    }

    fn watch_bus(
        &self,
        container: &Self::Container,
        main_loop: &Self::MainLoop,
    ) -> Result<Self::BusWatch, BackendError> {
        self.record(Call::WatchBus {
            container: container.name().to_string(),
        });
        self.lock().watched_loops.push(main_loop.clone());
        Ok(())
    }
}

impl RecordingBackend {
    fn check_link(&self, src: &RecordedElement, dst: &RecordedElement) -> Result<(), BackendError> {
        let failing = self
            .lock()
            .failing_links
            .contains(&(src.name().to_string(), dst.name().to_string()));
        if failing {
            return Err(BackendError::new(format!(
                "{} and {} have no compatible pads",
                src.name(),
                dst.name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn filter_parser_rejects_empty_segments() {
        assert!(validate_filter("video/x-raw, format=(string)I420").is_ok());
        assert!(validate_filter("format=X").is_ok());
        assert!(validate_filter("").is_err());
        assert!(validate_filter("video/x-raw,,width=2").is_err());
    }

    #[test]
    fn loop_runs_until_quit_from_another_thread() {
        let main_loop = RecordedLoop::new();
        let remote = main_loop.clone();
        let quitter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.quit();
        });
        main_loop.run();
        quitter.join().unwrap();
    }

    #[test]
    fn quit_before_run_is_kept_for_the_next_run() {
        let main_loop = RecordedLoop::new();
        main_loop.quit();
        main_loop.run();
    }

    #[test]
    fn extra_quits_do_not_leak_into_the_next_run() {
        let main_loop = RecordedLoop::new();
        main_loop.quit();
        main_loop.quit();
        main_loop.run();

        let remote = main_loop.clone();
        let started = Instant::now();
        let quitter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.quit();
        });
        main_loop.run();
        quitter.join().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn refused_wrap_releases_the_outer_container() {
        let backend = RecordingBackend::new().fail_add("p");
        let container = backend.new_pipeline("p").unwrap();

        assert!(backend.wrap_in_container(&container).is_err());
        assert!(matches!(
            backend.calls().last(),
            Some(Call::ReleaseContainer { .. })
        ));
    }

    #[test]
    fn an_element_cannot_be_added_twice() {
        let backend = RecordingBackend::new();
        let container = backend.new_pipeline("p").unwrap();
        let element = backend.make_element("queue", "q").unwrap();
        assert!(backend.add_to_container(&container, &element).is_ok());
        assert!(backend.add_to_container(&container, &element).is_err());
    }

    #[test]
    fn clones_share_the_log() {
        let backend = RecordingBackend::new();
        let observer = backend.clone();
        backend.init().unwrap();
        assert_eq!(observer.calls(), vec![Call::Init]);
    }
}
