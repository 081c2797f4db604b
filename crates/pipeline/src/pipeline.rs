//! The pipeline facade: stage creation, linking, properties, signals, state
//! and the dispatch loop, all addressed by stage name.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{Backend, LoopControl, PropertyValue};
use crate::error::{PipelineError, PipelineResult};
use crate::linker;
use crate::registry::StageRegistry;
use crate::state::{State, StateChange};

/// Construction-time switches for a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Initialize the runtime before creating the container.
    pub init_runtime: bool,
    /// Create a dispatch loop owned by the pipeline.
    pub create_loop: bool,
    /// Stop the owned loop on end-of-stream or error.
    pub stop_on_eos: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            init_runtime: true,
            create_loop: true,
            stop_on_eos: true,
        }
    }
}

/// A cloneable handle that stops a pipeline's dispatch loop.
///
/// Safe to move into signal callbacks or other threads.
#[derive(Debug, Clone)]
pub struct LoopHandle<L: LoopControl> {
    main_loop: L,
}

impl<L: LoopControl> LoopHandle<L> {
    pub fn stop(&self) {
        self.main_loop.quit();
    }
}

/// A media pipeline assembled from named stages.
///
/// All building operations take `&mut self` and are meant to run on one
/// thread before [`Pipeline::run_loop`]. Signal callbacks never receive the
/// pipeline itself, so they cannot race with building; they get their own
/// context and, if needed, a [`LoopHandle`].
///
/// Dropping the pipeline requests the NULL state for the container and
/// releases the loop and any filter that was never used.
pub struct Pipeline<B: Backend> {
    name: String,
    backend: B,
    container: B::Container,
    registry: StageRegistry<B>,
    main_loop: Option<B::MainLoop>,
    bus_watch: Option<B::BusWatch>,
}

impl<B: Backend> Pipeline<B> {
    /// Creates the pipeline container named `name` on `backend`.
    pub fn new(backend: B, name: &str, options: PipelineOptions) -> PipelineResult<Self> {
        if options.init_runtime {
            backend.init().map_err(PipelineError::Init)?;
        }

        let container = backend
            .new_pipeline(name)
            .map_err(|source| PipelineError::Construction {
                stage_type: "pipeline".to_string(),
                name: name.to_string(),
                source,
            })?;

        let main_loop = options.create_loop.then(|| backend.new_loop());

        let bus_watch = match (&main_loop, options.stop_on_eos) {
            (Some(main_loop), true) => match backend.watch_bus(&container, main_loop) {
                Ok(watch) => Some(watch),
                Err(e) => {
                    warn!("Pipeline '{}' will not stop on end-of-stream: {}", name, e);
                    None
                }
            },
            _ => None,
        };

        info!("Created pipeline '{}'", name);
        Ok(Self {
            name: name.to_string(),
            backend,
            container,
            registry: StageRegistry::new(),
            main_loop,
            bus_watch,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The container that owns every stage of this pipeline.
    pub fn container(&self) -> &B::Container {
        &self.container
    }

    pub fn registry(&self) -> &StageRegistry<B> {
        &self.registry
    }

    /// Constructs a stage of `stage_type` named `name` and adds it to the
    /// pipeline.
    pub fn create_stage(&mut self, stage_type: &str, name: &str) -> PipelineResult<&B::Element> {
        self.registry
            .create_stage(&self.backend, &self.container, stage_type, name)
    }

    /// Constructs a stage whose link to its successor is constrained by the
    /// filter described by `filter_spec`.
    pub fn create_filtered_stage(
        &mut self,
        stage_type: &str,
        name: &str,
        filter_spec: &str,
    ) -> PipelineResult<&B::Element> {
        self.registry.create_filtered_stage(
            &self.backend,
            &self.container,
            stage_type,
            name,
            filter_spec,
        )
    }

    /// Links each adjacent pair of `names` in order. See
    /// [`linker::link_by_name`].
    pub fn link_by_name<S: AsRef<str>>(&mut self, names: &[S]) -> PipelineResult<usize> {
        linker::link_by_name(&mut self.registry, &self.backend, names)
    }

    /// The handle of the stage registered as `name`.
    pub fn stage(&self, name: &str) -> Option<&B::Element> {
        self.registry.lookup(name)
    }

    fn require(&self, name: &str) -> PipelineResult<&B::Element> {
        self.registry
            .lookup(name)
            .ok_or_else(|| PipelineError::StageNotFound {
                name: name.to_string(),
            })
    }

    /// Sets `property` on the stage named `stage`.
    ///
    /// `Ok` means the request reached the runtime; the runtime does not
    /// confirm that the stage accepted the value.
    pub fn set_property(
        &self,
        stage: &str,
        property: &str,
        value: impl Into<PropertyValue>,
    ) -> PipelineResult<()> {
        let element = self.require(stage)?;
        let value = value.into();
        debug!("Setting {}.{} = {}", stage, property, value);
        self.backend
            .set_property(element, property, &value)
            .map_err(|source| PipelineError::Property {
                stage: stage.to_string(),
                property: property.to_string(),
                source,
            })
    }

    /// Connects `callback` to `signal` on the stage named `stage`. `context`
    /// is handed to every invocation unchanged.
    ///
    /// Same weak guarantee as [`Pipeline::set_property`]. For signals with a
    /// return type the callback should return a value of that type; on
    /// GStreamer a missing or mismatched value is replaced by the type's
    /// default.
    pub fn attach_signal<C, F>(
        &self,
        stage: &str,
        signal: &str,
        context: C,
        callback: F,
    ) -> PipelineResult<()>
    where
        C: Send + Sync + 'static,
        F: Fn(&[B::Value], &C) -> Option<B::Value> + Send + Sync + 'static,
    {
        let element = self.require(stage)?;
        debug!("Connecting {}::{}", stage, signal);
        self.backend
            .connect_signal(
                element,
                signal,
                Box::new(move |args: &[B::Value]| callback(args, &context)),
            )
            .map_err(|source| PipelineError::Signal {
                stage: stage.to_string(),
                signal: signal.to_string(),
                source,
            })
    }

    /// Requests `state` for a single stage.
    pub fn set_stage_state(&self, stage: &str, state: State) -> PipelineResult<StateChange> {
        let element = self.require(stage)?;
        self.backend
            .set_element_state(element, state)
            .map_err(|source| {
                warn!("Stage '{}' rejected the transition to {}", stage, state);
                PipelineError::StateChange {
                    target: stage.to_string(),
                    state,
                    source,
                }
            })
    }

    /// Requests `state` for the whole pipeline.
    pub fn set_state(&self, state: State) -> PipelineResult<StateChange> {
        let change = self
            .backend
            .set_container_state(&self.container, state)
            .map_err(|source| {
                warn!("Pipeline '{}' rejected the transition to {}", self.name, state);
                PipelineError::StateChange {
                    target: self.name.clone(),
                    state,
                    source,
                }
            })?;
        info!("Pipeline '{}' -> {} ({:?})", self.name, state, change);
        Ok(change)
    }

    /// Blocks until the loop is stopped through [`Pipeline::stop`], a
    /// [`LoopHandle`] or, with `stop_on_eos`, end-of-stream or an error.
    pub fn run_loop(&self) -> PipelineResult<()> {
        let main_loop = self.main_loop.as_ref().ok_or(PipelineError::NoMainLoop)?;
        info!("Running main loop for '{}'", self.name);
        main_loop.run();
        info!("Main loop for '{}' stopped", self.name);
        Ok(())
    }

    /// Stops the loop. A stop issued while no run is in progress makes the
    /// next [`Pipeline::run_loop`] return at once; stops that arrive during a
    /// run are used up by that run. Without a loop this does nothing.
    pub fn stop(&self) {
        if let Some(main_loop) = &self.main_loop {
            main_loop.quit();
        }
    }

    pub fn loop_handle(&self) -> Option<LoopHandle<B::MainLoop>> {
        self.main_loop.as_ref().map(|main_loop| LoopHandle {
            main_loop: main_loop.clone(),
        })
    }

    /// Places the whole pipeline inside a fresh outer container so it can be
    /// composed into a larger graph.
    pub fn attach_to_container(&self) -> PipelineResult<B::Container> {
        self.backend
            .wrap_in_container(&self.container)
            .map_err(|source| PipelineError::ContainerAdd {
                name: self.name.clone(),
                source,
            })
    }
}

impl<B: Backend> Drop for Pipeline<B> {
    fn drop(&mut self) {
        for filter in self.registry.drain_filters() {
            self.backend.release_filter(filter);
        }
        if let Err(e) = self.backend.set_container_state(&self.container, State::Null) {
            warn!("Failed to shut down pipeline '{}': {}", self.name, e);
        }
        self.bus_watch.take();
        self.main_loop.take();
        debug!("Pipeline '{}' released", self.name);
    }
}
