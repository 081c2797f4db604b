//! Stage registry mapping stage names to constructed stage handles.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::{BackendError, PipelineError, PipelineResult};
use crate::guard::{PendingElement, PendingFilter};

/// One constructed stage known to the pipeline.
///
/// The handle is owned by the pipeline container; the entry only keeps a
/// reference for lookup. The filter is owned here until the first link that
/// uses this stage as its source consumes it.
pub struct StageEntry<B: Backend> {
    handle: B::Element,
    filter: Option<B::Filter>,
}

impl<B: Backend> StageEntry<B> {
    pub fn handle(&self) -> &B::Element {
        &self.handle
    }

    pub fn filter(&self) -> Option<&B::Filter> {
        self.filter.as_ref()
    }
}

/// A registry of the stages constructed for one pipeline.
///
/// An entry exists only if construction succeeded and the stage was added to
/// the container. Names are unique; a second registration under the same
/// name is rejected without touching the runtime.
pub struct StageRegistry<B: Backend> {
    stages: HashMap<String, StageEntry<B>>,
}

impl<B: Backend> Default for StageRegistry<B> {
    fn default() -> Self {
        Self {
            stages: HashMap::new(),
        }
    }
}

impl<B: Backend> StageRegistry<B> {
    /// Creates a new, empty stage registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a stage of `stage_type`, adds it to `container` and stores
    /// it under `name`.
    pub fn create_stage(
        &mut self,
        backend: &B,
        container: &B::Container,
        stage_type: &str,
        name: &str,
    ) -> PipelineResult<&B::Element> {
        self.ensure_vacant(name)?;
        self.construct(backend, container, stage_type, name, None)
    }

    /// Like [`StageRegistry::create_stage`], additionally storing a filter
    /// parsed from `filter_spec` for the link where this stage is the source.
    ///
    /// The filter is parsed first, so a malformed description never leaves a
    /// stage behind in the container.
    pub fn create_filtered_stage(
        &mut self,
        backend: &B,
        container: &B::Container,
        stage_type: &str,
        name: &str,
        filter_spec: &str,
    ) -> PipelineResult<&B::Element> {
        self.ensure_vacant(name)?;

        let filter = backend
            .parse_filter(filter_spec)
            .map_err(|source| {
                warn!("Failed to create caps for stage '{}' from '{}'", name, filter_spec);
                PipelineError::FilterParse {
                    name: name.to_string(),
                    spec: filter_spec.to_string(),
                    source,
                }
            })?;
        let filter = PendingFilter::new(backend, filter);

        self.construct(backend, container, stage_type, name, Some(filter))
    }

    fn ensure_vacant(&self, name: &str) -> PipelineResult<()> {
        if self.stages.contains_key(name) {
            warn!("Stage name '{}' already exists", name);
            return Err(PipelineError::DuplicateStage {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn construct(
        &mut self,
        backend: &B,
        container: &B::Container,
        stage_type: &str,
        name: &str,
        filter: Option<PendingFilter<'_, B>>,
    ) -> PipelineResult<&B::Element> {
        let construction_error = |source: BackendError| {
            warn!("Failed to add stage '{}' of type '{}'", name, stage_type);
            PipelineError::Construction {
                stage_type: stage_type.to_string(),
                name: name.to_string(),
                source,
            }
        };

        let element = backend
            .make_element(stage_type, name)
            .map_err(construction_error)?;
        let pending = PendingElement::new(backend, element);
        backend
            .add_to_container(container, pending.element())
            .map_err(construction_error)?;

        debug!("Added stage '{}' ({})", name, stage_type);
        let entry = StageEntry {
            handle: pending.commit(),
            filter: filter.map(PendingFilter::commit),
        };
        let entry = self.stages.entry(name.to_string()).or_insert(entry);
        Ok(&entry.handle)
    }

    /// Looks up the handle stored under `name`.
    pub fn lookup(&self, name: &str) -> Option<&B::Element> {
        self.stages.get(name).map(StageEntry::handle)
    }

    pub fn entry(&self, name: &str) -> Option<&StageEntry<B>> {
        self.stages.get(name)
    }

    /// Removes and returns the unused filter stored for `name`, if any.
    pub fn take_filter(&mut self, name: &str) -> Option<B::Filter> {
        self.stages.get_mut(name).and_then(|entry| entry.filter.take())
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.stages
            .get(name)
            .is_some_and(|entry| entry.filter.is_some())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Registered stage names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Removes every filter that was never consumed by a link.
    pub fn drain_filters(&mut self) -> Vec<B::Filter> {
        self.stages
            .values_mut()
            .filter_map(|entry| entry.filter.take())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Call, RecordedContainer, RecordingBackend};

    fn setup(backend: &RecordingBackend) -> (StageRegistry<RecordingBackend>, RecordedContainer) {
        (StageRegistry::new(), backend.new_pipeline("test").unwrap())
    }

    #[test]
    fn create_then_lookup_returns_the_same_handle() {
        let backend = RecordingBackend::new();
        let (mut registry, container) = setup(&backend);

        let created = registry
            .create_stage(&backend, &container, "fakesrc", "src")
            .unwrap()
            .clone();

        assert_eq!(registry.lookup("src"), Some(&created));
        assert_eq!(created.factory(), "fakesrc");
        assert!(!registry.has_filter("src"));
    }

    #[test]
    fn duplicate_name_is_rejected_before_construction() {
        let backend = RecordingBackend::new();
        let (mut registry, container) = setup(&backend);
        let first = registry
            .create_stage(&backend, &container, "fakesrc", "src")
            .unwrap()
            .clone();
        backend.clear_calls();

        let err = registry
            .create_stage(&backend, &container, "identity", "src")
            .unwrap_err();

        assert!(matches!(err, PipelineError::DuplicateStage { ref name } if name == "src"));
        assert!(backend.calls().is_empty());
        assert_eq!(registry.lookup("src"), Some(&first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_type_stores_nothing() {
        let backend = RecordingBackend::new().reject_factory("nosuchthing");
        let (mut registry, container) = setup(&backend);

        let err = registry
            .create_stage(&backend, &container, "nosuchthing", "x")
            .unwrap_err();

        assert!(matches!(err, PipelineError::Construction { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn failed_add_releases_the_handle() {
        let backend = RecordingBackend::new().fail_add("sink");
        let (mut registry, container) = setup(&backend);

        let result = registry.create_stage(&backend, &container, "fakesink", "sink");

        assert!(result.is_err());
        assert!(registry.lookup("sink").is_none());
        assert_eq!(
            backend.calls().last(),
            Some(&Call::ReleaseElement { name: "sink".into() })
        );
    }

    #[test]
    fn filter_parse_failure_is_distinct_and_constructs_nothing() {
        let backend = RecordingBackend::new();
        let (mut registry, container) = setup(&backend);

        let err = registry
            .create_filtered_stage(&backend, &container, "capsfilter", "cf", "")
            .unwrap_err();

        assert!(matches!(err, PipelineError::FilterParse { ref name, .. } if name == "cf"));
        assert!(!backend
            .calls()
            .iter()
            .any(|call| matches!(call, Call::MakeElement { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn construction_failure_releases_the_parsed_filter() {
        let backend = RecordingBackend::new().fail_add("convert");
        let (mut registry, container) = setup(&backend);

        let err = registry
            .create_filtered_stage(&backend, &container, "videoconvert", "convert", "video/x-raw")
            .unwrap_err();

        assert!(matches!(err, PipelineError::Construction { .. }));
        let calls = backend.calls();
        assert!(calls.contains(&Call::ReleaseElement { name: "convert".into() }));
        assert!(calls.contains(&Call::ReleaseFilter {
            description: "video/x-raw".into()
        }));
    }

    #[test]
    fn filtered_success_stores_entry_and_filter() {
        let backend = RecordingBackend::new();
        let (mut registry, container) = setup(&backend);

        registry
            .create_filtered_stage(&backend, &container, "videoconvert", "convert", "video/x-raw")
            .unwrap();

        assert!(registry.contains("convert"));
        assert!(registry.has_filter("convert"));
        assert_eq!(
            registry.entry("convert").and_then(|e| e.filter()).map(ToString::to_string),
            Some("video/x-raw".to_string())
        );
        assert_eq!(registry.take_filter("convert").map(|f| f.to_string()), Some("video/x-raw".into()));
        assert!(registry.take_filter("convert").is_none());
    }

    #[test]
    fn names_are_sorted() {
        let backend = RecordingBackend::new();
        let (mut registry, container) = setup(&backend);
        for name in ["sink", "decode", "src"] {
            registry.create_stage(&backend, &container, "identity", name).unwrap();
        }
        assert_eq!(registry.names(), vec!["decode", "sink", "src"]);
    }
}
