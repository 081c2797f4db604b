//! Scoped ownership of stage handles that are not yet owned by a container.

use crate::backend::Backend;

/// A freshly constructed stage, exclusively owned until committed.
///
/// Dropping the guard without calling [`PendingElement::commit`] hands the
/// handle back to the runtime, so every early return on a construction path
/// releases it.
pub struct PendingElement<'b, B: Backend> {
    backend: &'b B,
    element: Option<B::Element>,
}

impl<'b, B: Backend> PendingElement<'b, B> {
    pub fn new(backend: &'b B, element: B::Element) -> Self {
        Self {
            backend,
            element: Some(element),
        }
    }

    pub fn element(&self) -> &B::Element {
        // Only `commit` and `drop` take the handle, and both consume the guard.
        self.element
            .as_ref()
            .unwrap_or_else(|| unreachable!("pending element already taken"))
    }

    /// Marks ownership as transferred and returns the handle.
    pub fn commit(mut self) -> B::Element {
        self.element
            .take()
            .unwrap_or_else(|| unreachable!("pending element already taken"))
    }
}

impl<B: Backend> Drop for PendingElement<'_, B> {
    fn drop(&mut self) {
        if let Some(element) = self.element.take() {
            tracing::debug!("Releasing uncommitted stage {:?}", element);
            self.backend.release_element(element);
        }
    }
}

/// A parsed filter that has not yet been stored with its stage.
pub struct PendingFilter<'b, B: Backend> {
    backend: &'b B,
    filter: Option<B::Filter>,
}

impl<'b, B: Backend> PendingFilter<'b, B> {
    pub fn new(backend: &'b B, filter: B::Filter) -> Self {
        Self {
            backend,
            filter: Some(filter),
        }
    }

    pub fn commit(mut self) -> B::Filter {
        self.filter
            .take()
            .unwrap_or_else(|| unreachable!("pending filter already taken"))
    }
}

impl<B: Backend> Drop for PendingFilter<'_, B> {
    fn drop(&mut self) {
        if let Some(filter) = self.filter.take() {
            self.backend.release_filter(filter);
        }
    }
}
