//! Scoped resources owned by an attached behavior.
//!
//! Anything a behavior acquires while attached that needs an explicit
//! release (a timer task, a subscription, a callback to unregister) goes into
//! the instance's [`ResourceRegistry`]. The registry is drained once, at
//! detach, in registration order.

use std::fmt;

use tokio::task::JoinHandle;

use crate::error::{BehaviorError, BehaviorResult};

/// A resource that must be released explicitly.
pub trait Resource: Send {
    /// Release the resource. Called at most once by the registry.
    fn release(&mut self) -> BehaviorResult<()>;

    /// Short description used in logs and release reports.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Aborts a spawned task on release.
pub struct TaskResource {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl TaskResource {
    /// Wrap a task handle.
    pub fn new(name: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            handle: Some(handle),
        }
    }
}

impl Resource for TaskResource {
    fn release(&mut self) -> BehaviorResult<()> {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("task:{}", self.name)
    }
}

/// Runs a closure on release.
pub struct OnRelease<F>
where
    F: FnOnce() -> BehaviorResult<()> + Send,
{
    name: String,
    release_fn: Option<F>,
}

impl<F> OnRelease<F>
where
    F: FnOnce() -> BehaviorResult<()> + Send,
{
    /// Create a resource that runs `release_fn` when released.
    pub fn new(name: impl Into<String>, release_fn: F) -> Self {
        Self {
            name: name.into(),
            release_fn: Some(release_fn),
        }
    }
}

impl<F> Resource for OnRelease<F>
where
    F: FnOnce() -> BehaviorResult<()> + Send,
{
    fn release(&mut self) -> BehaviorResult<()> {
        match self.release_fn.take() {
            Some(release_fn) => release_fn(),
            None => Ok(()),
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// A release that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFailure {
    /// Description of the resource.
    pub resource: String,
    /// The error the resource reported.
    pub error: BehaviorError,
}

/// Outcome of draining a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Number of resources whose release was attempted.
    pub released: usize,
    /// Releases that reported an error.
    pub failures: Vec<ReleaseFailure>,
}

impl ReleaseReport {
    /// Check if every release succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Per-attachment list of resources awaiting release.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: Vec<Box<dyn Resource>>,
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource for release at detach.
    pub fn register(&mut self, resource: Box<dyn Resource>) {
        self.resources.push(resource);
    }

    /// Register a closure to run at detach.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, release_fn: F)
    where
        F: FnOnce() -> BehaviorResult<()> + Send + 'static,
    {
        self.register(Box::new(OnRelease::new(name, release_fn)));
    }

    /// Number of resources awaiting release.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Release every resource in registration order and empty the registry.
    ///
    /// A failing release is recorded and logged; the remaining resources are
    /// still released.
    pub fn release_all(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();

        for mut resource in self.resources.drain(..) {
            report.released += 1;
            if let Err(error) = resource.release() {
                let description = resource.describe();
                tracing::warn!(
                    resource = %description,
                    error = %error,
                    "Failed to release behavior resource"
                );
                report.failures.push(ReleaseFailure {
                    resource: description,
                    error,
                });
            }
        }

        report
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.resources.iter().map(|r| r.describe()))
            .finish()
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        if !self.resources.is_empty() {
            self.release_all();
        }
    }
}
