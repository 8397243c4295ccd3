use std::any::{Any, type_name};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::error::RouterError;
use crate::request::RestRequest;

struct ContextObject {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// The state of matching one request against a route tree.
///
/// Routes consume a prefix of [`remaining`](Self::remaining), push what they matched onto
/// [`resources`](Self::resources) and may push objects for the handlers below them. Every
/// route attempt runs under a [`StateGuard`], so a failed attempt leaves nothing behind.
pub struct ParsingContext {
    resources: Vec<String>,
    remaining: String,
    objects: Vec<ContextObject>,
}

/// What a [`StateGuard`] restores.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Checkpoint {
    resources: usize,
    remaining: String,
    objects: usize,
}

impl ParsingContext {
    pub fn new(request: &RestRequest) -> Self {
        Self::for_path(&request.resource)
    }

    pub fn for_path(path: &str) -> Self {
        Self { resources: Vec::new(), remaining: path.to_string(), objects: Vec::new() }
    }

    /// The path segments matched so far, in order.
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn last_resource(&self) -> Option<&str> {
        self.resources.last().map(String::as_str)
    }

    /// The part of the path no route has consumed yet.
    pub fn remaining(&self) -> &str {
        &self.remaining
    }

    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }

    /// Records a match of `consumed` bytes of the remaining path.
    pub(crate) fn consume(&mut self, resources: Vec<String>, consumed: usize) {
        self.resources.extend(resources);
        self.remaining.drain(..consumed);
    }

    pub fn add_object<T: Any + Send + Sync>(&mut self, object: T) {
        self.add_shared(Arc::new(object));
    }

    pub fn add_shared<T: Any + Send + Sync>(&mut self, object: Arc<T>) {
        self.objects.push(ContextObject { value: object, type_name: type_name::<T>() });
    }

    /// The object at `index`; negative indexes count from the most recent one (`-1`).
    pub fn object_as<T: Any>(&self, index: isize) -> Result<&T, RouterError> {
        let object = self.object_at(index)?;
        object.value.downcast_ref::<T>().ok_or(RouterError::ObjectType { index, expected: type_name::<T>(), actual: object.type_name })
    }

    /// Like [`object_as`](Self::object_as), but hands out a shared handle.
    pub fn shared_as<T: Any + Send + Sync>(&self, index: isize) -> Result<Arc<T>, RouterError> {
        let object = self.object_at(index)?;
        Arc::clone(&object.value).downcast::<T>().map_err(|_other| RouterError::ObjectType { index, expected: type_name::<T>(), actual: object.type_name })
    }

    fn object_at(&self, index: isize) -> Result<&ContextObject, RouterError> {
        let len = self.objects.len();
        let position = if index < 0 { len.checked_sub(index.unsigned_abs()) } else { Some(index.unsigned_abs()) };
        position.and_then(|position| self.objects.get(position)).ok_or(RouterError::InvalidObject { index, len })
    }

    /// Saves the current state; it is restored when the guard is dropped.
    pub fn guard(&mut self) -> StateGuard<'_> {
        let checkpoint = self.checkpoint();
        StateGuard { context: self, checkpoint }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint { resources: self.resources.len(), remaining: self.remaining.clone(), objects: self.objects.len() }
    }

    fn restore(&mut self, checkpoint: &Checkpoint) {
        self.resources.truncate(checkpoint.resources);
        self.objects.truncate(checkpoint.objects);
        self.remaining.clone_from(&checkpoint.remaining);
    }
}

impl fmt::Debug for ParsingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let objects: Vec<_> = self.objects.iter().map(|object| object.type_name).collect();
        f.debug_struct("ParsingContext").field("resources", &self.resources).field("remaining", &self.remaining).field("objects", &objects).finish()
    }
}

/// Restores a [`ParsingContext`] to the state it had when the guard was taken.
///
/// Dereferences to the context, so matching code works through the guard.
pub struct StateGuard<'a> {
    context: &'a mut ParsingContext,
    checkpoint: Checkpoint,
}

impl Deref for StateGuard<'_> {
    type Target = ParsingContext;

    fn deref(&self) -> &ParsingContext {
        self.context
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut ParsingContext {
        self.context
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.context.restore(&self.checkpoint);
    }
}

impl fmt::Debug for StateGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateGuard").field("context", &self.context).field("checkpoint", &self.checkpoint).finish()
    }
}
