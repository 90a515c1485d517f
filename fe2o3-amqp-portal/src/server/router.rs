//! Slash-segmented routing of request paths to handler nodes.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use parking_lot::Mutex;

use super::{mutex::MutexSet, Request, Response};
use crate::operation::Operation;

/// Boxed future returned by a route handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A registered route handler.
pub(crate) type RouteHandler = Arc<dyn Fn(Request, Response) -> HandlerFuture + Send + Sync>;

/// Splits a path into its non-empty segments. Leading, trailing and
/// doubled slashes contribute empty segments, which are ignored on both
/// insert and lookup.
fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Per-path registration of per-verb handlers and the path's mutex set.
pub(crate) struct HandlerNode {
    handlers: HashMap<Operation, Vec<RouteHandler>>,
    pub(crate) mutexes: Mutex<MutexSet>,
}

impl HandlerNode {
    fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            mutexes: Mutex::new(MutexSet::default()),
        }
    }

    /// Appends a handler for the operation. Handlers run in registration
    /// order.
    pub(crate) fn add_handler(&mut self, op: Operation, handler: RouteHandler) {
        self.handlers.entry(op).or_default().push(handler);
    }

    /// Clones out the handler list for an operation.
    pub(crate) fn handlers_for(&self, op: Operation) -> Vec<RouteHandler> {
        self.handlers.get(&op).cloned().unwrap_or_default()
    }
}

#[derive(Default)]
struct PathNode {
    children: HashMap<String, PathNode>,
    node: Option<HandlerNode>,
}

/// Prefix tree from request paths to handler nodes.
///
/// Segments are compared byte-exact and walked front to back. Lookup
/// returns the node registered at the exact terminal segment only; there
/// is no wildcard or longest-prefix matching.
#[derive(Default)]
pub(crate) struct Router {
    root: PathNode,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the handler node at `path`, creating the node (and any
    /// intermediate path nodes) if absent.
    pub(crate) fn at(&mut self, path: &str) -> &mut HandlerNode {
        let mut current = &mut self.root;
        for segment in segments(path) {
            current = current.children.entry(segment.to_string()).or_default();
        }
        current.node.get_or_insert_with(HandlerNode::new)
    }

    /// Looks up the handler node registered at exactly `path`.
    pub(crate) fn lookup(&self, path: &str) -> Option<&HandlerNode> {
        let mut current = &self.root;
        for segment in segments(path) {
            current = current.children.get(segment)?;
        }
        current.node.as_ref()
    }
}
