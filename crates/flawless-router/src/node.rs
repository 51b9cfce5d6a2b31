//! Segment trie node.
//!
//! Each node stands for one path segment level. A node has sorted static
//! children, at most one parameter child and at most one wildcard child.
//! Wildcard children never have children of their own.

use crate::error::RouteError;
use crate::method_router::MethodRouter;
use crate::params::Params;
use crate::route::{Route, Segment};
use http::Method;
use std::sync::Arc;

/// Type of path segment a node matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SegmentKind {
    Static,
    Param(String),
    Wildcard(String),
}

/// Result of walking the trie for one request.
pub(crate) enum Lookup<'n, E> {
    Found(&'n Arc<Route<E>>, Params),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

pub(crate) struct Node<E> {
    segment: String,
    kind: SegmentKind,
    methods: MethodRouter<Arc<Route<E>>>,
    static_children: Vec<Node<E>>,
    param_child: Option<Box<Node<E>>>,
    wildcard_child: Option<Box<Node<E>>>,
}

impl<E> Clone for Node<E> {
    fn clone(&self) -> Self {
        Self {
            segment: self.segment.clone(),
            kind: self.kind.clone(),
            methods: self.methods.clone(),
            static_children: self.static_children.clone(),
            param_child: self.param_child.clone(),
            wildcard_child: self.wildcard_child.clone(),
        }
    }
}

impl<E> Node<E> {
    fn new(segment: String, kind: SegmentKind) -> Self {
        Self {
            segment,
            kind,
            methods: MethodRouter::new(),
            static_children: Vec::new(),
            param_child: None,
            wildcard_child: None,
        }
    }

    pub(crate) fn root() -> Self {
        Self::new(String::new(), SegmentKind::Static)
    }

    fn from_segment(segment: &Segment) -> Self {
        match segment {
            Segment::Static(text) => Self::new(text.clone(), SegmentKind::Static),
            Segment::Param(name) => Self::new(segment.to_string(), SegmentKind::Param(name.clone())),
            Segment::Wildcard(name) => {
                Self::new(segment.to_string(), SegmentKind::Wildcard(name.clone()))
            }
        }
    }

    /// Checks whether `route` can be inserted without touching the trie.
    ///
    /// A route conflicts when the same method is already registered for the
    /// same shape, or when a parameter or wildcard at the same position uses
    /// a different capture name.
    pub(crate) fn check_insert(&self, route: &Route<E>) -> Result<(), RouteError> {
        let conflict = |existing: &str| RouteError::Conflict {
            method: route.method().clone(),
            pattern: route.pattern().to_string(),
            existing: existing.to_string(),
        };

        let mut node = self;
        for segment in route.segments() {
            let next = match segment {
                Segment::Static(text) => node.find_static_child(text),
                Segment::Param(name) => match node.param_child.as_deref() {
                    Some(child) if child.kind != SegmentKind::Param(name.clone()) => {
                        return Err(conflict(child.any_pattern().unwrap_or(&child.segment)));
                    }
                    child => child,
                },
                Segment::Wildcard(name) => match node.wildcard_child.as_deref() {
                    Some(child) if child.kind != SegmentKind::Wildcard(name.clone()) => {
                        return Err(conflict(child.any_pattern().unwrap_or(&child.segment)));
                    }
                    child => child,
                },
            };
            match next {
                Some(child) => node = child,
                None => return Ok(()),
            }
        }

        match node.methods.get(route.method()) {
            Some(existing) => Err(conflict(existing.pattern())),
            None => Ok(()),
        }
    }

    /// Inserts a route that already passed [`Node::check_insert`].
    pub(crate) fn insert(&mut self, route: Arc<Route<E>>) {
        let mut node = self;
        for segment in route.segments() {
            node = match segment {
                Segment::Static(text) => {
                    let index = match node
                        .static_children
                        .binary_search_by(|c| c.segment.as_str().cmp(text))
                    {
                        Ok(index) => index,
                        Err(index) => {
                            node.static_children.insert(index, Self::from_segment(segment));
                            index
                        }
                    };
                    &mut node.static_children[index]
                }
                Segment::Param(_) => node
                    .param_child
                    .get_or_insert_with(|| Box::new(Self::from_segment(segment))),
                Segment::Wildcard(_) => node
                    .wildcard_child
                    .get_or_insert_with(|| Box::new(Self::from_segment(segment))),
            };
        }
        let method = route.method().clone();
        let _ = node.methods.insert(method, route);
    }

    /// Resolves decoded request segments for `method`.
    ///
    /// The walk is depth-first and tries static, then parameter, then
    /// wildcard children at every level, backtracking when a branch cannot
    /// consume the rest of the path. The first terminal that carries `method`
    /// wins. If terminals matched the path but none carried `method`, the
    /// union of their methods is reported, in precedence order.
    pub(crate) fn lookup<'n>(&'n self, method: &Method, segments: &[String]) -> Lookup<'n, E> {
        let mut params = Params::new();
        let mut allowed = Vec::new();
        match self.match_segments(method, segments, &mut params, &mut allowed) {
            Some(route) => Lookup::Found(route, params),
            None if !allowed.is_empty() => Lookup::MethodNotAllowed(allowed),
            None => Lookup::NotFound,
        }
    }

    fn match_segments<'n>(
        &'n self,
        method: &Method,
        segments: &[String],
        params: &mut Params,
        allowed: &mut Vec<Method>,
    ) -> Option<&'n Arc<Route<E>>> {
        let Some((segment, remaining)) = segments.split_first() else {
            return self.terminal(method, allowed);
        };

        if let Some(child) = self.find_static_child(segment) {
            if let Some(route) = child.match_segments(method, remaining, params, allowed) {
                return Some(route);
            }
        }

        if let Some(child) = &self.param_child {
            if let SegmentKind::Param(name) = &child.kind {
                let mark = params.len();
                params.push(name.clone(), segment.clone());
                if let Some(route) = child.match_segments(method, remaining, params, allowed) {
                    return Some(route);
                }
                params.truncate(mark);
            }
        }

        if let Some(child) = &self.wildcard_child {
            if let SegmentKind::Wildcard(name) = &child.kind {
                if let Some(route) = child.terminal(method, allowed) {
                    params.push(name.clone(), segments.join("/"));
                    return Some(route);
                }
            }
        }

        None
    }

    fn terminal<'n>(
        &'n self,
        method: &Method,
        allowed: &mut Vec<Method>,
    ) -> Option<&'n Arc<Route<E>>> {
        let found = self.methods.get(method);
        if found.is_none() {
            for (candidate, _) in self.methods.iter() {
                if !allowed.contains(candidate) {
                    allowed.push(candidate.clone());
                }
            }
        }
        found
    }

    fn find_static_child(&self, segment: &str) -> Option<&Self> {
        self.static_children
            .binary_search_by(|c| c.segment.as_str().cmp(segment))
            .ok()
            .map(|i| &self.static_children[i])
    }

    /// Returns some pattern registered at or below this node.
    fn any_pattern(&self) -> Option<&str> {
        if let Some(route) = self.methods.first() {
            return Some(route.pattern());
        }
        self.static_children
            .iter()
            .chain(self.param_child.as_deref())
            .chain(self.wildcard_child.as_deref())
            .find_map(Self::any_pattern)
    }
}
