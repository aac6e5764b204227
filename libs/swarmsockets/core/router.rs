//! Event router: per-kind prefix trees over dot-delimited event names
//!
//! The router keeps one tree per message kind (text, binary). A node holds
//! literal children, at most one `:name` parameter child, and at most one
//! `*name` catch-all terminal. Matching is deterministic: literal children
//! are tried first, then the parameter child, then the catch-all; the
//! first full match wins.
//!
//! Trees are built once before serving begins, so malformed registrations
//! (conflicting parameter names at the same position, duplicate terminals,
//! oversized handler chains) are startup-time panics rather than runtime
//! errors.

use crate::core::context::ABORT_INDEX;
use crate::core::message::EventKind;
use crate::traits::handler::HandlerChain;
use std::collections::HashMap;

/// A single captured path parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: String,
}

/// Parameters captured while matching an event path
pub type Params = Vec<Param>;

#[derive(Default)]
struct Node {
    literals: HashMap<String, Node>,
    param_name: Option<String>,
    param: Option<Box<Node>>,
    catch_all: Option<(String, HandlerChain)>,
    chain: Option<HandlerChain>,
}

/// Prefix tree for one message kind
#[derive(Default)]
pub struct Tree {
    root: Node,
}

impl Tree {
    /// Insert a handler chain for an event path. Panics on configuration
    /// errors; route trees are immutable once serving starts.
    pub fn add_route(&mut self, path: &str, chain: HandlerChain) {
        assert!(!path.is_empty(), "event path must not be empty");
        assert!(
            chain.len() < ABORT_INDEX as usize,
            "too many handlers registered for event path '{path}'"
        );

        let segments: Vec<&str> = path.split('.').collect();
        let last = segments.len() - 1;
        let mut node = &mut self.root;

        for (i, segment) in segments.iter().enumerate() {
            assert!(
                !segment.is_empty(),
                "empty segment in event path '{path}'"
            );

            if let Some(name) = segment.strip_prefix(':') {
                assert!(!name.is_empty(), "unnamed parameter in event path '{path}'");
                if let Some(existing) = &node.param_name {
                    assert!(
                        existing == name,
                        "conflicting parameter name ':{name}' in event path '{path}' \
                         (already registered as ':{existing}')"
                    );
                }
                node.param_name = Some(name.to_string());
                node = node.param.get_or_insert_with(Default::default).as_mut();
            } else if let Some(name) = segment.strip_prefix('*') {
                assert!(!name.is_empty(), "unnamed catch-all in event path '{path}'");
                assert!(
                    i == last,
                    "catch-all must be the final segment of event path '{path}'"
                );
                assert!(
                    node.catch_all.is_none(),
                    "handlers already registered for catch-all '{path}'"
                );
                node.catch_all = Some((name.to_string(), chain));
                return;
            } else {
                node = node.literals.entry(segment.to_string()).or_default();
            }
        }

        assert!(
            node.chain.is_none(),
            "handlers already registered for event path '{path}'"
        );
        node.chain = Some(chain);
    }

    /// Match an event path, returning the handler chain and any captured
    /// parameters. `None` means no route; callers fall back to the
    /// engine's no-route chain.
    pub fn get_value(&self, path: &str) -> Option<(HandlerChain, Params)> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut params = Params::new();
        let chain = Self::walk(&self.root, &segments, 0, &mut params)?;
        Some((chain, params))
    }

    fn walk(node: &Node, segments: &[&str], i: usize, params: &mut Params) -> Option<HandlerChain> {
        if i == segments.len() {
            return node.chain.clone();
        }

        // Literal match takes precedence.
        if let Some(child) = node.literals.get(segments[i]) {
            let mark = params.len();
            if let Some(chain) = Self::walk(child, segments, i + 1, params) {
                return Some(chain);
            }
            params.truncate(mark);
        }

        // Then the parameter child, capturing this segment.
        if let (Some(name), Some(child)) = (&node.param_name, &node.param) {
            let mark = params.len();
            params.push(Param {
                key: name.clone(),
                value: segments[i].to_string(),
            });
            if let Some(chain) = Self::walk(child, segments, i + 1, params) {
                return Some(chain);
            }
            params.truncate(mark);
        }

        // Finally the catch-all, consuming the remainder of the path.
        if let Some((name, chain)) = &node.catch_all {
            params.push(Param {
                key: name.clone(),
                value: segments[i..].join("."),
            });
            return Some(chain.clone());
        }

        None
    }
}

/// Per-kind route trees (one for text frames, one for binary frames)
#[derive(Default)]
pub struct Router {
    text: Tree,
    binary: Tree,
}

impl Router {
    pub fn add_route(&mut self, kind: EventKind, path: &str, chain: HandlerChain) {
        match kind {
            EventKind::Text => self.text.add_route(path, chain),
            EventKind::Binary => self.binary.add_route(path, chain),
        }
    }

    pub fn lookup(&self, kind: EventKind, path: &str) -> Option<(HandlerChain, Params)> {
        match kind {
            EventKind::Text => self.text.get_value(path),
            EventKind::Binary => self.binary.get_value(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::handler::{chain_from, EventHandler};
    use std::sync::Arc;

    fn noop_chain(len: usize) -> HandlerChain {
        let handler: EventHandler = Arc::new(|_ctx| {});
        chain_from(&vec![handler; len])
    }

    #[test]
    fn literal_match_returns_empty_params() {
        let mut tree = Tree::default();
        tree.add_route("node.register", noop_chain(1));

        let (chain, params) = tree.get_value("node.register").unwrap();
        assert_eq!(chain.len(), 1);
        assert!(params.is_empty());
    }

    #[test]
    fn literal_beats_parameter_branch() {
        let mut tree = Tree::default();
        tree.add_route("a.b", noop_chain(1));
        tree.add_route("a.:x", noop_chain(2));

        // Exact literal always resolves to the literal terminal.
        let (chain, params) = tree.get_value("a.b").unwrap();
        assert_eq!(chain.len(), 1);
        assert!(params.is_empty());

        // Everything else lands on the parameter branch.
        let (chain, params) = tree.get_value("a.c").unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(params, vec![Param { key: "x".into(), value: "c".into() }]);
    }

    #[test]
    fn parameter_backtracks_to_catch_all() {
        let mut tree = Tree::default();
        tree.add_route("log.:spider.tail", noop_chain(1));
        tree.add_route("log.*rest", noop_chain(2));

        let (chain, params) = tree.get_value("log.crawler-7.tail").unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(params[0].value, "crawler-7");

        // Deeper path cannot complete the parameter branch; the catch-all
        // absorbs the remainder.
        let (chain, params) = tree.get_value("log.crawler-7.tail.gz").unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(params[0].key, "rest");
        assert_eq!(params[0].value, "crawler-7.tail.gz");
    }

    #[test]
    fn multiple_parameters_capture_in_order() {
        let mut tree = Tree::default();
        tree.add_route("node.:id.task.:task", noop_chain(1));

        let (_, params) = tree.get_value("node.n1.task.crawl").unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], Param { key: "id".into(), value: "n1".into() });
        assert_eq!(params[1], Param { key: "task".into(), value: "crawl".into() });
    }

    #[test]
    fn miss_returns_none() {
        let mut tree = Tree::default();
        tree.add_route("node.register", noop_chain(1));
        assert!(tree.get_value("node").is_none());
        assert!(tree.get_value("node.register.extra").is_none());
        assert!(tree.get_value("ghost").is_none());
    }

    #[test]
    fn trees_are_per_kind() {
        let mut router = Router::default();
        router.add_route(EventKind::Text, "echo", noop_chain(1));
        assert!(router.lookup(EventKind::Text, "echo").is_some());
        assert!(router.lookup(EventKind::Binary, "echo").is_none());
    }

    #[test]
    #[should_panic(expected = "conflicting parameter name")]
    fn conflicting_param_names_panic() {
        let mut tree = Tree::default();
        tree.add_route("node.:id.status", noop_chain(1));
        tree.add_route("node.:name.stats", noop_chain(1));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_terminal_panics() {
        let mut tree = Tree::default();
        tree.add_route("node.register", noop_chain(1));
        tree.add_route("node.register", noop_chain(1));
    }

    #[test]
    #[should_panic(expected = "catch-all must be the final segment")]
    fn catch_all_must_be_last() {
        let mut tree = Tree::default();
        tree.add_route("log.*rest.tail", noop_chain(1));
    }

    #[test]
    #[should_panic(expected = "too many handlers")]
    fn oversized_chain_panics() {
        let mut tree = Tree::default();
        tree.add_route("echo", noop_chain(ABORT_INDEX as usize));
    }
}
