//! Element graph
//!
//! A [`Pipeline`] owns its elements and the links between their pads. Each
//! src pad feeds at most one sink pad, and links that would close a cycle are
//! rejected, so a buffer never revisits an element within one push.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::media::BufferId;

use super::element::{BufferMessage, Element, ElementConfig, PadOutput};

/// Handle to an element inside a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(usize);

struct Node {
    element: Box<dyn Element>,
    initialized: bool,
}

/// Lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Elements can be added, linked and configured
    Building,
    /// Buffers can be pushed
    Running,
    /// Every element has been finalized
    Finalized,
}

/// Directed graph of processing elements
pub struct Pipeline {
    name: String,
    nodes: Vec<Node>,
    /// (element, src pad) -> (element, sink pad)
    links: HashMap<(usize, &'static str), (usize, &'static str)>,
    state: PipelineState,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            links: HashMap::new(),
            state: PipelineState::Building,
        }
    }

    /// Pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the pipeline has no elements
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add an element
    pub fn add(&mut self, element: Box<dyn Element>) -> Result<ElementId> {
        self.expect_state(PipelineState::Building)?;
        if self.find(element.name()).is_some() {
            return Err(Error::Pipeline(format!(
                "element '{}' already exists in '{}'",
                element.name(),
                self.name
            )));
        }
        self.nodes.push(Node {
            element,
            initialized: false,
        });
        Ok(ElementId(self.nodes.len() - 1))
    }

    /// Look up an element by name
    pub fn find(&self, name: &str) -> Option<ElementId> {
        self.nodes
            .iter()
            .position(|n| n.element.name() == name)
            .map(ElementId)
    }

    /// Connect `from`'s src pad to `to`'s sink pad
    pub fn link(&mut self, from: ElementId, src_pad: &str, to: ElementId, sink_pad: &str) -> Result<()> {
        self.expect_state(PipelineState::Building)?;

        let src = self.node(from)?;
        let src_pad = src
            .element
            .src_pads()
            .iter()
            .copied()
            .find(|p| *p == src_pad)
            .ok_or_else(|| {
                Error::Pipeline(format!("'{}' has no src pad '{src_pad}'", src.element.name()))
            })?;

        let dst = self.node(to)?;
        let sink_pad = dst
            .element
            .sink_pads()
            .iter()
            .copied()
            .find(|p| *p == sink_pad)
            .ok_or_else(|| {
                Error::Pipeline(format!("'{}' has no sink pad '{sink_pad}'", dst.element.name()))
            })?;

        if self.links.contains_key(&(from.0, src_pad)) {
            return Err(Error::Pipeline(format!(
                "src pad '{src_pad}' of '{}' is already linked",
                self.nodes[from.0].element.name()
            )));
        }
        if self.links.values().any(|&(e, p)| e == to.0 && p == sink_pad) {
            return Err(Error::Pipeline(format!(
                "sink pad '{sink_pad}' of '{}' is already linked",
                self.nodes[to.0].element.name()
            )));
        }
        if from == to || self.reaches(to.0, from.0) {
            return Err(Error::Pipeline(format!(
                "linking '{}' -> '{}' would create a cycle",
                self.nodes[from.0].element.name(),
                self.nodes[to.0].element.name()
            )));
        }

        self.links.insert((from.0, src_pad), (to.0, sink_pad));
        Ok(())
    }

    /// Configure one element
    pub fn configure(&mut self, id: ElementId, config: &ElementConfig) -> Result<()> {
        self.expect_state(PipelineState::Building)?;
        let name = self.name.clone();
        let node = self.node_mut(id)?;
        node.element.init(config)?;
        node.initialized = true;
        tracing::debug!(pipeline = %name, element = node.element.name(), "Element configured");
        Ok(())
    }

    /// Start accepting buffers.
    ///
    /// Fails if any element has not been configured successfully.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state(PipelineState::Building)?;
        if let Some(node) = self.nodes.iter().find(|n| !n.initialized) {
            return Err(Error::Pipeline(format!(
                "element '{}' in '{}' is not configured",
                node.element.name(),
                self.name
            )));
        }
        self.state = PipelineState::Running;
        tracing::info!(pipeline = %self.name, elements = self.nodes.len(), "Pipeline started");
        Ok(())
    }

    /// Push a buffer into `id`'s sink pad and follow links until every
    /// produced buffer has been consumed.
    ///
    /// Buffers pushed on an unlinked src pad are released.
    pub fn push(&mut self, id: ElementId, sink_pad: &str, message: BufferMessage) -> Result<()> {
        self.expect_state(PipelineState::Running)?;
        self.node(id)?;

        let mut queue: VecDeque<(usize, String, BufferMessage)> = VecDeque::new();
        queue.push_back((id.0, sink_pad.to_string(), message));
        let mut out = PadOutput::default();

        while let Some((index, pad, message)) = queue.pop_front() {
            self.nodes[index]
                .element
                .process_chain(&pad, message, &mut out)?;

            for (src_pad, produced) in out.drain() {
                match self.links.get(&(index, src_pad)) {
                    Some(&(next, next_pad)) => {
                        queue.push_back((next, next_pad.to_string(), produced));
                    }
                    None => {
                        tracing::trace!(
                            pipeline = %self.name,
                            element = self.nodes[index].element.name(),
                            pad = src_pad,
                            buffer = %produced.buffer.id(),
                            "Releasing buffer pushed on unlinked pad"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Ask an element to release what it holds against a buffer
    pub fn recycle(&mut self, id: ElementId, buffer: BufferId) -> Result<()> {
        self.node_mut(id)?.element.recycle(buffer);
        Ok(())
    }

    /// Drive internal work of every element
    pub fn handle_process(&mut self) -> Result<()> {
        self.expect_state(PipelineState::Running)?;
        for node in &mut self.nodes {
            node.element.handle_process()?;
        }
        Ok(())
    }

    /// Finalize every element in insertion order.
    ///
    /// All elements are finalized even if one fails; the first error is
    /// returned. Calling this again is a no-op.
    pub fn finalize(&mut self) -> Result<()> {
        if self.state == PipelineState::Finalized {
            return Ok(());
        }
        self.state = PipelineState::Finalized;

        let mut first_error = None;
        for node in &mut self.nodes {
            if let Err(e) = node.element.finalize() {
                tracing::warn!(
                    pipeline = %self.name,
                    element = node.element.name(),
                    error = %e,
                    "Element finalize failed"
                );
                first_error.get_or_insert(e);
            }
        }
        tracing::info!(pipeline = %self.name, "Pipeline finalized");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn node(&self, id: ElementId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| Error::Pipeline(format!("no element #{} in '{}'", id.0, self.name)))
    }

    fn node_mut(&mut self, id: ElementId) -> Result<&mut Node> {
        let name = &self.name;
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| Error::Pipeline(format!("no element #{} in '{name}'", id.0)))
    }

    fn expect_state(&self, expected: PipelineState) -> Result<()> {
        if self.state != expected {
            return Err(Error::Pipeline(format!(
                "pipeline '{}' is {:?}, expected {:?}",
                self.name, self.state, expected
            )));
        }
        Ok(())
    }

    /// Whether `target` is reachable from `start` along existing links
    fn reaches(&self, start: usize, target: usize) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            stack.extend(
                self.links
                    .iter()
                    .filter(|((from, _), _)| *from == node)
                    .map(|(_, (to, _))| *to),
            );
        }
        false
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.state != PipelineState::Finalized {
            let _ = self.finalize();
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("elements", &self.nodes.len())
            .field("links", &self.links.len())
            .field("state", &self.state)
            .finish()
    }
}
