//! The function graph: nodes keyed by unique name, links between outputs and
//! inputs, and the invocation phase that walks nodes in topological order.

use fiatlight_api_core::{Envelope, FiatError, FiatResult, Value};
use fiatlight_togui::{
    FiatAttributes, FunctionDescriptor, FunctionGui, InternalGui, MarkdownGui, Registry, RunConfig,
    MARKDOWN_LABEL,
};
use hashbrown::HashMap;
use indexmap::IndexMap;

use crate::node::{FunctionNode, InvokeOutcome};
use crate::topo;
use crate::types::{GraphComposition, LinkSpec, NodeName};

#[derive(Debug, Default)]
pub struct FunctionGraph {
    nodes: IndexMap<NodeName, FunctionNode>,
    links: Vec<LinkSpec>,
    /// Envelope each linked input had before its link was added.
    pre_link: HashMap<(NodeName, String), Envelope<Value>>,
    config: RunConfig,
}

impl FunctionGraph {
    pub fn new(config: RunConfig) -> Self {
        FunctionGraph {
            config,
            ..FunctionGraph::default()
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Build a chain where each function's first output feeds the next
    /// function's first input.
    pub fn from_function_composition(
        functions: Vec<FunctionGui>,
        config: RunConfig,
    ) -> FiatResult<Self> {
        let mut graph = FunctionGraph::new(config);
        graph.add_function_composition(functions)?;
        Ok(graph)
    }

    /// Append a chain of functions, linked output 0 → first input.
    pub fn add_function_composition(&mut self, functions: Vec<FunctionGui>) -> FiatResult<Vec<NodeName>> {
        let mut names: Vec<NodeName> = Vec::with_capacity(functions.len());
        for gui in functions {
            let name = self.add_function(gui);
            if let Some(prev) = names.last() {
                let first_input = self.nodes[&name]
                    .gui()
                    .inputs()
                    .first()
                    .map(|p| p.name.clone())
                    .ok_or_else(|| {
                        FiatError::LinkIllegal(format!("`{name}` has no input to chain into"))
                    })?;
                self.add_link(prev, 0, &name, &first_input)?;
            }
            names.push(name);
        }
        Ok(names)
    }

    /// Add a compiled function; returns its node name, deduplicated with
    /// `_2`, `_3`, ... suffixes.
    pub fn add_function(&mut self, mut gui: FunctionGui) -> NodeName {
        let name = self.unique_name(gui.name());
        if name != gui.name() {
            log::debug!("renaming duplicate node `{}` to `{name}`", gui.name());
            gui.set_name(name.clone());
        }
        let node = FunctionNode::new(gui, &self.config);
        self.nodes.insert(name.clone(), node);
        name
    }

    /// Compile `descriptor` and add it.
    pub fn add_descriptor(
        &mut self,
        descriptor: &FunctionDescriptor,
        registry: &Registry,
        attrs: &FiatAttributes,
    ) -> FiatResult<NodeName> {
        let gui = FunctionGui::compile(descriptor, registry, attrs, &self.config)?;
        Ok(self.add_function(gui))
    }

    /// Add a node with no pins whose body is drawn by `gui`. The label
    /// defaults to `name`.
    pub fn add_gui_node(
        &mut self,
        name: &str,
        gui: impl InternalGui + 'static,
        label: Option<&str>,
    ) -> NodeName {
        self.add_function(FunctionGui::gui_only(name, label.map(str::to_string), gui))
    }

    /// Add a markdown note, labelled "Documentation" unless `label` is given.
    pub fn add_markdown_node(&mut self, markdown: MarkdownGui, label: Option<&str>) -> NodeName {
        let label = label.unwrap_or(MARKDOWN_LABEL).to_string();
        self.add_function(FunctionGui::gui_only("markdown", Some(label), markdown))
    }

    fn unique_name(&self, base: &str) -> NodeName {
        if !self.nodes.contains_key(base) {
            return base.to_string();
        }
        (2..)
            .map(|i| format!("{base}_{i}"))
            .find(|candidate| !self.nodes.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn node(&self, name: &str) -> Option<&FunctionNode> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut FunctionNode> {
        self.nodes.get_mut(name)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &FunctionNode> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut FunctionNode> {
        self.nodes.values_mut()
    }

    pub fn function_names(&self) -> Vec<NodeName> {
        self.nodes.keys().cloned().collect()
    }

    pub fn links(&self) -> &[LinkSpec] {
        &self.links
    }

    pub fn is_input_linked(&self, node: &str, input: &str) -> bool {
        self.links
            .iter()
            .any(|l| l.dst_node == node && l.dst_input == input)
    }

    pub fn has_incoming_links(&self, node: &str) -> bool {
        self.links.iter().any(|l| l.dst_node == node)
    }

    /// Link output `src_output` of `src` to input `dst_input` of `dst`.
    pub fn add_link(
        &mut self,
        src: &str,
        src_output: usize,
        dst: &str,
        dst_input: &str,
    ) -> FiatResult<()> {
        let link = LinkSpec::new(src, src_output, dst, dst_input);
        self.check_link(&link)?;

        let envelope = self.nodes[src]
            .output_envelope(src_output)
            .cloned()
            .unwrap_or_default();
        let dst_node = self
            .nodes
            .get_mut(dst)
            .ok_or_else(|| FiatError::LinkIllegal(format!("no node `{dst}`")))?;
        let previous = dst_node
            .input_envelope(dst_input)
            .cloned()
            .unwrap_or_default();
        dst_node.set_input_envelope(dst_input, envelope)?;
        self.pre_link
            .insert((dst.to_string(), dst_input.to_string()), previous);
        log::debug!("linked {src}[{src_output}] -> {dst}.{dst_input}");
        self.links.push(link);
        Ok(())
    }

    fn check_link(&self, link: &LinkSpec) -> FiatResult<()> {
        let illegal = |reason: String| Err(FiatError::LinkIllegal(reason));
        let Some(src) = self.nodes.get(&link.src_node) else {
            return illegal(format!("no node `{}`", link.src_node));
        };
        let Some(dst) = self.nodes.get(&link.dst_node) else {
            return illegal(format!("no node `{}`", link.dst_node));
        };
        let Some(output) = src.gui().output(link.src_output) else {
            return illegal(format!(
                "`{}` has no output {}",
                link.src_node, link.src_output
            ));
        };
        let Some(input) = dst.gui().input(&link.dst_input) else {
            return illegal(format!(
                "`{}` has no input `{}`",
                link.dst_node, link.dst_input
            ));
        };
        if link.src_node == link.dst_node {
            return illegal(format!("`{}` cannot be linked to itself", link.src_node));
        }
        if self.links.contains(link) {
            return illegal(format!(
                "{}[{}] -> {}.{} already exists",
                link.src_node, link.src_output, link.dst_node, link.dst_input
            ));
        }
        if self.is_input_linked(&link.dst_node, &link.dst_input) {
            return illegal(format!(
                "`{}.{}` is already linked",
                link.dst_node, link.dst_input
            ));
        }
        let (src_ty, dst_ty) = (output.handle.ty(), input.handle.ty());
        if !src_ty.is_assignable_to(dst_ty) {
            return illegal(format!(
                "{src_ty} output of `{}` cannot feed {dst_ty} input `{}.{}`",
                link.src_node, link.dst_node, link.dst_input
            ));
        }
        let (count, edges) = self.edges();
        let src_idx = self.index_of(&link.src_node);
        let dst_idx = self.index_of(&link.dst_node);
        if let (Some(s), Some(d)) = (src_idx, dst_idx) {
            if topo::reaches(count, &edges, d, s) {
                return illegal(format!(
                    "linking `{}` to `{}` would create a cycle",
                    link.src_node, link.dst_node
                ));
            }
        }
        Ok(())
    }

    /// Remove a link and give the destination input back its pre-link
    /// envelope.
    pub fn remove_link(
        &mut self,
        src: &str,
        src_output: usize,
        dst: &str,
        dst_input: &str,
    ) -> FiatResult<()> {
        let link = LinkSpec::new(src, src_output, dst, dst_input);
        let pos = self.links.iter().position(|l| *l == link).ok_or_else(|| {
            FiatError::LinkIllegal(format!("no link {src}[{src_output}] -> {dst}.{dst_input}"))
        })?;
        self.links.remove(pos);
        self.restore_pre_link(&link);
        Ok(())
    }

    fn restore_pre_link(&mut self, link: &LinkSpec) {
        let previous = self
            .pre_link
            .remove(&(link.dst_node.clone(), link.dst_input.clone()))
            .unwrap_or_default();
        if let Some(node) = self.nodes.get_mut(&link.dst_node) {
            if let Err(e) = node.set_input_envelope(&link.dst_input, previous) {
                log::warn!("cannot restore {}.{}: {e}", link.dst_node, link.dst_input);
            }
        }
    }

    /// Remove a node, its links, and release its handles.
    pub fn remove_node(&mut self, name: &str) -> FiatResult<()> {
        if !self.nodes.contains_key(name) {
            return Err(FiatError::LinkIllegal(format!("no node `{name}`")));
        }
        let (touching, kept): (Vec<LinkSpec>, Vec<LinkSpec>) = std::mem::take(&mut self.links)
            .into_iter()
            .partition(|l| l.src_node == name || l.dst_node == name);
        self.links = kept;
        for link in touching.iter().filter(|l| l.dst_node != name) {
            self.restore_pre_link(link);
        }
        self.pre_link.retain(|(node, _), _| node != name);
        if let Some(mut node) = self.nodes.shift_remove(name) {
            node.on_exit();
        }
        Ok(())
    }

    /// Set an unlinked input as if the user typed it.
    pub fn set_input(&mut self, node: &str, input: &str, value: Value) -> FiatResult<()> {
        if self.is_input_linked(node, input) {
            return Err(FiatError::LinkIllegal(format!(
                "`{node}.{input}` is driven by a link"
            )));
        }
        self.nodes
            .get_mut(node)
            .ok_or_else(|| FiatError::BadInput(format!("no node `{node}`")))?
            .set_input(input, value)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.get_index_of(name)
    }

    fn edges(&self) -> (usize, Vec<(usize, usize)>) {
        let edges = self
            .links
            .iter()
            .filter_map(|l| Some((self.index_of(&l.src_node)?, self.index_of(&l.dst_node)?)))
            .collect();
        (self.nodes.len(), edges)
    }

    /// Node names in dependency order, ties broken by insertion order.
    pub fn topo_order(&self) -> Vec<NodeName> {
        let (count, edges) = self.edges();
        match topo::topo_order(count, &edges) {
            Ok(order) => order
                .into_iter()
                .filter_map(|idx| self.nodes.get_index(idx).map(|(name, _)| name.clone()))
                .collect(),
            Err(e) => {
                // add_link refuses cycles, so this is unreachable in practice.
                log::warn!("{e}; falling back to insertion order");
                self.function_names()
            }
        }
    }

    /// Copy the outputs of `name` into every input linked to them.
    fn propagate(&mut self, name: &str) {
        let targets: Vec<(LinkSpec, Envelope<Value>)> = self
            .links
            .iter()
            .filter(|l| l.src_node == name)
            .map(|l| {
                let env = self.nodes[name]
                    .output_envelope(l.src_output)
                    .cloned()
                    .unwrap_or_default();
                (l.clone(), env)
            })
            .collect();
        for (link, envelope) in targets {
            if let Some(dst) = self.nodes.get_mut(&link.dst_node) {
                if let Err(e) = dst.set_input_envelope(&link.dst_input, envelope) {
                    log::warn!("cannot propagate to {}.{}: {e}", link.dst_node, link.dst_input);
                }
            }
        }
    }

    fn invoke_and_propagate(&mut self, name: &str) -> FiatResult<InvokeOutcome> {
        let outcome = match self.nodes.get_mut(name) {
            Some(node) => node.invoke(),
            None => return Ok(InvokeOutcome::Skipped),
        };
        self.propagate_if_changed(name);
        outcome
    }

    fn propagate_if_changed(&mut self, name: &str) {
        let changed = self
            .nodes
            .get_mut(name)
            .is_some_and(FunctionNode::take_outputs_changed);
        if changed {
            self.propagate(name);
        }
    }

    /// Invocation phase: in topological order, invoke every node that wants
    /// it and push its outputs downstream. Each node runs at most once.
    /// Returns the number of nodes invoked.
    pub fn run_pending(&mut self) -> FiatResult<usize> {
        let mut invoked = 0;
        for name in self.topo_order() {
            let wants = self
                .nodes
                .get(&name)
                .is_some_and(FunctionNode::wants_invocation);
            if !wants {
                continue;
            }
            if self.invoke_and_propagate(&name)? != InvokeOutcome::Skipped {
                invoked += 1;
            }
        }
        Ok(invoked)
    }

    /// Invoke every node without incoming links, then propagate.
    pub fn invoke_top_leaves(&mut self) -> FiatResult<usize> {
        let leaves: Vec<NodeName> = self
            .topo_order()
            .into_iter()
            .filter(|n| !self.has_incoming_links(n))
            .collect();
        for name in &leaves {
            if let Some(node) = self.nodes.get_mut(name) {
                node.set_dirty();
            }
        }
        self.run_pending()
    }

    /// Merge async results and run handle heartbeats. Returns whether
    /// anything needs a redraw.
    pub fn heartbeat(&mut self) -> FiatResult<bool> {
        let mut refresh = false;
        let mut failure = None;
        for name in self.topo_order() {
            let Some(node) = self.nodes.get_mut(&name) else {
                continue;
            };
            match node.heartbeat() {
                Ok(r) => refresh |= r,
                Err(e) => failure = failure.or(Some(e)),
            }
            self.propagate_if_changed(&name);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(refresh),
        }
    }

    pub fn is_any_running_async(&self) -> bool {
        self.nodes.values().any(FunctionNode::is_running_async)
    }

    pub fn shall_display_refresh_needed_label(&self) -> bool {
        self.nodes
            .values()
            .any(FunctionNode::shall_display_refresh_needed_label)
    }

    /// Add every node and link of `other`, renaming clashing nodes.
    pub fn merge_graph(&mut self, other: FunctionGraph) -> FiatResult<HashMap<NodeName, NodeName>> {
        let FunctionGraph { nodes, links, .. } = other;
        let mut renamed = HashMap::new();
        for (old_name, node) in nodes {
            let new_name = self.unique_name(&old_name);
            let mut node = node;
            node.gui_mut().set_name(new_name.clone());
            self.nodes.insert(new_name.clone(), node);
            renamed.insert(old_name, new_name);
        }
        for link in links {
            let (Some(src), Some(dst)) = (renamed.get(&link.src_node), renamed.get(&link.dst_node))
            else {
                continue;
            };
            let (src, dst) = (src.clone(), dst.clone());
            self.add_link(&src, link.src_output, &dst, &link.dst_input)?;
        }
        Ok(renamed)
    }

    /// Names and links, as saved in a composition file.
    pub fn composition(&self) -> GraphComposition {
        GraphComposition {
            functions_names: self.function_names(),
            functions_nodes_links: self.links.clone(),
        }
    }

    /// Rebuild a graph from a composition. `factory` maps each saved name to
    /// a compiled function.
    pub fn from_composition(
        composition: &GraphComposition,
        config: RunConfig,
        factory: impl Fn(&str) -> Option<FunctionGui>,
    ) -> FiatResult<Self> {
        let mut graph = FunctionGraph::new(config);
        for name in &composition.functions_names {
            let mut gui = factory(name).ok_or_else(|| {
                FiatError::PersistFailure(format!("no function registered for `{name}`"))
            })?;
            gui.set_name(name.clone());
            let added = graph.add_function(gui);
            if added != *name {
                return Err(FiatError::PersistFailure(format!(
                    "duplicate function name `{name}` in composition"
                )));
            }
        }
        for link in &composition.functions_nodes_links {
            graph.add_link(&link.src_node, link.src_output, &link.dst_node, &link.dst_input)?;
        }
        Ok(graph)
    }

    /// Wait for every in-flight async invocation, merging results.
    pub fn wait_async(&mut self, timeout: std::time::Duration) -> FiatResult<bool> {
        let deadline = std::time::Instant::now() + timeout;
        while self.is_any_running_async() {
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
            self.heartbeat()?;
        }
        self.heartbeat()?;
        Ok(true)
    }

    pub fn on_exit(&mut self) {
        for node in self.nodes.values_mut() {
            node.on_exit();
        }
    }
}
