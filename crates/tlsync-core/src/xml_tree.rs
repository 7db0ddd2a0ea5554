//! Minimal mutable XML element tree.
//!
//! Elements live in an arena and are addressed by [`NodeId`]. The tree keeps
//! element names, attributes, text and child order. Comments, processing
//! instructions and whitespace between elements are dropped on parse; the
//! serializer re-indents every element so repeated writes are byte-identical.
//! An element holds either text or child elements: text mixed with children
//! is kept on parse but not written back.

use std::fmt::Write as _;

use quick_xml::Reader;
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>";
const INDENT: &str = "  ";

pub type NodeId = usize;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error(transparent)]
    Syntax(#[from] quick_xml::Error),
    #[error("{0}")]
    Structure(String),
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct XmlTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl XmlTree {
    /// Create a tree holding only an empty root element.
    pub fn new(root_name: &str) -> Self {
        Self {
            nodes: vec![Node::new(root_name)],
            root: 0,
        }
    }

    pub fn parse(source: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(source);
        reader.config_mut().trim_text(false);

        let mut nodes: Vec<Node> = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut root: Option<NodeId> = None;

        loop {
            match reader.read_event()? {
                Event::Start(element) => {
                    let id = open_element(&mut nodes, &stack, &mut root, &element)?;
                    stack.push(id);
                }
                Event::Empty(element) => {
                    open_element(&mut nodes, &stack, &mut root, &element)?;
                }
                Event::End(_) => {
                    let id = stack
                        .pop()
                        .ok_or_else(|| XmlError::Structure("unexpected closing tag".into()))?;
                    let node = &mut nodes[id];
                    if !node.children.is_empty()
                        && node.text.as_deref().is_some_and(|t| t.trim().is_empty())
                    {
                        node.text = None;
                    }
                }
                Event::Text(text) => {
                    if let Some(&current) = stack.last() {
                        append_text(&mut nodes[current], &text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(&current) = stack.last() {
                        let raw = data.into_inner();
                        let text = std::str::from_utf8(&raw)
                            .map_err(|err| XmlError::Structure(err.to_string()))?;
                        append_text(&mut nodes[current], text);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Structure("unexpected end of document".into()));
        }
        let root = root.ok_or_else(|| XmlError::Structure("no root element".into()))?;
        Ok(Self { nodes, root })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id].name
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.nodes[id].text.as_deref()
    }

    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        self.nodes[id].text = Some(text.into());
    }

    pub fn attribute(&self, id: NodeId, key: &str) -> Option<&str> {
        self.nodes[id]
            .attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// First direct child named `name`.
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].name == name)
    }

    pub fn child_text(&self, parent: NodeId, name: &str) -> Option<&str> {
        self.find_child(parent, name).and_then(|child| self.text(child))
    }

    pub fn children_named<'a>(
        &'a self,
        parent: NodeId,
        name: &'a str,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .filter(move |&child| self.nodes[child].name == name)
    }

    /// All elements named `name` below `id` (inclusive), in document order.
    pub fn descendants_named(&self, id: NodeId, name: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if self.nodes[current].name == name {
                found.push(current);
            }
            pending.extend(self.nodes[current].children.iter().rev().copied());
        }
        found
    }

    pub fn append_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = self.alloc(name);
        self.nodes[parent].children.push(id);
        id
    }

    /// Insert a new element at `index` among the children of `parent`.
    pub fn insert_child(&mut self, parent: NodeId, index: usize, name: &str) -> NodeId {
        let id = self.alloc(name);
        let children = &mut self.nodes[parent].children;
        let index = index.min(children.len());
        children.insert(index, id);
        id
    }

    /// First child named `name`, created at the end when missing.
    pub fn get_or_create_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        match self.find_child(parent, name) {
            Some(child) => child,
            None => self.append_child(parent, name),
        }
    }

    /// Set the text of child `name`, creating the child when missing.
    pub fn set_child_text(
        &mut self,
        parent: NodeId,
        name: &str,
        text: impl Into<String>,
    ) -> NodeId {
        let child = self.get_or_create_child(parent, name);
        self.set_text(child, text);
        child
    }

    /// Detach `child` from `parent`. Returns false if it was not attached there.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let children = &mut self.nodes[parent].children;
        match children.iter().position(|&id| id == child) {
            Some(index) => {
                children.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn position_of(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.nodes[parent].children.iter().position(|&id| id == child)
    }

    /// Serialize the document with an XML declaration and two-space indentation.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.nodes.len() * 32);
        out.push_str(XML_DECLARATION);
        out.push('\n');
        self.write_element(&mut out, self.root, 0);
        out
    }

    fn alloc(&mut self, name: &str) -> NodeId {
        self.nodes.push(Node::new(name));
        self.nodes.len() - 1
    }

    fn write_element(&self, out: &mut String, id: NodeId, depth: usize) {
        let node = &self.nodes[id];
        for _ in 0..depth {
            out.push_str(INDENT);
        }
        out.push('<');
        out.push_str(&node.name);
        for (key, value) in &node.attributes {
            let _ = write!(out, " {key}=\"{}\"", escape(value.as_str()));
        }

        if !node.children.is_empty() {
            out.push_str(">\n");
            for &child in &node.children {
                self.write_element(out, child, depth + 1);
            }
            for _ in 0..depth {
                out.push_str(INDENT);
            }
            let _ = writeln!(out, "</{}>", node.name);
            return;
        }

        match node.text.as_deref() {
            Some(text) if !text.is_empty() => {
                let _ = writeln!(out, ">{}</{}>", partial_escape(text), node.name);
            }
            _ => out.push_str(" />\n"),
        }
    }
}

fn open_element(
    nodes: &mut Vec<Node>,
    stack: &[NodeId],
    root: &mut Option<NodeId>,
    element: &BytesStart<'_>,
) -> Result<NodeId, XmlError> {
    let name = std::str::from_utf8(element.name().as_ref())
        .map_err(|err| XmlError::Structure(err.to_string()))?
        .to_string();
    let mut node = Node::new(&name);
    for attribute in element.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|err| XmlError::Structure(err.to_string()))?
            .to_string();
        let value = attribute.unescape_value()?.into_owned();
        node.attributes.push((key, value));
    }

    nodes.push(node);
    let id = nodes.len() - 1;
    match stack.last() {
        Some(&parent) => nodes[parent].children.push(id),
        None if root.is_none() => *root = Some(id),
        None => {
            return Err(XmlError::Structure(format!(
                "unexpected second root element <{name}>"
            )));
        }
    }
    Ok(id)
}

fn append_text(node: &mut Node, text: &str) {
    match node.text.as_mut() {
        Some(existing) => existing.push_str(text),
        None => node.text = Some(text.to_string()),
    }
}
