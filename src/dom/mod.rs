//! In-memory element tree behind the `document` capability.
//!
//! The tree is owned by the engine and outlives single runs, like a page the
//! scripts keep drawing into. Hosts read it back with [`Dom::body_html`].
//!
//! Nodes live in an arena. Each node counts the script handles pointing at
//! it; [`Dom::collect`] frees nodes that are neither under the body nor
//! reachable from a handle, and their slots are reused.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    fmt::Write as _,
    rc::Rc,
};

use mlua::{AnyUserData, Function, Lua, MetaMethod, UserData, UserDataFields, UserDataMethods};

use crate::transcript::escape_html;

pub type NodeId = usize;

#[derive(Debug, Default)]
struct Node {
    tag: String,
    text: String,
    attributes: Vec<(String, String)>,
    style: Vec<(String, String)>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    /// Live [`ElementRef`]s for this node.
    handles: Rc<Cell<usize>>,
}

pub struct Dom {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    listeners: HashMap<(NodeId, String), Vec<Function>>,
}

/// One counted reference to a node; released on drop without touching the tree.
struct Handle(Rc<Cell<usize>>);

impl Drop for Handle {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

enum Walk {
    Open(NodeId),
    Close(NodeId),
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    pub const BODY: NodeId = 0;

    pub fn new() -> Self {
        Self {
            nodes: vec![Node { tag: "body".into(), ..Default::default() }],
            free: Vec::new(),
            listeners: HashMap::new(),
        }
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let node = Node { tag: tag.to_ascii_lowercase(), ..Default::default() };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Number of allocated nodes, body included.
    pub fn live_nodes(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    fn retain_handle(&self, node: NodeId) -> Handle {
        let count = self.nodes[node].handles.clone();
        count.set(count.get() + 1);
        Handle(count)
    }

    /// Frees every node that is not under the body and not reachable from a
    /// node some script still holds. Returns how many nodes were freed.
    pub fn collect(&mut self) -> usize {
        let mut marked = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = vec![Dom::BODY];
        stack.extend((0..self.nodes.len()).filter(|&id| self.nodes[id].handles.get() > 0));
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut marked[id], true) {
                continue;
            }
            stack.extend(self.nodes[id].children.iter().copied());
        }

        let mut freed = 0;
        let already_free: HashSet<NodeId> = self.free.iter().copied().collect();
        for id in 0..self.nodes.len() {
            if marked[id] || already_free.contains(&id) {
                continue;
            }
            self.nodes[id] = Node::default();
            self.free.push(id);
            freed += 1;
        }
        if freed > 0 {
            for id in 0..self.nodes.len() {
                if let Some(p) = self.nodes[id].parent {
                    if !marked[p] {
                        self.nodes[id].parent = None;
                    }
                }
            }
            self.listeners.retain(|(node, _), _| marked[*node]);
        }
        freed
    }

    pub fn tag(&self, node: NodeId) -> &str {
        &self.nodes[node].tag
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node].children
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].parent
    }

    /// Moves `child` under `parent`. Fails when it would create a cycle.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), String> {
        if child == Dom::BODY || self.is_ancestor(child, parent) {
            return Err("cannot append a node to itself or its descendant".into());
        }
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if self.nodes[child].parent != Some(parent) {
            return false;
        }
        self.detach(child);
        true
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(old) = self.nodes[node].parent.take() {
            self.nodes[old].children.retain(|&c| c != node);
        }
    }

    fn is_ancestor(&self, candidate: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == candidate {
                return true;
            }
            match self.nodes[node].parent {
                Some(p) => node = p,
                None => return false,
            }
        }
    }

    pub fn text(&self, node: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            out.push_str(&self.nodes[id].text);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        out
    }

    /// Replaces all children with plain text, as `textContent` assignment does.
    pub fn set_text(&mut self, node: NodeId, text: &str) {
        for child in std::mem::take(&mut self.nodes[node].children) {
            self.nodes[child].parent = None;
        }
        self.nodes[node].text = text.to_string();
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        lookup(&self.nodes[node].attributes, name)
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        upsert(&mut self.nodes[node].attributes, name, value);
    }

    pub fn style(&self, node: NodeId, property: &str) -> Option<String> {
        lookup(&self.nodes[node].style, property)
    }

    pub fn set_style(&mut self, node: NodeId, property: &str, value: &str) {
        upsert(&mut self.nodes[node].style, property, value);
    }

    /// Finds an element attached under the body by its `id` attribute.
    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        let mut stack = vec![Dom::BODY];
        while let Some(node) = stack.pop() {
            if self.attribute(node, "id").as_deref() == Some(id) {
                return Some(node);
            }
            stack.extend(self.nodes[node].children.iter().rev());
        }
        None
    }

    pub fn add_listener(&mut self, node: NodeId, event: &str, callback: Function) {
        self.listeners.entry((node, event.to_string())).or_default().push(callback);
    }

    pub fn listeners(&self, node: NodeId, event: &str) -> Vec<Function> {
        self.listeners.get(&(node, event.to_string())).cloned().unwrap_or_default()
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        self.serialize(vec![Walk::Open(node)])
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = escape_html(&self.nodes[node].text);
        let stack = self.nodes[node].children.iter().rev().map(|&c| Walk::Open(c)).collect();
        out.push_str(&self.serialize(stack));
        out
    }

    /// Writes elements in document order with an explicit stack, so deep
    /// trees do not grow the native stack.
    fn serialize(&self, mut stack: Vec<Walk>) -> String {
        let mut out = String::new();
        while let Some(step) = stack.pop() {
            match step {
                Walk::Open(id) => {
                    let n = &self.nodes[id];
                    let _ = write!(out, "<{}", n.tag);
                    for (k, v) in &n.attributes {
                        let _ = write!(out, " {}=\"{}\"", k, escape_html(v));
                    }
                    if !n.style.is_empty() {
                        let css: Vec<String> =
                            n.style.iter().map(|(k, v)| format!("{}: {}", css_property(k), v)).collect();
                        let _ = write!(out, " style=\"{}\"", escape_html(&css.join("; ")));
                    }
                    out.push('>');
                    out.push_str(&escape_html(&n.text));
                    stack.push(Walk::Close(id));
                    stack.extend(n.children.iter().rev().map(|&c| Walk::Open(c)));
                }
                Walk::Close(id) => {
                    let _ = write!(out, "</{}>", self.nodes[id].tag);
                }
            }
        }
        out
    }

    pub fn body_html(&self) -> String {
        self.inner_html(Dom::BODY)
    }
}

fn lookup(pairs: &[(String, String)], key: &str) -> Option<String> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

fn upsert(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    match pairs.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => pairs.push((key.to_string(), value.to_string())),
    }
}

/// `backgroundColor` → `background-color`.
fn css_property(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Script-side handle to one element. Keeps the node from being collected.
pub struct ElementRef {
    dom: Rc<RefCell<Dom>>,
    node: NodeId,
    _handle: Handle,
}

impl ElementRef {
    pub fn new(dom: Rc<RefCell<Dom>>, node: NodeId) -> Self {
        let handle = dom.borrow().retain_handle(node);
        Self { dom, node, _handle: handle }
    }

    fn node_of(&self, ud: &AnyUserData) -> mlua::Result<NodeId> {
        let other = ud.borrow::<ElementRef>()?;
        if !Rc::ptr_eq(&self.dom, &other.dom) {
            return Err(mlua::Error::runtime("element belongs to a different document"));
        }
        Ok(other.node)
    }

    /// Calls every listener registered for `event`, in registration order.
    pub fn dispatch(&self, event: &str) -> mlua::Result<()> {
        let callbacks = self.dom.borrow().listeners(self.node, event);
        for cb in callbacks {
            cb.call::<()>(())?;
        }
        Ok(())
    }
}

impl UserData for ElementRef {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("tagName", |_, this| Ok(this.dom.borrow().tag(this.node).to_ascii_uppercase()));
        fields.add_field_method_get("id", |_, this| Ok(this.dom.borrow().attribute(this.node, "id")));
        fields.add_field_method_set("id", |_, this, id: String| {
            this.dom.borrow_mut().set_attribute(this.node, "id", &id);
            Ok(())
        });
        fields.add_field_method_get("textContent", |_, this| Ok(this.dom.borrow().text(this.node)));
        fields.add_field_method_set("textContent", |_, this, text: String| {
            this.dom.borrow_mut().set_text(this.node, &text);
            Ok(())
        });
        fields.add_field_method_get("innerHTML", |_, this| Ok(this.dom.borrow().inner_html(this.node)));
        fields.add_field_method_get("style", |_, this| Ok(StyleRef(this.clone())));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("appendChild", |_, this, child: AnyUserData| {
            let node = this.node_of(&child)?;
            this.dom.borrow_mut().append_child(this.node, node).map_err(mlua::Error::runtime)?;
            Ok(child)
        });
        methods.add_method("removeChild", |_, this, child: AnyUserData| {
            let node = this.node_of(&child)?;
            if !this.dom.borrow_mut().remove_child(this.node, node) {
                return Err(mlua::Error::runtime("node is not a child of this element"));
            }
            Ok(child)
        });
        methods.add_method("setAttribute", |_, this, (name, value): (String, String)| {
            this.dom.borrow_mut().set_attribute(this.node, &name, &value);
            Ok(())
        });
        methods.add_method("getAttribute", |_, this, name: String| Ok(this.dom.borrow().attribute(this.node, &name)));
        methods.add_method("addEventListener", |_, this, (event, callback): (String, Function)| {
            this.dom.borrow_mut().add_listener(this.node, &event, callback);
            Ok(())
        });
        methods.add_method("click", |_, this, ()| this.dispatch("click"));
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.dom.borrow().outer_html(this.node)));
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: AnyUserData| {
            Ok(other.borrow::<ElementRef>().map(|o| Rc::ptr_eq(&this.dom, &o.dom) && o.node == this.node).unwrap_or(false))
        });
    }
}

impl Clone for ElementRef {
    fn clone(&self) -> Self {
        Self::new(self.dom.clone(), self.node)
    }
}

/// `element.style`: reads and writes inline style properties.
pub struct StyleRef(ElementRef);

impl UserData for StyleRef {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |_, this, prop: String| {
            Ok(this.0.dom.borrow().style(this.0.node, &prop))
        });
        methods.add_meta_method(MetaMethod::NewIndex, |_, this, (prop, value): (String, String)| {
            this.0.dom.borrow_mut().set_style(this.0.node, &prop, &value);
            Ok(())
        });
    }
}

/// Builds the `document` table for one run.
pub fn document_table(lua: &Lua, dom: &Rc<RefCell<Dom>>) -> mlua::Result<mlua::Table> {
    let document = lua.create_table()?;
    document.set("body", ElementRef::new(dom.clone(), Dom::BODY))?;

    let d = dom.clone();
    document.set(
        "createElement",
        lua.create_function(move |_, tag: String| {
            let node = d.borrow_mut().create_element(&tag);
            Ok(ElementRef::new(d.clone(), node))
        })?,
    )?;

    let d = dom.clone();
    document.set(
        "getElementById",
        lua.create_function(move |_, id: String| {
            let found = d.borrow().element_by_id(&id);
            Ok(found.map(|node| ElementRef::new(d.clone(), node)))
        })?,
    )?;

    Ok(document)
}
