//! Tolerant element tree built from possibly malformed XML fragments.
//!
//! Input is wrapped in a synthetic `<Root>` element so several top-level
//! siblings parse as one document. Reader errors stop the build but keep
//! everything read so far; the error text is kept as a diagnostic.

use std::collections::HashMap;

use lazy_static::lazy_static;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

/// Local name of the synthetic wrapper element.
pub const SYNTHETIC_ROOT: &str = "Root";

lazy_static! {
    static ref XML_DECLARATION: Regex = Regex::new(r"<\?xml[^>]*\?>").unwrap();
}

/// Index of a node in an [`ElementTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Qualified name as written (`Ccy`, `xsi:type`).
    pub name: String,
    pub value: String,
}

/// One element (or the document node at index 0).
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub prefix: Option<String>,
    pub local_name: String,
    /// Resolved namespace URI of the element name.
    pub namespace: Option<String>,
    /// Default namespace in scope at this element (declared or inherited).
    pub default_namespace: Option<String>,
    pub attributes: Vec<Attribute>,
    /// Text before the first child element.
    pub text: Option<String>,
    /// Text after this element's end tag, before the next sibling.
    pub tail: Option<String>,
    /// Text following a comment or processing instruction inside this
    /// element, keyed by how many child elements precede it.
    pub marker_tails: Vec<(usize, String)>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }
}

/// One item of an element's direct content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content<'a> {
    Text(&'a str),
    Element(NodeId),
}

/// Options controlling how names are resolved while building.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Drop every namespace: prefixes are removed from element names and
    /// `xmlns` declarations are ignored.
    pub strip_namespaces: bool,
}

/// Arena of elements plus any diagnostics raised while reading.
#[derive(Debug, Clone)]
pub struct ElementTree {
    nodes: Vec<Element>,
    diagnostics: Vec<String>,
}

impl ElementTree {
    /// Parse with namespaces resolved.
    pub fn parse(content: &str) -> Self {
        Self::parse_with(content, ParseOptions::default())
    }

    pub fn parse_with(content: &str, options: ParseOptions) -> Self {
        let stripped = XML_DECLARATION.replace_all(content, "");
        let wrapped = format!("<{SYNTHETIC_ROOT}>{}</{SYNTHETIC_ROOT}>", stripped.trim());
        let mut builder = TreeBuilder::new(options);
        builder.read(&wrapped);
        let tree = builder.finish();
        if !tree.diagnostics.is_empty() {
            tracing::debug!(diagnostics = ?tree.diagnostics, "XML parsed with recovery");
        }
        tree
    }

    /// The document node: parent of the synthetic root.
    pub fn document(&self) -> NodeId {
        NodeId(0)
    }

    /// The synthetic `<Root>` wrapper element.
    pub fn root(&self) -> Option<NodeId> {
        self.nodes[0].children.first().copied()
    }

    pub fn get(&self, id: NodeId) -> &Element {
        &self.nodes[id.0]
    }

    pub fn is_document(&self, id: NodeId) -> bool {
        id.0 == 0
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Every element below `from`, in document order, excluding `from`.
    pub fn descendants(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.get(from).children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.get(id).children.iter().rev().copied());
        }
        out
    }

    /// First element in document order with the given local name.
    pub fn find_first_local(&self, local_name: &str) -> Option<NodeId> {
        self.descendants(self.document())
            .into_iter()
            .find(|id| self.get(*id).local_name == local_name)
    }

    /// Direct content of an element in document order.
    pub fn content(&self, id: NodeId) -> Vec<Content<'_>> {
        let element = self.get(id);
        let markers_at = move |pos: usize| {
            element
                .marker_tails
                .iter()
                .filter(move |(at, _)| *at == pos)
                .map(|(_, text)| Content::Text(text.as_str()))
        };

        let mut out: Vec<Content<'_>> = element.text.as_deref().map(Content::Text).into_iter().collect();
        out.extend(markers_at(0));
        for (idx, child) in element.children.iter().enumerate() {
            out.push(Content::Element(*child));
            out.extend(self.get(*child).tail.as_deref().map(Content::Text));
            out.extend(markers_at(idx + 1));
        }
        out
    }

    /// Text node children of an element, in order.
    pub fn text_nodes(&self, id: NodeId) -> Vec<String> {
        self.content(id)
            .into_iter()
            .filter_map(|item| match item {
                Content::Text(text) if !text.is_empty() => Some(text.to_string()),
                _ => None,
            })
            .collect()
    }
}

struct TreeBuilder {
    options: ParseOptions,
    nodes: Vec<Element>,
    /// Open elements with the namespace declarations they introduced.
    open: Vec<(NodeId, HashMap<Option<String>, Option<String>>)>,
    /// Set after a comment or processing instruction until the next tag.
    after_marker: bool,
    diagnostics: Vec<String>,
}

impl TreeBuilder {
    fn new(options: ParseOptions) -> Self {
        Self {
            options,
            nodes: vec![Element::default()],
            open: Vec::new(),
            after_marker: false,
            diagnostics: Vec::new(),
        }
    }

    fn read(&mut self, xml: &str) {
        let mut reader = Reader::from_str(xml);
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = false;

        loop {
            let event = reader.read_event();
            if matches!(event, Ok(Event::Start(_)) | Ok(Event::Empty(_)) | Ok(Event::End(_))) {
                self.after_marker = false;
            }
            match event {
                Ok(Event::Start(ref e)) => {
                    let id = self.open_element(e);
                    let scope = self.declarations(e);
                    self.open.push((id, scope));
                }
                Ok(Event::Empty(ref e)) => {
                    self.open_element(e);
                }
                Ok(Event::End(ref e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    self.close_element(&name);
                }
                Ok(Event::Text(ref e)) => {
                    let text = match e.unescape() {
                        Ok(text) => text.into_owned(),
                        Err(_) => String::from_utf8_lossy(e).into_owned(),
                    };
                    self.push_text(&text);
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    self.push_text(&text);
                }
                Ok(Event::Comment(_)) | Ok(Event::PI(_)) => self.open_marker(),
                Ok(Event::Eof) => break,
                Err(e) => {
                    self.diagnostics.push(format!(
                        "XML parse error at position {}: {e}",
                        reader.error_position()
                    ));
                    break;
                }
                _ => {}
            }
        }
    }

    fn finish(self) -> ElementTree {
        ElementTree {
            nodes: self.nodes,
            diagnostics: self.diagnostics,
        }
    }

    /// Namespace declarations introduced by a start tag, keyed by prefix
    /// (`None` for the default namespace). `xmlns=""` undeclares.
    fn declarations(&self, e: &BytesStart<'_>) -> HashMap<Option<String>, Option<String>> {
        let mut scope = HashMap::new();
        if self.options.strip_namespaces {
            return scope;
        }
        for attr in e.attributes().with_checks(false).flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            let uri = if value.is_empty() { None } else { Some(value) };
            if key == "xmlns" {
                scope.insert(None, uri);
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                scope.insert(Some(prefix.to_string()), uri);
            }
        }
        scope
    }

    fn lookup(&self, prefix: Option<&str>, local: &HashMap<Option<String>, Option<String>>) -> Option<String> {
        let key = prefix.map(str::to_string);
        if let Some(uri) = local.get(&key) {
            return uri.clone();
        }
        self.open
            .iter()
            .rev()
            .find_map(|(_, scope)| scope.get(&key))
            .cloned()
            .flatten()
    }

    fn open_element(&mut self, e: &BytesStart<'_>) -> NodeId {
        let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let (prefix, local_name) = match qname.split_once(':') {
            Some((p, l)) => (Some(p.to_string()), l.to_string()),
            None => (None, qname.clone()),
        };

        let declared = self.declarations(e);
        let (prefix, namespace, default_namespace) = if self.options.strip_namespaces {
            (None, None, None)
        } else {
            let namespace = self.lookup(prefix.as_deref(), &declared);
            let default_namespace = self.lookup(None, &declared);
            (prefix, namespace, default_namespace)
        };

        let attributes = e
            .attributes()
            .with_checks(false)
            .flatten()
            .filter_map(|attr| {
                let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                if name == "xmlns" || name.starts_with("xmlns:") {
                    return None;
                }
                let value = attr
                    .unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
                Some(Attribute { name, value })
            })
            .collect();

        let parent = self.open.last().map(|(id, _)| *id).unwrap_or(NodeId(0));
        let id = NodeId(self.nodes.len());
        self.nodes.push(Element {
            prefix,
            local_name,
            namespace,
            default_namespace,
            attributes,
            parent: Some(parent),
            ..Element::default()
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Close the innermost open element with this name, implicitly closing
    /// anything opened inside it. Stray end tags are ignored.
    fn close_element(&mut self, qname: &str) {
        let position = self.open.iter().rposition(|(id, _)| {
            let el = &self.nodes[id.0];
            match &el.prefix {
                Some(p) => qname == format!("{p}:{}", el.local_name),
                None => qname == el.local_name || qname.rsplit(':').next() == Some(el.local_name.as_str()),
            }
        });
        match position {
            Some(pos) => self.open.truncate(pos),
            None => self.diagnostics.push(format!("unmatched end tag </{qname}>")),
        }
    }

    fn open_marker(&mut self) {
        let Some((current, _)) = self.open.last() else { return };
        let element = &mut self.nodes[current.0];
        element.marker_tails.push((element.children.len(), String::new()));
        self.after_marker = true;
    }

    fn push_text(&mut self, text: &str) {
        let Some((current, _)) = self.open.last() else { return };
        let current = *current;
        if self.after_marker {
            if let Some((_, tail)) = self.nodes[current.0].marker_tails.last_mut() {
                tail.push_str(text);
                return;
            }
        }
        let slot = match self.nodes[current.0].children.last().copied() {
            Some(last_child) => &mut self.nodes[last_child.0].tail,
            None => &mut self.nodes[current.0].text,
        };
        slot.get_or_insert_with(String::new).push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_after_comment_is_not_element_text() {
        let tree = ElementTree::parse("<Nm><!-- c -->Acme</Nm><Id>1<?pi x?>2<B/>3</Id>");
        let nm = tree.find_first_local("Nm").unwrap();
        assert_eq!(tree.get(nm).text, None);
        assert_eq!(tree.text_nodes(nm), vec!["Acme"]);

        let id = tree.find_first_local("Id").unwrap();
        assert_eq!(tree.get(id).text.as_deref(), Some("1"));
        assert_eq!(tree.text_nodes(id), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_fragments_share_synthetic_root() {
        let tree = ElementTree::parse(
            r#"<?xml version="1.0"?><AppHdr xmlns="urn:x:app"><BizMsgIdr>ABC</BizMsgIdr></AppHdr>
<Document xmlns="urn:x:doc"><Grp/></Document>"#,
        );
        let root = tree.root().unwrap();
        assert_eq!(tree.get(root).local_name, SYNTHETIC_ROOT);
        assert_eq!(tree.get(root).children.len(), 2);
        assert!(tree.diagnostics().is_empty());
    }

    #[test]
    fn test_default_namespace_is_inherited() {
        let tree = ElementTree::parse(r#"<AppHdr xmlns="urn:x:app"><BizMsgIdr>ABC</BizMsgIdr></AppHdr>"#);
        let id = tree.find_first_local("BizMsgIdr").unwrap();
        let el = tree.get(id);
        assert_eq!(el.namespace.as_deref(), Some("urn:x:app"));
        assert_eq!(el.default_namespace.as_deref(), Some("urn:x:app"));
        assert_eq!(el.text.as_deref(), Some("ABC"));
    }

    #[test]
    fn test_prefixed_names_resolve() {
        let tree = ElementTree::parse(r#"<h:AppHdr xmlns:h="urn:h"><h:Fr>X</h:Fr></h:AppHdr>"#);
        let id = tree.find_first_local("Fr").unwrap();
        assert_eq!(tree.get(id).prefix.as_deref(), Some("h"));
        assert_eq!(tree.get(id).namespace.as_deref(), Some("urn:h"));
        assert_eq!(tree.get(id).default_namespace, None);
    }

    #[test]
    fn test_strip_namespaces() {
        let tree = ElementTree::parse_with(
            r#"<h:AppHdr xmlns:h="urn:h" xmlns="urn:d"><h:Fr>X</h:Fr></h:AppHdr>"#,
            ParseOptions { strip_namespaces: true },
        );
        let id = tree.find_first_local("Fr").unwrap();
        assert_eq!(tree.get(id).prefix, None);
        assert_eq!(tree.get(id).namespace, None);
    }

    #[test]
    fn test_malformed_input_keeps_partial_tree() {
        let tree = ElementTree::parse("<A><B>one</B><C>two</A><!-- never closed");
        assert!(tree.find_first_local("B").is_some());
        assert!(tree.find_first_local("C").is_some());
        assert!(!tree.diagnostics().is_empty());
    }

    #[test]
    fn test_attributes_and_entities() {
        let tree = ElementTree::parse(r#"<Amt Ccy="EUR" xmlns="urn:d">10 &amp; 20</Amt>"#);
        let id = tree.find_first_local("Amt").unwrap();
        assert_eq!(tree.get(id).attribute("Ccy"), Some("EUR"));
        assert_eq!(tree.get(id).attribute("xmlns"), None);
        assert_eq!(tree.get(id).text.as_deref(), Some("10 & 20"));
    }

    #[test]
    fn test_text_nodes_include_tails() {
        let tree = ElementTree::parse("<P>a<B/>b<B/>c</P>");
        let id = tree.find_first_local("P").unwrap();
        assert_eq!(tree.text_nodes(id), vec!["a", "b", "c"]);
    }
}
