//! Structured-document (XML / ISO 20022) parsing.
//!
//! [`XmlDocument`] wraps a tolerant [`ElementTree`] together with the two
//! namespace aliases ISO 20022 business messages use: `app` for the
//! application header (`AppHdr`) and `def` for the business document
//! (`Document`). Paths rooted at `/app:AppHdr` or `/def:Document` are
//! evaluated relative to the located element.

pub mod path;
pub mod tree;

pub use path::{NamespaceAliases, PathExpr, XPathItem};
pub use tree::{Content, ElementTree, NodeId, ParseOptions};

use crate::error::FieldError;

pub const APP_HEADER_PREFIX: &str = "/app:AppHdr";
pub const DOCUMENT_PREFIX: &str = "/def:Document";

/// A parsed business message with its located envelope roots.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    tree: ElementTree,
    aliases: NamespaceAliases,
    app_header: Option<NodeId>,
    document: Option<NodeId>,
}

impl XmlDocument {
    /// Parse a message. The first `AppHdr` and the first `Document` in
    /// document order become the roots; each one's default namespace, when
    /// it has one, is bound to `app` / `def`.
    pub fn parse(content: &str) -> Self {
        Self::from_tree(ElementTree::parse(content))
    }

    /// Parse with every namespace stripped. Neither alias is bound.
    pub fn parse_without_namespaces(content: &str) -> Self {
        Self::from_tree(ElementTree::parse_with(
            content,
            ParseOptions { strip_namespaces: true },
        ))
    }

    fn from_tree(tree: ElementTree) -> Self {
        let mut aliases = NamespaceAliases::new();
        let app_header = tree.find_first_local("AppHdr");
        let document = tree.find_first_local("Document");

        for (alias, root) in [("app", app_header), ("def", document)] {
            if let Some(ns) = root.and_then(|id| tree.get(id).default_namespace.clone()) {
                aliases.insert(alias, ns);
            }
        }

        tracing::debug!(
            app_header = app_header.is_some(),
            document = document.is_some(),
            aliases = ?aliases,
            "located XML envelope roots"
        );

        Self {
            tree,
            aliases,
            app_header,
            document,
        }
    }

    pub fn tree(&self) -> &ElementTree {
        &self.tree
    }

    pub fn aliases(&self) -> &NamespaceAliases {
        &self.aliases
    }

    pub fn app_header(&self) -> Option<NodeId> {
        self.app_header
    }

    pub fn document(&self) -> Option<NodeId> {
        self.document
    }

    /// Evaluate a path.
    ///
    /// `/app:AppHdr...` and `/def:Document...` are rewritten to `.` plus the
    /// remainder and evaluated from the located root; a missing root is an
    /// error. Other paths run from `context`, or from the synthetic root when
    /// no context is given.
    pub fn select(&self, path: &str, context: Option<NodeId>) -> Result<Vec<XPathItem>, FieldError> {
        let (base, expr) = if let Some(rest) = strip_root(path, APP_HEADER_PREFIX) {
            let base = self.app_header.ok_or(FieldError::MissingRoot("AppHdr"))?;
            (base, format!(".{rest}"))
        } else if let Some(rest) = strip_root(path, DOCUMENT_PREFIX) {
            let base = self.document.ok_or(FieldError::MissingRoot("Document"))?;
            (base, format!(".{rest}"))
        } else {
            let base = context
                .or_else(|| self.tree.root())
                .unwrap_or_else(|| self.tree.document());
            (base, path.to_string())
        };

        PathExpr::parse(&expr)?.evaluate(&self.tree, base, &self.aliases)
    }

    /// Scalar text of a result item: an element's leading text, or the
    /// attribute / text-node string itself.
    pub fn item_text(&self, item: &XPathItem) -> Option<String> {
        match item {
            XPathItem::Element(id) => self.tree.get(*id).text.clone(),
            XPathItem::Text(s) => Some(s.clone()),
        }
    }
}

/// Strip a known root prefix when it is followed by a step boundary.
fn strip_root<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.trim().strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') || rest.starts_with('[') {
        Some(rest)
    } else {
        None
    }
}
