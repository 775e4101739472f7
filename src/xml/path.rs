//! A small XPath 1.0 subset evaluated over an [`ElementTree`].
//!
//! Supported: absolute (`/`) and descendant (`//`) paths, relative steps,
//! `.` and `..`, name tests with an optional `prefix:` and `*`, `@name`,
//! `@*`, `text()`, and predicates `[n]`, `[last()]`, `[@a]`, `[@a='v']`,
//! `[child]` and `[child='v']` (`!=` is accepted too).

use std::collections::{BTreeSet, HashMap};

use crate::error::FieldError;
use crate::xml::tree::{Content, ElementTree, NodeId};

/// Namespace aliases usable as prefixes in path expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceAliases {
    aliases: HashMap<String, String>,
}

impl NamespaceAliases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alias: impl Into<String>, uri: impl Into<String>) {
        self.aliases.insert(alias.into(), uri.into());
    }

    pub fn get(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// One result of a path evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XPathItem {
    Element(NodeId),
    /// Attribute value or text node.
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NameTest {
    prefix: Option<String>,
    /// `None` for `*`.
    local: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Last,
    HasAttribute(String),
    AttributeCompare { name: String, value: String, negate: bool },
    HasChild(NameTest),
    ChildCompare { test: NameTest, value: String, negate: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StepKind {
    SelfNode,
    Parent,
    Element { test: NameTest, predicates: Vec<Predicate> },
    /// `None` for `@*`.
    Attribute(Option<String>),
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    /// Preceded by `//`.
    descendant: bool,
    kind: StepKind,
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    raw: String,
    absolute: bool,
    steps: Vec<Step>,
}

impl PathExpr {
    pub fn parse(path: &str) -> Result<Self, FieldError> {
        let bad = |reason: &str| FieldError::BadPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(bad("empty path"));
        }

        let absolute = trimmed.starts_with('/');
        let mut steps = Vec::new();
        let mut descendant = false;
        let mut first = true;

        for segment in split_steps(trimmed).map_err(|reason| bad(reason))? {
            if segment.is_empty() {
                if first && absolute {
                    first = false;
                    continue;
                }
                if descendant {
                    return Err(bad("'///' is not a valid step separator"));
                }
                descendant = true;
                continue;
            }
            first = false;
            let kind = parse_step(segment).map_err(|reason| bad(&reason))?;
            steps.push(Step { descendant, kind });
            descendant = false;
        }

        if descendant || steps.is_empty() {
            return Err(bad("path ends with a separator"));
        }
        if let Some(pos) = steps
            .iter()
            .position(|s| matches!(s.kind, StepKind::Attribute(_) | StepKind::Text))
        {
            if pos + 1 != steps.len() {
                return Err(bad("attribute and text() steps must be last"));
            }
        }

        Ok(Self {
            raw: path.to_string(),
            absolute,
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Evaluate against `tree`, starting at `context` for relative paths and
    /// at the document node for absolute ones.
    pub fn evaluate(
        &self,
        tree: &ElementTree,
        context: NodeId,
        aliases: &NamespaceAliases,
    ) -> Result<Vec<XPathItem>, FieldError> {
        let mut current: Vec<NodeId> = vec![if self.absolute { tree.document() } else { context }];

        for (idx, step) in self.steps.iter().enumerate() {
            let sources: Vec<NodeId> = if step.descendant {
                let mut all = BTreeSet::new();
                for id in &current {
                    all.insert(*id);
                    all.extend(tree.descendants(*id));
                }
                all.into_iter().collect()
            } else {
                current.clone()
            };

            match &step.kind {
                StepKind::SelfNode => current = sources,
                StepKind::Parent => {
                    let parents: BTreeSet<NodeId> =
                        sources.iter().filter_map(|id| tree.get(*id).parent).collect();
                    current = parents.into_iter().collect();
                }
                StepKind::Element { test, predicates } => {
                    let mut next = BTreeSet::new();
                    for id in &sources {
                        let mut matched = Vec::new();
                        for child in &tree.get(*id).children {
                            if name_matches(tree, *child, test, aliases)? {
                                matched.push(*child);
                            }
                        }
                        for predicate in predicates {
                            matched = apply_predicate(tree, matched, predicate, aliases)?;
                        }
                        next.extend(matched);
                    }
                    current = next.into_iter().collect();
                }
                StepKind::Attribute(name) => {
                    debug_assert_eq!(idx + 1, self.steps.len());
                    let values = sources
                        .iter()
                        .filter(|id| !tree.is_document(**id))
                        .flat_map(|id| tree.get(*id).attributes.iter())
                        .filter(|attr| name.as_ref().map_or(true, |n| &attr.name == n))
                        .map(|attr| XPathItem::Text(attr.value.clone()))
                        .collect();
                    return Ok(values);
                }
                StepKind::Text => {
                    let values = sources
                        .iter()
                        .filter(|id| !tree.is_document(**id))
                        .flat_map(|id| tree.text_nodes(*id))
                        .map(XPathItem::Text)
                        .collect();
                    return Ok(values);
                }
            }
        }

        Ok(current.into_iter().map(XPathItem::Element).collect())
    }
}

/// Split on `/` outside of predicates and quoted strings. Consecutive
/// slashes produce empty segments.
fn split_steps(path: &str) -> Result<Vec<&str>, &'static str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in path.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth.checked_sub(1).ok_or("unbalanced ']'")?;
            }
            (None, '/') if depth == 0 => {
                segments.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err("unterminated string literal");
    }
    if depth != 0 {
        return Err("unbalanced '['");
    }
    segments.push(&path[start..]);
    Ok(segments)
}

fn parse_step(segment: &str) -> Result<StepKind, String> {
    match segment {
        "." => return Ok(StepKind::SelfNode),
        ".." => return Ok(StepKind::Parent),
        "text()" => return Ok(StepKind::Text),
        _ => {}
    }

    if let Some(name) = segment.strip_prefix('@') {
        if name == "*" {
            return Ok(StepKind::Attribute(None));
        }
        validate_name(name)?;
        return Ok(StepKind::Attribute(Some(name.to_string())));
    }

    let (name, rest) = match segment.find('[') {
        Some(pos) => (&segment[..pos], &segment[pos..]),
        None => (segment, ""),
    };
    let test = parse_name_test(name)?;
    let predicates = parse_predicates(rest)?;
    Ok(StepKind::Element { test, predicates })
}

fn validate_name(name: &str) -> Result<(), String> {
    let valid = !name.is_empty()
        && name.matches(':').count() <= 1
        && !name.starts_with(':')
        && !name.ends_with(':')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(format!("unsupported step '{name}'"))
    }
}

fn parse_name_test(name: &str) -> Result<NameTest, String> {
    if name == "*" {
        return Ok(NameTest { prefix: None, local: None });
    }
    if let Some(prefix) = name.strip_suffix(":*") {
        validate_name(prefix)?;
        return Ok(NameTest {
            prefix: Some(prefix.to_string()),
            local: None,
        });
    }
    validate_name(name)?;
    Ok(match name.split_once(':') {
        Some((prefix, local)) => NameTest {
            prefix: Some(prefix.to_string()),
            local: Some(local.to_string()),
        },
        None => NameTest {
            prefix: None,
            local: Some(name.to_string()),
        },
    })
}

fn parse_predicates(mut rest: &str) -> Result<Vec<Predicate>, String> {
    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let body_end = closing_bracket(rest).ok_or_else(|| format!("unterminated predicate in '{rest}'"))?;
        predicates.push(parse_predicate(rest[1..body_end].trim())?);
        rest = &rest[body_end + 1..];
    }
    Ok(predicates)
}

/// Index of the `]` closing the predicate that `s` starts with.
fn closing_bracket(s: &str) -> Option<usize> {
    if !s.starts_with('[') {
        return None;
    }
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_predicate(body: &str) -> Result<Predicate, String> {
    if body == "last()" {
        return Ok(Predicate::Last);
    }
    if let Ok(position) = body.parse::<usize>() {
        if position == 0 {
            return Err("positions start at 1".to_string());
        }
        return Ok(Predicate::Position(position));
    }

    let comparison = comparison_operator(body);

    let (lhs, rhs) = match comparison {
        Some((pos, width, negate)) => {
            let value = unquote(body[pos + width..].trim())
                .ok_or_else(|| format!("expected a quoted literal in '[{body}]'"))?;
            (body[..pos].trim(), Some((value, negate)))
        }
        None => (body, None),
    };

    if let Some(attr) = lhs.strip_prefix('@') {
        validate_name(attr)?;
        return Ok(match rhs {
            Some((value, negate)) => Predicate::AttributeCompare {
                name: attr.to_string(),
                value,
                negate,
            },
            None => Predicate::HasAttribute(attr.to_string()),
        });
    }

    let test = parse_name_test(lhs)?;
    Ok(match rhs {
        Some((value, negate)) => Predicate::ChildCompare { test, value, negate },
        None => Predicate::HasChild(test),
    })
}

/// Position, width and negation of the first `=` or `!=` outside a string literal.
fn comparison_operator(body: &str) -> Option<(usize, usize, bool)> {
    let mut quote: Option<char> = None;
    let mut prev: Option<(usize, char)> = None;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '=') => {
                return Some(match prev {
                    Some((bang, '!')) => (bang, 2, true),
                    _ => (i, 1, false),
                })
            }
            _ => {}
        }
        prev = Some((i, c));
    }
    None
}

fn unquote(s: &str) -> Option<String> {
    let first = s.chars().next()?;
    if (first == '\'' || first == '"') && s.len() >= 2 && s.ends_with(first) {
        Some(s[1..s.len() - 1].to_string())
    } else {
        None
    }
}

fn name_matches(
    tree: &ElementTree,
    id: NodeId,
    test: &NameTest,
    aliases: &NamespaceAliases,
) -> Result<bool, FieldError> {
    let element = tree.get(id);
    let expected_ns = match &test.prefix {
        Some(prefix) => Some(
            aliases
                .get(prefix)
                .ok_or_else(|| FieldError::UndefinedPrefix(prefix.clone()))?,
        ),
        None => None,
    };
    if element.namespace.as_deref() != expected_ns {
        return Ok(false);
    }
    Ok(test.local.as_ref().map_or(true, |local| &element.local_name == local))
}

fn apply_predicate(
    tree: &ElementTree,
    nodes: Vec<NodeId>,
    predicate: &Predicate,
    aliases: &NamespaceAliases,
) -> Result<Vec<NodeId>, FieldError> {
    Ok(match predicate {
        Predicate::Position(n) => nodes.get(n - 1).copied().into_iter().collect(),
        Predicate::Last => nodes.last().copied().into_iter().collect(),
        Predicate::HasAttribute(name) => nodes
            .into_iter()
            .filter(|id| tree.get(*id).attribute(name).is_some())
            .collect(),
        Predicate::AttributeCompare { name, value, negate } => nodes
            .into_iter()
            .filter(|id| {
                tree.get(*id)
                    .attribute(name)
                    .is_some_and(|actual| (actual == value) != *negate)
            })
            .collect(),
        Predicate::HasChild(test) => {
            let mut kept = Vec::new();
            for id in nodes {
                if first_child_matching(tree, id, test, aliases)?.is_some() {
                    kept.push(id);
                }
            }
            kept
        }
        Predicate::ChildCompare { test, value, negate } => {
            let mut kept = Vec::new();
            for id in nodes {
                let mut hit = false;
                for child in &tree.get(id).children {
                    if name_matches(tree, *child, test, aliases)?
                        && (string_value(tree, *child) == *value) != *negate
                    {
                        hit = true;
                        break;
                    }
                }
                if hit {
                    kept.push(id);
                }
            }
            kept
        }
    })
}

fn first_child_matching(
    tree: &ElementTree,
    id: NodeId,
    test: &NameTest,
    aliases: &NamespaceAliases,
) -> Result<Option<NodeId>, FieldError> {
    for child in &tree.get(id).children {
        if name_matches(tree, *child, test, aliases)? {
            return Ok(Some(*child));
        }
    }
    Ok(None)
}

/// XPath string-value: all descendant text concatenated.
pub fn string_value(tree: &ElementTree, id: NodeId) -> String {
    let mut out = String::new();
    collect_text(tree, id, &mut out);
    out
}

fn collect_text(tree: &ElementTree, id: NodeId, out: &mut String) {
    for item in tree.content(id) {
        match item {
            Content::Text(text) => out.push_str(text),
            Content::Element(child) => collect_text(tree, child, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACS: &str = r#"<Document xmlns="urn:doc">
  <Tx><Id>1</Id><Amt Ccy="EUR">10.00</Amt><Line>a</Line><Line>b</Line></Tx>
  <Tx><Id>2</Id><Amt Ccy="USD">20.00</Amt><Line>c</Line></Tx>
</Document>
<Plain><Item>x</Item></Plain>"#;

    fn aliases() -> NamespaceAliases {
        let mut aliases = NamespaceAliases::new();
        aliases.insert("d", "urn:doc");
        aliases
    }

    fn texts(tree: &ElementTree, items: &[XPathItem]) -> Vec<String> {
        items
            .iter()
            .map(|item| match item {
                XPathItem::Element(id) => tree.get(*id).text.clone().unwrap_or_default(),
                XPathItem::Text(s) => s.clone(),
            })
            .collect()
    }

    fn eval(path: &str) -> Result<Vec<String>, FieldError> {
        let tree = ElementTree::parse(PACS);
        let root = tree.root().unwrap();
        let items = PathExpr::parse(path)?.evaluate(&tree, root, &aliases())?;
        Ok(texts(&tree, &items))
    }

    #[test]
    fn test_relative_prefixed_path() {
        assert_eq!(eval("d:Document/d:Tx/d:Id").unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_descendant_and_attribute() {
        assert_eq!(eval("//d:Amt/@Ccy").unwrap(), vec!["EUR", "USD"]);
        assert_eq!(eval(".//d:Line").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_absolute_path_starts_above_synthetic_root() {
        assert_eq!(eval("/Root/Plain/Item").unwrap(), vec!["x"]);
    }

    #[test]
    fn test_unprefixed_name_only_matches_no_namespace() {
        assert!(eval("//Tx").unwrap().is_empty());
        assert_eq!(eval("//Item").unwrap(), vec!["x"]);
    }

    #[test]
    fn test_predicates() {
        assert_eq!(eval("//d:Tx[2]/d:Id").unwrap(), vec!["2"]);
        assert_eq!(eval("//d:Tx[last()]/d:Id").unwrap(), vec!["2"]);
        assert_eq!(eval("//d:Tx/d:Line[1]").unwrap(), vec!["a", "c"]);
        assert_eq!(eval("//d:Amt[@Ccy='USD']").unwrap(), vec!["20.00"]);
        assert_eq!(eval("//d:Tx[d:Id='1']/d:Amt").unwrap(), vec!["10.00"]);
        assert_eq!(eval("//d:Tx[d:Id!='1']/d:Amt").unwrap(), vec!["20.00"]);
        assert_eq!(eval("//d:Amt[@Missing]").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_operators_inside_literals_are_not_comparisons() {
        let tree = ElementTree::parse(r#"<A k="x!=y">1</A><A k="p=q">2</A><A k="z">3</A>"#);
        let root = tree.root().unwrap();
        let select = |path: &str| {
            let items = PathExpr::parse(path).unwrap().evaluate(&tree, root, &aliases()).unwrap();
            texts(&tree, &items)
        };

        assert_eq!(select("//A[@k='x!=y']"), vec!["1"]);
        assert_eq!(select("//A[@k=\"p=q\"]"), vec!["2"]);
        assert_eq!(select("//A[@k!='p=q']"), vec!["1", "3"]);
    }

    #[test]
    fn test_text_and_parent_steps() {
        assert_eq!(eval("//d:Id/text()").unwrap(), vec!["1", "2"]);
        assert_eq!(eval("//d:Id/../d:Amt").unwrap(), vec!["10.00", "20.00"]);
    }

    #[test]
    fn test_undefined_prefix_is_an_error() {
        assert_eq!(eval("//x:Tx"), Err(FieldError::UndefinedPrefix("x".into())));
    }

    #[test]
    fn test_malformed_paths() {
        for path in ["", "a/", "a[1", "count(//a)", "@Ccy/x", "a[0]", "a[@b=c]"] {
            assert!(
                matches!(PathExpr::parse(path), Err(FieldError::BadPath { .. })),
                "{path} should not parse"
            );
        }
    }
}
