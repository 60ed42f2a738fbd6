//! Declaration outline of C and C++ sources, read from the tree-sitter C++
//! syntax tree.
//!
//! Namespaces, records, enums and functions become [`OutlineElement`]s.
//! A `function_definition` supplies the definition offset of a function and
//! a `declaration` or `field_declaration` its declaration offset; both land on
//! one element when they share a qualified name and prototype.
use crate::error::{HostError, LocatorError, Result};
use crate::host::{DeclElement, DeclKind, TextPoint, TextPosition, Where};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tree_sitter::{Node, Parser};

const SOURCE_EXTENSIONS: &[&str] = &[
    "c", "cc", "cpp", "cxx", "c++", "h", "hh", "hpp", "hxx", "h++", "inl", "ipp",
];

/// Nodes whose members live in the enclosing scope.
const TRANSPARENT: &[&str] = &[
    "declaration_list",
    "linkage_specification",
    "template_declaration",
    "preproc_if",
    "preproc_ifdef",
    "preproc_else",
    "preproc_elif",
    "preproc_elifdef",
];

pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SOURCE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Builds declaration trees for C and C++ files.
pub struct OutlineParser {
    parser: Mutex<Parser>,
}

impl std::fmt::Debug for OutlineParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutlineParser")
            .field("language", &"C++")
            .finish()
    }
}

impl OutlineParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_cpp::LANGUAGE.into())
            .map_err(|e| LocatorError::Other(format!("Failed to set C++ language: {e}")))?;
        Ok(Self {
            parser: Mutex::new(parser),
        })
    }

    pub fn parse_file(&self, path: &Path) -> Result<Vec<Arc<dyn DeclElement>>> {
        let source = fs::read_to_string(path).map_err(|source| LocatorError::Outline {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.parse(path, &source))
    }

    /// Top-level declarations of `source`, which was read from `path`.
    pub fn parse(&self, path: &Path, source: &str) -> Vec<Arc<dyn DeclElement>> {
        let tree = self.parser.lock().parse(source, None);
        let Some(tree) = tree else {
            return Vec::new();
        };

        let mut outline = Outline {
            source,
            drafts: Vec::new(),
            functions: HashMap::new(),
        };
        let roots = outline.scope(tree.root_node(), &[]);

        let file = Arc::new(path.to_path_buf());
        roots
            .into_iter()
            .map(|id| freeze(&outline.drafts, id, &file))
            .collect()
    }
}

/// A declaration found by [`OutlineParser`].
pub struct OutlineElement {
    file: Arc<PathBuf>,
    kind: DeclKind,
    name: Option<String>,
    full_name: String,
    prototype: Option<String>,
    comment: String,
    children: Vec<Arc<dyn DeclElement>>,
    has_body: bool,
    definition: Option<usize>,
    declaration: Option<usize>,
    position: TextPosition,
}

impl DeclElement for OutlineElement {
    fn kind(&self) -> std::result::Result<DeclKind, HostError> {
        Ok(self.kind)
    }

    fn name(&self) -> std::result::Result<String, HostError> {
        self.name.clone().ok_or(HostError::PropertyUnavailable {
            node: self.position.line as u64,
            property: "name",
        })
    }

    fn full_name(&self) -> std::result::Result<String, HostError> {
        Ok(self.full_name.clone())
    }

    fn comment(&self) -> std::result::Result<String, HostError> {
        Ok(self.comment.clone())
    }

    fn prototype(&self) -> std::result::Result<String, HostError> {
        match &self.prototype {
            Some(prototype) => Ok(prototype.clone()),
            None => self.name(),
        }
    }

    fn children(&self) -> std::result::Result<Vec<Arc<dyn DeclElement>>, HostError> {
        Ok(self.children.clone())
    }

    fn defining_file(&self) -> std::result::Result<Option<PathBuf>, HostError> {
        Ok(match self.kind {
            DeclKind::Struct
            | DeclKind::Class
            | DeclKind::Union
            | DeclKind::Enum
            | DeclKind::Interface => self.has_body.then(|| self.file.as_ref().clone()),
            _ => None,
        })
    }

    fn has_body(&self) -> std::result::Result<bool, HostError> {
        Ok(self.has_body)
    }

    fn start_point(&self, at: Where) -> std::result::Result<TextPoint, HostError> {
        let offset = match at {
            Where::Definition => self.definition,
            Where::Declaration => self.declaration,
        };
        offset
            .map(|offset| TextPoint {
                file: self.file.as_ref().clone(),
                offset,
            })
            .ok_or(HostError::Unsupported("location not in this file"))
    }

    fn start_position(&self) -> std::result::Result<TextPosition, HostError> {
        Ok(self.position)
    }
}

struct Draft {
    kind: DeclKind,
    name: Option<String>,
    full_name: String,
    prototype: Option<String>,
    comment: String,
    children: Vec<usize>,
    has_body: bool,
    definition: Option<usize>,
    declaration: Option<usize>,
    position: TextPosition,
}

fn freeze(drafts: &[Draft], id: usize, file: &Arc<PathBuf>) -> Arc<dyn DeclElement> {
    let draft = &drafts[id];
    Arc::new(OutlineElement {
        file: Arc::clone(file),
        kind: draft.kind,
        name: draft.name.clone(),
        full_name: draft.full_name.clone(),
        prototype: draft.prototype.clone(),
        comment: draft.comment.clone(),
        children: draft
            .children
            .iter()
            .map(|&child| freeze(drafts, child, file))
            .collect(),
        has_body: draft.has_body,
        definition: draft.definition,
        declaration: draft.declaration,
        position: draft.position,
    })
}

struct Outline<'s> {
    source: &'s str,
    drafts: Vec<Draft>,
    /// Functions by (full name, prototype), so a definition completes the
    /// declaration seen earlier in the same file.
    functions: HashMap<(String, String), usize>,
}

impl<'s> Outline<'s> {
    fn text(&self, node: Node) -> &'s str {
        self.source.get(node.byte_range()).unwrap_or("")
    }

    fn push(&mut self, draft: Draft) -> usize {
        self.drafts.push(draft);
        self.drafts.len() - 1
    }

    /// Declarations directly inside `node`, qualified by `scope`.
    fn scope(&mut self, node: Node, scope: &[String]) -> Vec<usize> {
        let mut cursor = node.walk();
        let members: Vec<Node> = node.named_children(&mut cursor).collect();

        let mut ids = Vec::new();
        for member in members {
            match member.kind() {
                "namespace_definition" => ids.extend(self.namespace(member, scope)),
                kind if is_record(kind) => ids.extend(self.record(member, scope, None)),
                "declaration" | "field_declaration" => ids.extend(self.declaration(member, scope)),
                "type_definition" => ids.extend(self.type_definition(member, scope)),
                "function_definition" => {
                    let declarator = member
                        .child_by_field_name("declarator")
                        .and_then(function_declarator);
                    if let Some(declarator) = declarator {
                        ids.extend(self.function(member, declarator, scope, true));
                    }
                }
                kind if TRANSPARENT.contains(&kind) => ids.extend(self.scope(member, scope)),
                _ => {}
            }
        }
        ids
    }

    fn namespace(&mut self, node: Node, scope: &[String]) -> Vec<usize> {
        let Some(body) = node.child_by_field_name("body") else {
            return Vec::new();
        };
        let name = node.child_by_field_name("name");
        let parts = name
            .map(|name| split_qualified(self.text(name)))
            .unwrap_or_default();
        let inner = qualified(scope, &parts);
        let children = self.scope(body, &inner);

        // Anonymous namespaces add nothing to qualified names.
        let Some(name) = name.filter(|_| !parts.is_empty()) else {
            return children;
        };
        vec![self.push(Draft {
            kind: DeclKind::Namespace,
            name: Some(parts.join("::")),
            full_name: inner.join("::"),
            prototype: None,
            comment: String::new(),
            children,
            has_body: true,
            definition: None,
            declaration: None,
            position: position(name),
        })]
    }

    /// A class, struct, union or enum specifier. `alias` names an anonymous
    /// record, as the declarator of `typedef struct { ... } Name;` does.
    fn record(&mut self, node: Node, scope: &[String], alias: Option<Node>) -> Vec<usize> {
        let kind = match node.kind() {
            "class_specifier" => DeclKind::Class,
            "struct_specifier" => DeclKind::Struct,
            "union_specifier" => DeclKind::Union,
            _ => DeclKind::Enum,
        };
        let body = node.child_by_field_name("body");
        let name_node = node.child_by_field_name("name").or(alias);
        let parts = name_node
            .map(|name| split_qualified(self.text(name)))
            .unwrap_or_default();
        if parts.is_empty() && (body.is_none() || kind == DeclKind::Enum) {
            return Vec::new();
        }

        let full = qualified(scope, &parts);
        let children = match body {
            Some(body) if kind != DeclKind::Enum => self.scope(body, &full),
            _ => Vec::new(),
        };
        let anchor = name_node.unwrap_or(node);
        let offset = anchor.start_byte();
        let comment = self.leading_comment(node);
        vec![self.push(Draft {
            kind,
            name: parts.last().cloned(),
            full_name: full.join("::"),
            prototype: None,
            comment,
            children,
            has_body: body.is_some(),
            definition: body.is_some().then_some(offset),
            declaration: Some(offset),
            position: position(anchor),
        })]
    }

    /// `struct Point { ... } origin;` defines a record, `int add(int, int);`
    /// declares a function. Variables are skipped.
    fn declaration(&mut self, node: Node, scope: &[String]) -> Vec<usize> {
        let mut ids = Vec::new();
        if let Some(ty) = node.child_by_field_name("type") {
            if is_record(ty.kind()) && ty.child_by_field_name("body").is_some() {
                ids.extend(self.record(ty, scope, None));
            }
        }

        let mut cursor = node.walk();
        let declarators: Vec<Node> = node
            .children_by_field_name("declarator", &mut cursor)
            .collect();
        for declarator in declarators.into_iter().filter_map(function_declarator) {
            ids.extend(self.function(node, declarator, scope, false));
        }
        ids
    }

    fn type_definition(&mut self, node: Node, scope: &[String]) -> Vec<usize> {
        let Some(ty) = node.child_by_field_name("type").filter(|ty| is_record(ty.kind())) else {
            return Vec::new();
        };
        if ty.child_by_field_name("body").is_none() {
            return Vec::new();
        }
        let alias = node
            .child_by_field_name("declarator")
            .filter(|d| d.kind() == "type_identifier");
        self.record(ty, scope, alias)
    }

    fn function(
        &mut self,
        item: Node,
        declarator: Node,
        scope: &[String],
        is_definition: bool,
    ) -> Vec<usize> {
        let Some((qualifiers, name, name_node)) = declarator
            .child_by_field_name("declarator")
            .and_then(|node| self.function_name(node))
        else {
            return Vec::new();
        };
        let params = declarator
            .child_by_field_name("parameters")
            .map(|list| self.parameter_types(list))
            .unwrap_or_default();
        let prototype = format!("{}({})", name, params.join(", "));

        let mut parts = qualifiers;
        parts.push(name.clone());
        let full_name = qualified(scope, &parts).join("::");
        let offset = name_node.start_byte();
        let key = (full_name.clone(), prototype.clone());

        if let Some(&existing) = self.functions.get(&key) {
            let draft = &mut self.drafts[existing];
            if is_definition {
                draft.definition.get_or_insert(offset);
                draft.has_body = true;
            } else {
                draft.declaration.get_or_insert(offset);
            }
            return Vec::new();
        }

        let comment = self.leading_comment(item);
        let id = self.push(Draft {
            kind: DeclKind::Function,
            name: Some(name),
            full_name,
            prototype: Some(prototype),
            comment,
            children: Vec::new(),
            has_body: is_definition,
            definition: is_definition.then_some(offset),
            declaration: (!is_definition).then_some(offset),
            position: position(name_node),
        });
        self.functions.insert(key, id);
        vec![id]
    }

    /// Qualifiers, simple name and name node of a function declarator's
    /// `declarator` field.
    fn function_name<'t>(&self, node: Node<'t>) -> Option<(Vec<String>, String, Node<'t>)> {
        match node.kind() {
            "identifier" | "field_identifier" | "destructor_name" | "operator_name" => {
                Some((Vec::new(), compact(self.text(node)), node))
            }
            "template_function" => self.function_name(node.child_by_field_name("name")?),
            "qualified_identifier" => {
                let mut qualifiers = node
                    .child_by_field_name("scope")
                    .map(|scope| split_qualified(self.text(scope)))
                    .unwrap_or_default();
                let (rest, name, at) = self.function_name(node.child_by_field_name("name")?)?;
                qualifiers.extend(rest);
                Some((qualifiers, name, at))
            }
            _ => None,
        }
    }

    fn parameter_types(&self, list: Node) -> Vec<String> {
        let mut cursor = list.walk();
        let types: Vec<String> = list
            .children(&mut cursor)
            .filter_map(|param| match param.kind() {
                "..." => Some("...".to_string()),
                "parameter_declaration"
                | "optional_parameter_declaration"
                | "variadic_parameter_declaration" => self.parameter_type(param),
                _ => None,
            })
            .filter(|ty| !ty.is_empty())
            .collect();

        if types.len() == 1 && types[0] == "void" {
            Vec::new()
        } else {
            types
        }
    }

    /// One parameter reduced to its type: the name and any default value
    /// are dropped.
    fn parameter_type(&self, param: Node) -> Option<String> {
        let declarator = param.child_by_field_name("declarator");
        let start = param.start_byte();
        let end = match (declarator, param.child_by_field_name("type")) {
            (Some(declarator), _) => declarator.end_byte(),
            (None, Some(ty)) => ty.end_byte(),
            (None, None) => param.end_byte(),
        };
        let mut text = self.source.get(start..end)?.to_string();

        if let Some(name) = declarator.and_then(declared_name) {
            let from = name.start_byte().checked_sub(start)?;
            let to = name.end_byte().checked_sub(start)?;
            if to <= text.len() && text.is_char_boundary(from) && text.is_char_boundary(to) {
                text.replace_range(from..to, "");
            }
        }
        Some(compact(&text))
    }

    /// Own-line comments directly above `node`, or above the template or
    /// declaration that wraps it.
    fn leading_comment(&self, node: Node) -> String {
        let mut anchor = node;
        while let Some(parent) = anchor.parent() {
            if !matches!(
                parent.kind(),
                "template_declaration" | "declaration" | "field_declaration" | "type_definition"
            ) {
                break;
            }
            anchor = parent;
        }

        let mut lines = Vec::new();
        let mut next_row = anchor.start_position().row;
        let mut current = anchor.prev_sibling();
        while let Some(sibling) = current {
            if sibling.kind() != "comment" || sibling.end_position().row + 1 != next_row {
                break;
            }
            let trailing = sibling
                .prev_sibling()
                .is_some_and(|code| code.end_position().row == sibling.start_position().row);
            if trailing {
                break;
            }
            lines.push(comment_text(self.text(sibling)));
            next_row = sibling.start_position().row;
            current = sibling.prev_sibling();
        }

        lines.reverse();
        lines.retain(|line| !line.is_empty());
        lines.join("\n")
    }
}

fn is_record(kind: &str) -> bool {
    matches!(
        kind,
        "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier"
    )
}

fn last_named_child(node: Node) -> Option<Node> {
    let mut cursor = node.walk();
    let last = node.named_children(&mut cursor).last();
    last
}

/// The function declarator in `node`, looking through the pointer and
/// reference declarators of a return type.
fn function_declarator(node: Node) -> Option<Node> {
    match node.kind() {
        "function_declarator" => Some(node),
        "pointer_declarator" | "reference_declarator" | "attributed_declarator" => {
            let inner = node
                .child_by_field_name("declarator")
                .or_else(|| last_named_child(node))?;
            function_declarator(inner)
        }
        _ => None,
    }
}

/// The identifier a declarator introduces, if it names one.
fn declared_name(node: Node) -> Option<Node> {
    match node.kind() {
        "identifier" | "field_identifier" => Some(node),
        _ => {
            let inner = node
                .child_by_field_name("declarator")
                .or_else(|| last_named_child(node))?;
            declared_name(inner)
        }
    }
}

fn position(node: Node) -> TextPosition {
    let point = node.start_position();
    TextPosition {
        line: point.row + 1,
        column: point.column + 1,
    }
}

fn qualified(scope: &[String], parts: &[String]) -> Vec<String> {
    scope.iter().chain(parts).cloned().collect()
}

/// `ui :: Map<K, V>` becomes `["ui", "Map"]`.
fn split_qualified(text: &str) -> Vec<String> {
    let mut plain = String::new();
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            c if depth == 0 && !c.is_whitespace() => plain.push(c),
            _ => {}
        }
    }
    plain
        .split("::")
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Source text on one line, with a space only where two words meet:
/// `const std::string &` becomes `const std::string&`.
fn compact(text: &str) -> String {
    let mut out = String::new();
    for word in text.split_whitespace() {
        let spaced = out.chars().last().is_some_and(is_word_char)
            && word.chars().next().is_some_and(is_word_char);
        if spaced || out.ends_with(',') {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

fn comment_text(raw: &str) -> String {
    if let Some(line) = raw.strip_prefix("//") {
        return line.trim_start_matches(['/', '!']).trim().to_string();
    }
    raw.trim_start_matches("/*")
        .trim_end_matches("*/")
        .lines()
        .map(|line| line.trim().trim_start_matches(['*', '!']).trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
