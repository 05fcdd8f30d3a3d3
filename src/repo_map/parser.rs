//! Tree-sitter parsing shared by the repository map and the syntax checker.

use std::cell::RefCell;

use tree_sitter::{Node, Parser, Tree};

use super::{Language, Symbol, SymbolKind};

// Parsers are reusable across files of the same language; keep one per
// language per thread.
thread_local! {
    static RUST_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_rust::LANGUAGE.into());
        p
    });

    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });

    static JS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });

    static TS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into());
        p
    });

    static TSX_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into());
        p
    });

    static GO_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_go::LANGUAGE.into());
        p
    });
}

/// Parse `content` with the pooled parser for `language`.
///
/// Returns `None` when tree-sitter gives up (cancellation or a language
/// version mismatch); callers treat that the same as a syntax error.
pub fn parse(content: &str, language: Language) -> Option<Tree> {
    let run = |p: &RefCell<Parser>| p.borrow_mut().parse(content, None);
    match language {
        Language::Rust => RUST_PARSER.with(run),
        Language::Python => PYTHON_PARSER.with(run),
        Language::JavaScript => JS_PARSER.with(run),
        Language::TypeScript => TS_PARSER.with(run),
        Language::Tsx => TSX_PARSER.with(run),
        Language::Go => GO_PARSER.with(run),
    }
}

/// First syntax problem in a parsed tree, as a 1-based line and a message.
pub fn first_syntax_error(tree: &Tree, content: &str) -> Option<(usize, String)> {
    let root = tree.root_node();
    if !root.has_error() {
        return None;
    }

    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_missing() {
            return Some((
                node.start_position().row + 1,
                format!("missing `{}`", node.kind()),
            ));
        }
        if node.is_error() {
            let snippet = collapse_whitespace(node_text(&node, content));
            let snippet = crate::util::truncate_chars(&snippet, 40).to_string();
            return Some((
                node.start_position().row + 1,
                format!("syntax error near `{}`", snippet),
            ));
        }

        // Only descend into subtrees that contain the error.
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return Some((root.start_position().row + 1, "syntax error".to_string()));
            }
        }
    }
}

/// Top-level symbol outline of a parsed file.
pub fn outline(tree: &Tree, content: &str, language: Language) -> Vec<Symbol> {
    let root = tree.root_node();
    let mut cursor = root.walk();
    let mut symbols = Vec::new();
    for node in root.named_children(&mut cursor) {
        match language {
            Language::Rust => rust_item(&node, content, &mut symbols),
            Language::Python => python_item(&node, content, &mut symbols),
            Language::JavaScript | Language::TypeScript | Language::Tsx => {
                js_item(&node, content, &mut symbols)
            }
            Language::Go => go_item(&node, content, &mut symbols),
        }
    }
    symbols
}

// ── Rust ────────────────────────────────────────────────────────────────

fn rust_item(node: &Node, content: &str, out: &mut Vec<Symbol>) {
    let kind = match node.kind() {
        "function_item" | "function_signature_item" => SymbolKind::Function,
        "struct_item" | "union_item" => SymbolKind::Struct,
        "enum_item" => SymbolKind::Enum,
        "trait_item" => SymbolKind::Trait,
        "impl_item" => SymbolKind::Impl,
        "type_item" => SymbolKind::Type,
        "const_item" | "static_item" => SymbolKind::Const,
        "mod_item" => SymbolKind::Module,
        "use_declaration" => SymbolKind::Import,
        "macro_definition" => SymbolKind::Macro,
        _ => return,
    };

    let mut symbol = Symbol::new(kind, header(node, content), node);
    if matches!(kind, SymbolKind::Impl | SymbolKind::Trait)
        && let Some(body) = node.child_by_field_name("body")
    {
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            if matches!(member.kind(), "function_item" | "function_signature_item") {
                symbol
                    .members
                    .push(Symbol::new(SymbolKind::Method, header(&member, content), &member));
            }
        }
    }
    out.push(symbol);
}

// ── Python ──────────────────────────────────────────────────────────────

fn python_item(node: &Node, content: &str, out: &mut Vec<Symbol>) {
    let node = unwrap_decorated(node);
    match node.kind() {
        "function_definition" => {
            out.push(Symbol::new(SymbolKind::Function, header(&node, content), &node));
        }
        "class_definition" => {
            let mut symbol = Symbol::new(SymbolKind::Class, header(&node, content), &node);
            if let Some(body) = node.child_by_field_name("body") {
                let mut cursor = body.walk();
                for member in body.named_children(&mut cursor) {
                    let member = unwrap_decorated(&member);
                    if member.kind() == "function_definition" {
                        symbol.members.push(Symbol::new(
                            SymbolKind::Method,
                            header(&member, content),
                            &member,
                        ));
                    }
                }
            }
            out.push(symbol);
        }
        "import_statement" | "import_from_statement" => {
            out.push(Symbol::new(SymbolKind::Import, header(&node, content), &node));
        }
        _ => {}
    }
}

fn unwrap_decorated<'a>(node: &Node<'a>) -> Node<'a> {
    if node.kind() == "decorated_definition"
        && let Some(inner) = node.child_by_field_name("definition")
    {
        return inner;
    }
    *node
}

// ── JavaScript / TypeScript ─────────────────────────────────────────────

fn js_item(node: &Node, content: &str, out: &mut Vec<Symbol>) {
    match node.kind() {
        "export_statement" => {
            if let Some(decl) = node.child_by_field_name("declaration") {
                js_item(&decl, content, out);
            }
        }
        "function_declaration" | "generator_function_declaration" | "function_signature" => {
            out.push(Symbol::new(SymbolKind::Function, header(node, content), node));
        }
        "class_declaration" | "abstract_class_declaration" => {
            let mut symbol = Symbol::new(SymbolKind::Class, header(node, content), node);
            if let Some(body) = node.child_by_field_name("body") {
                let mut cursor = body.walk();
                for member in body.named_children(&mut cursor) {
                    if matches!(member.kind(), "method_definition" | "method_signature") {
                        symbol.members.push(Symbol::new(
                            SymbolKind::Method,
                            header(&member, content),
                            &member,
                        ));
                    }
                }
            }
            out.push(symbol);
        }
        "interface_declaration" => {
            out.push(Symbol::new(SymbolKind::Interface, header(node, content), node));
        }
        "type_alias_declaration" => {
            out.push(Symbol::new(SymbolKind::Type, header(node, content), node));
        }
        "enum_declaration" => {
            out.push(Symbol::new(SymbolKind::Enum, header(node, content), node));
        }
        "lexical_declaration" | "variable_declaration" => {
            // `const handler = (req) => { ... }`
            let mut cursor = node.walk();
            for declarator in node.named_children(&mut cursor) {
                let is_function = declarator
                    .child_by_field_name("value")
                    .map(|v| matches!(v.kind(), "arrow_function" | "function_expression" | "function"))
                    .unwrap_or(false);
                if declarator.kind() == "variable_declarator" && is_function {
                    let value = declarator.child_by_field_name("value");
                    let text = match value.and_then(|v| v.child_by_field_name("body")) {
                        Some(body) => &content[node.start_byte()..body.start_byte()],
                        None => node_text(node, content),
                    };
                    out.push(Symbol::new(SymbolKind::Function, clean_header(text), node));
                }
            }
        }
        "import_statement" => {
            out.push(Symbol::new(SymbolKind::Import, header(node, content), node));
        }
        _ => {}
    }
}

// ── Go ──────────────────────────────────────────────────────────────────

fn go_item(node: &Node, content: &str, out: &mut Vec<Symbol>) {
    let kind = match node.kind() {
        "function_declaration" => SymbolKind::Function,
        "method_declaration" => SymbolKind::Method,
        "type_declaration" => SymbolKind::Type,
        "import_declaration" => SymbolKind::Import,
        "const_declaration" => SymbolKind::Const,
        _ => return,
    };
    let signature = if kind == SymbolKind::Type {
        let first_line = node_text(node, content).lines().next().unwrap_or_default();
        clean_header(first_line)
    } else {
        header(node, content)
    };
    out.push(Symbol::new(kind, signature, node));
}

// ── helpers ─────────────────────────────────────────────────────────────

const MAX_SIGNATURE_CHARS: usize = 160;

/// Declaration text up to (not including) its body.
fn header(node: &Node, content: &str) -> String {
    let end = node
        .child_by_field_name("body")
        .map(|body| body.start_byte())
        .unwrap_or_else(|| node.end_byte());
    clean_header(&content[node.start_byte()..end])
}

fn clean_header(text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    let trimmed = collapsed
        .trim_end_matches(|c: char| c == '{' || c == ':' || c == ';' || c.is_whitespace())
        .trim_end_matches("=>")
        .trim_end();
    let truncated = crate::util::truncate_chars(trimmed, MAX_SIGNATURE_CHARS);
    if truncated.len() < trimmed.len() {
        format!("{}…", truncated)
    } else {
        truncated.to_string()
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn node_text<'a>(node: &Node, content: &'a str) -> &'a str {
    node.utf8_text(content.as_bytes()).unwrap_or_default()
}
