//! Line-aware syntax tree for the instrumented Python subset.
//!
//! Expressions are carried as source text plus the line they start on; the
//! rewriter never evaluates them, it only re-renders them inside guard calls.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub line: u32,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `import x` / `from x import y`, kept verbatim.
    Import(String),
    Return(Option<ExprText>),
    /// `target: annotation [= value]`.
    AnnAssign {
        target: String,
        annotation: ExprText,
        value: Option<ExprText>,
    },
    FunctionDef(FunctionDef),
    /// Header-plus-block statements (`if`/`elif`/`else`, `for`, `while`,
    /// `with`, `try`/`except`/`finally`, `class`). Headers are kept verbatim
    /// without the trailing colon.
    Compound(Vec<Clause>),
    /// Any other simple statement, kept verbatim.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub line: u32,
    pub header: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub decorators: Vec<ExprText>,
    pub params: Vec<Param>,
    pub returns: Option<ExprText>,
    pub is_async: bool,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name as written, including `*`/`**` markers.
    pub name: String,
    pub annotation: Option<ExprText>,
    pub default: Option<ExprText>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprText {
    pub line: u32,
    pub text: String,
}

impl ExprText {
    pub fn new(line: u32, text: impl Into<String>) -> Self {
        Self {
            line,
            text: text.into(),
        }
    }
}

/// Shift every line number inside a synthesized fragment so its first line
/// coincides with `anchor_line`. Fragments are built at line 1, so the offset
/// is `anchor_line - 1`. Call once per splice: relocating the same fragment
/// against a second anchor compounds the offset.
pub fn relocate(stmt: &mut Stmt, anchor_line: u32) {
    shift_stmt(stmt, anchor_line.saturating_sub(1));
}

/// Same contract as [`relocate`] for a bare expression.
pub fn relocate_expr(expr: &mut ExprText, anchor_line: u32) {
    expr.line += anchor_line.saturating_sub(1);
}

fn shift_stmt(stmt: &mut Stmt, offset: u32) {
    stmt.line += offset;
    match &mut stmt.kind {
        StmtKind::Import(_) | StmtKind::Other(_) => {}
        StmtKind::Return(value) => {
            if let Some(v) = value {
                v.line += offset;
            }
        }
        StmtKind::AnnAssign {
            annotation, value, ..
        } => {
            annotation.line += offset;
            if let Some(v) = value {
                v.line += offset;
            }
        }
        StmtKind::FunctionDef(f) => {
            for d in &mut f.decorators {
                d.line += offset;
            }
            for p in &mut f.params {
                if let Some(a) = &mut p.annotation {
                    a.line += offset;
                }
                if let Some(d) = &mut p.default {
                    d.line += offset;
                }
            }
            if let Some(r) = &mut f.returns {
                r.line += offset;
            }
            for s in &mut f.body {
                shift_stmt(s, offset);
            }
        }
        StmtKind::Compound(clauses) => {
            for c in clauses {
                c.line += offset;
                for s in &mut c.body {
                    shift_stmt(s, offset);
                }
            }
        }
    }
}

/// Render a module back to Python source with 4-space indentation.
/// Opaque statements come out verbatim, so a parse/render round trip keeps
/// the code the host interpreter sees recognizable.
pub fn to_source(module: &Module) -> String {
    let mut out = String::new();
    for stmt in &module.body {
        render_stmt(stmt, 0, &mut out);
    }
    out
}

fn render_stmt(stmt: &Stmt, depth: usize, out: &mut String) {
    let pad = "    ".repeat(depth);
    match &stmt.kind {
        StmtKind::Import(text) | StmtKind::Other(text) => {
            out.push_str(&pad);
            out.push_str(text);
            out.push('\n');
        }
        StmtKind::Return(value) => {
            out.push_str(&pad);
            match value {
                Some(v) => {
                    out.push_str("return ");
                    out.push_str(&v.text);
                }
                None => out.push_str("return"),
            }
            out.push('\n');
        }
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
        } => {
            out.push_str(&pad);
            out.push_str(target);
            out.push_str(": ");
            out.push_str(&annotation.text);
            if let Some(v) = value {
                out.push_str(" = ");
                out.push_str(&v.text);
            }
            out.push('\n');
        }
        StmtKind::FunctionDef(f) => {
            for d in &f.decorators {
                out.push_str(&pad);
                out.push('@');
                out.push_str(&d.text);
                out.push('\n');
            }
            out.push_str(&pad);
            if f.is_async {
                out.push_str("async ");
            }
            out.push_str("def ");
            out.push_str(&f.name);
            out.push('(');
            for (i, p) in f.params.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&p.name);
                if let Some(a) = &p.annotation {
                    out.push_str(": ");
                    out.push_str(&a.text);
                }
                if let Some(d) = &p.default {
                    if p.annotation.is_some() {
                        out.push_str(" = ");
                    } else {
                        out.push('=');
                    }
                    out.push_str(&d.text);
                }
            }
            out.push(')');
            if let Some(r) = &f.returns {
                out.push_str(" -> ");
                out.push_str(&r.text);
            }
            out.push_str(":\n");
            render_body(&f.body, depth + 1, out);
        }
        StmtKind::Compound(clauses) => {
            for c in clauses {
                out.push_str(&pad);
                out.push_str(&c.header);
                out.push_str(":\n");
                render_body(&c.body, depth + 1, out);
            }
        }
    }
}

fn render_body(body: &[Stmt], depth: usize, out: &mut String) {
    if body.is_empty() {
        out.push_str(&"    ".repeat(depth));
        out.push_str("pass\n");
        return;
    }
    for stmt in body {
        render_stmt(stmt, depth, out);
    }
}
