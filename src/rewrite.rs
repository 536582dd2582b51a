//! The rewriting passes: runtime-import injection, per-function argument and
//! return guarding, and annotated-assignment guarding.
//!
//! One depth-first pre-order walk over the tree. Function bodies are visited
//! before the function's own body list is finalized, so nested functions are
//! independently instrumented first and synthesized fragments are never
//! re-visited.

use crate::ast::{self, ExprText, FunctionDef, Module, Stmt, StmtKind};
use crate::error::Error;
use crate::parser::{contains_token, is_string_literal};
use crate::synth;

/// Apply all passes to a freshly parsed module. No-op for an empty module.
pub fn instrument_module(module: &mut Module) -> Result<(), Error> {
    if module.body.is_empty() {
        return Ok(());
    }
    inject_runtime_import(&mut module.body);
    visit_body(&mut module.body)
}

/// Splice the guard import just after the last contiguous leading import, or
/// at `max(first_non_import - 1, 1)` when the module opens with something
/// else (which lands it after a module docstring). Must run before any pass
/// that references the guard aliases.
fn inject_runtime_import(body: &mut Vec<Stmt>) {
    let leading_imports = body
        .iter()
        .take_while(|s| matches!(s.kind, StmtKind::Import(_)))
        .count();
    let at = if leading_imports > 0 {
        leading_imports
    } else {
        1.min(body.len())
    };

    let mut fragment = synth::runtime_import();
    let anchor = body[at.min(body.len() - 1)].line;
    ast::relocate(&mut fragment, anchor);
    body.insert(at, fragment);
}

fn visit_body(body: &mut [Stmt]) -> Result<(), Error> {
    for stmt in body.iter_mut() {
        visit_stmt(stmt)?;
    }
    Ok(())
}

fn visit_stmt(stmt: &mut Stmt) -> Result<(), Error> {
    let line = stmt.line;
    match &mut stmt.kind {
        StmtKind::FunctionDef(f) => {
            // children first: nested defs get their own guards before the
            // outer body list is finalized
            visit_body(&mut f.body)?;
            instrument_function(f, line)
        }
        StmtKind::Compound(clauses) => {
            for clause in clauses {
                visit_body(&mut clause.body)?;
            }
            Ok(())
        }
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
        } => {
            if let Some(v) = value {
                let mut wrapped = synth::assign_guard(target, v, annotation);
                ast::relocate_expr(&mut wrapped, line);
                *v = wrapped;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn instrument_function(f: &mut FunctionDef, def_line: u32) -> Result<(), Error> {
    let Some(&Stmt {
        line: first_line, ..
    }) = f.body.first()
    else {
        return Err(Error::Structural(format!(
            "function '{}' at line {def_line} has an empty body",
            f.name
        )));
    };

    if !has_yield(&f.body) {
        if let Some(expected) = f.returns.clone() {
            let mut inserted = false;
            for stmt in f.body.iter_mut() {
                let mut rewriter = ReturnRewriter {
                    expected: &expected,
                    stopped: false,
                    wrapped: false,
                };
                rewriter.rewrite(stmt);
                inserted |= rewriter.wrapped;
            }
            // a function that can fall off the end implicitly returns None;
            // check that against the declared type too
            if let Some(last) = f.body.last() {
                if !matches!(last.kind, StmtKind::Return(_)) {
                    let anchor = last.line;
                    let mut fragment = synth::fallthrough_return_guard(&expected);
                    ast::relocate(&mut fragment, anchor);
                    f.body.push(fragment);
                    inserted = true;
                }
            }
            if inserted {
                tracing::debug!(line = def_line, function = %f.name, "inserted return guard");
            }
        }
    }

    if f.params.iter().any(|p| p.annotation.is_some()) {
        let insert_at = if has_docstring(&f.body) { 1 } else { 0 };
        let mut guards = Vec::new();
        for param in &f.params {
            if param.name.starts_with('*') || param.name == "/" {
                continue;
            }
            if let Some(annotation) = &param.annotation {
                let mut guard = synth::arg_guard(&param.name, annotation);
                ast::relocate(&mut guard, first_line);
                guards.push(guard);
            }
        }
        let tail = f.body.split_off(insert_at);
        f.body.extend(guards);
        f.body.extend(tail);
        tracing::debug!(line = def_line, function = %f.name, "inserted argument guards");
    }

    Ok(())
}

/// Wraps direct `return` statements in one top-level body statement.
///
/// A nested `def` stops rewriting for the remainder of that statement's
/// subtree; nested functions are still guarded on their own visit, and
/// each top-level statement starts with a fresh rewriter.
struct ReturnRewriter<'a> {
    expected: &'a ExprText,
    stopped: bool,
    /// Set when at least one `return` was wrapped.
    wrapped: bool,
}

impl ReturnRewriter<'_> {
    fn rewrite(&mut self, stmt: &mut Stmt) {
        if self.stopped {
            return;
        }
        let line = stmt.line;
        match &mut stmt.kind {
            StmtKind::FunctionDef(_) => self.stopped = true,
            StmtKind::Return(value) => {
                let mut guarded = synth::return_guard(value.as_ref(), self.expected);
                ast::relocate_expr(&mut guarded, line);
                *value = Some(guarded);
                self.wrapped = true;
            }
            StmtKind::Compound(clauses) => {
                for clause in clauses.iter_mut() {
                    for inner in clause.body.iter_mut() {
                        self.rewrite(inner);
                    }
                }
            }
            _ => {}
        }
    }
}

/// True iff the first statement is a bare string-literal expression.
pub fn has_docstring(body: &[Stmt]) -> bool {
    match body.first().map(|s| &s.kind) {
        Some(StmtKind::Other(text)) => is_string_literal(text),
        _ => false,
    }
}

/// Full recursive scan for a `yield` point; a generator's return semantics
/// make value-checking its `return` meaningless, so a hit disqualifies
/// return guarding.
pub fn has_yield(body: &[Stmt]) -> bool {
    body.iter().any(stmt_has_yield)
}

fn stmt_has_yield(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Import(_) => false,
        StmtKind::Other(text) => contains_token(text, "yield"),
        StmtKind::Return(value) => value
            .as_ref()
            .is_some_and(|v| contains_token(&v.text, "yield")),
        StmtKind::AnnAssign { value, .. } => value
            .as_ref()
            .is_some_and(|v| contains_token(&v.text, "yield")),
        StmtKind::FunctionDef(f) => has_yield(&f.body),
        StmtKind::Compound(clauses) => clauses
            .iter()
            .any(|c| contains_token(&c.header, "yield") || has_yield(&c.body)),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::parser::parse_module;

    fn instrumented(source: &str) -> Module {
        let mut module = parse_module(source, &PathBuf::from("test.py")).unwrap();
        instrument_module(&mut module).unwrap();
        module
    }

    fn function<'a>(module: &'a Module, name: &str) -> &'a FunctionDef {
        module
            .body
            .iter()
            .find_map(|s| match &s.kind {
                StmtKind::FunctionDef(f) if f.name == name => Some(f),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no function {name:?}"))
    }

    fn is_guard_import(stmt: &Stmt) -> bool {
        matches!(&stmt.kind, StmtKind::Import(text) if text.contains(synth::RUNTIME_MODULE))
    }

    #[test]
    fn import_lands_after_three_leading_imports() {
        let module = instrumented(
            "import os\nimport sys\nimport re\ndef f(x: int) -> int:\n    return x\n",
        );
        assert!(is_guard_import(&module.body[3]), "got {:?}", module.body[3]);
    }

    #[test]
    fn import_lands_after_one_leading_import() {
        let module = instrumented("import os\ndef f(x: int) -> int:\n    return x\n");
        assert!(is_guard_import(&module.body[1]), "got {:?}", module.body[1]);
    }

    #[test]
    fn import_lands_at_index_one_without_leading_imports() {
        let module = instrumented("x = 1\ndef f(y: int) -> int:\n    return y\n");
        assert!(is_guard_import(&module.body[1]), "got {:?}", module.body[1]);
    }

    #[test]
    fn empty_module_is_left_alone() {
        let module = instrumented("");
        assert!(module.body.is_empty());
    }

    #[test]
    fn generator_gets_no_return_guard() {
        let module = instrumented("def gen(n) -> int:\n    yield n\n    return n\n");
        let f = function(&module, "gen");
        assert_eq!(f.body.len(), 2, "body must be unchanged");
        match &f.body[1].kind {
            StmtKind::Return(Some(v)) => assert_eq!(v.text, "n"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn argument_guards_follow_the_docstring_in_declaration_order() {
        let module = instrumented(
            "def f(a: int, b: str, c):\n    \"doc\"\n    x = a\n    return x\n",
        );
        let f = function(&module, "f");
        assert_eq!(f.body.len(), 5);
        assert!(has_docstring(&f.body));
        match (&f.body[1].kind, &f.body[2].kind) {
            (StmtKind::Other(first), StmtKind::Other(second)) => {
                assert!(first.starts_with("__guard_arg__('a'"), "got {first}");
                assert!(second.starts_with("__guard_arg__('b'"), "got {second}");
            }
            other => panic!("unexpected kinds: {other:?}"),
        }
        match &f.body[3].kind {
            StmtKind::Other(text) => assert_eq!(text, "x = a"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn argument_guards_anchor_to_the_first_body_statement() {
        let module = instrumented("def f(a: int):\n    \"doc\"\n    return a\n");
        let f = function(&module, "f");
        assert_eq!(f.body[1].line, 2, "guard takes the docstring's line");
    }

    #[test]
    fn unannotated_parameters_get_no_guard() {
        let module = instrumented("def f(a, b):\n    return a\n");
        let f = function(&module, "f");
        assert_eq!(f.body.len(), 1);
    }

    #[test]
    fn fall_through_guard_is_appended_exactly_once() {
        let module = instrumented("def g() -> int:\n    x = 1\n    y = 2\n    z = 3\n");
        let f = function(&module, "g");
        assert_eq!(f.body.len(), 4);
        match &f.body[3].kind {
            StmtKind::Other(text) => {
                assert_eq!(text, "__guard_return__(None, int, globals())");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        assert_eq!(f.body[3].line, 4, "anchored to the last original statement");
    }

    #[test]
    fn every_direct_return_is_wrapped() {
        let module = instrumented(
            "def f(x) -> int:\n    if x:\n        return 1\n    return 2\n",
        );
        let f = function(&module, "f");
        match &f.body[0].kind {
            StmtKind::Compound(clauses) => match &clauses[0].body[0].kind {
                StmtKind::Return(Some(v)) => {
                    assert_eq!(v.text, "__guard_return__(1, int, globals())")
                }
                other => panic!("unexpected kind: {other:?}"),
            },
            other => panic!("unexpected kind: {other:?}"),
        }
        match &f.body[1].kind {
            StmtKind::Return(Some(v)) => {
                assert_eq!(v.text, "__guard_return__(2, int, globals())")
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn returns_after_a_nested_def_in_the_same_subtree_are_skipped() {
        let source = "\
def outer(flag) -> int:
    if flag:
        def inner() -> int:
            return 1
        return 2
    return 3
";
        let module = instrumented(source);
        let outer = function(&module, "outer");

        let (inner, sibling_return) = match &outer.body[0].kind {
            StmtKind::Compound(clauses) => {
                let inner = match &clauses[0].body[0].kind {
                    StmtKind::FunctionDef(f) => f,
                    other => panic!("unexpected kind: {other:?}"),
                };
                (inner, &clauses[0].body[1])
            }
            other => panic!("unexpected kind: {other:?}"),
        };

        // the nested function was still guarded on its own visit
        match &inner.body[0].kind {
            StmtKind::Return(Some(v)) => {
                assert_eq!(v.text, "__guard_return__(1, int, globals())")
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        // the sibling return after the nested def is left alone
        match &sibling_return.kind {
            StmtKind::Return(Some(v)) => assert_eq!(v.text, "2"),
            other => panic!("unexpected kind: {other:?}"),
        }
        // the next top-level statement gets a fresh rewriter
        match &outer.body[1].kind {
            StmtKind::Return(Some(v)) => {
                assert_eq!(v.text, "__guard_return__(3, int, globals())")
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn module_docstring_keeps_the_first_slot() {
        let module = instrumented("\"\"\"module doc\"\"\"\nimport os\nx: int = 1\n");
        assert!(
            matches!(&module.body[0].kind, StmtKind::Other(t) if t.starts_with("\"\"\"")),
            "docstring must stay first"
        );
        assert!(is_guard_import(&module.body[1]), "got {:?}", module.body[1]);
    }

    #[test]
    fn returns_inside_match_arms_are_wrapped() {
        let module = instrumented(
            "def f(x) -> int:\n    match x:\n        case 0:\n            return 1\n    return x\n",
        );
        let f = function(&module, "f");
        let arm_return = match &f.body[0].kind {
            StmtKind::Compound(match_clauses) => match &match_clauses[0].body[0].kind {
                StmtKind::Compound(case_clauses) => &case_clauses[0].body[0],
                other => panic!("unexpected kind: {other:?}"),
            },
            other => panic!("unexpected kind: {other:?}"),
        };
        match &arm_return.kind {
            StmtKind::Return(Some(v)) => {
                assert_eq!(v.text, "__guard_return__(1, int, globals())")
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn rewriter_reports_no_wrap_past_a_nested_def() {
        let mut module = parse_module(
            "def inner():\n    pass\nreturn 1\n",
            &PathBuf::from("fragment.py"),
        )
        .unwrap();
        let expected = ExprText::new(1, "int");
        let mut wrapped_any = false;
        for stmt in module.body.iter_mut() {
            let mut rewriter = ReturnRewriter {
                expected: &expected,
                stopped: false,
                wrapped: false,
            };
            rewriter.rewrite(stmt);
            wrapped_any |= rewriter.wrapped;
        }
        // the def stops the first rewriter; the second statement's fresh
        // rewriter does wrap
        assert!(wrapped_any);

        let mut rewriter = ReturnRewriter {
            expected: &expected,
            stopped: false,
            wrapped: false,
        };
        rewriter.rewrite(&mut module.body[0]);
        assert!(!rewriter.wrapped, "a def alone must report no wrap");
    }

    #[test]
    fn annotated_assignment_value_is_wrapped() {
        let module = instrumented("import os\nx: int = compute()\n");
        match &module.body[2].kind {
            StmtKind::AnnAssign { value, .. } => {
                assert_eq!(
                    value.as_ref().unwrap().text,
                    "__guard_assign__('x', compute(), int, globals())"
                );
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn annotation_without_value_is_untouched() {
        let module = instrumented("import os\nx: int\n");
        match &module.body[2].kind {
            StmtKind::AnnAssign { value, .. } => assert!(value.is_none()),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn methods_inside_classes_are_instrumented() {
        let module = instrumented(
            "class C:\n    def m(self, x: int) -> int:\n        return x\n",
        );
        let class = match &module.body[0].kind {
            StmtKind::Compound(clauses) => &clauses[0],
            other => panic!("unexpected kind: {other:?}"),
        };
        let m = match &class.body[0].kind {
            StmtKind::FunctionDef(f) => f,
            other => panic!("unexpected kind: {other:?}"),
        };
        match &m.body[0].kind {
            StmtKind::Other(text) => assert!(text.starts_with("__guard_arg__('x'")),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn starred_parameters_are_not_guarded() {
        let module = instrumented("def f(a: int, *args: int, **kwargs):\n    return a\n");
        let f = function(&module, "f");
        let guard_count = f
            .body
            .iter()
            .filter(|s| matches!(&s.kind, StmtKind::Other(t) if t.starts_with("__guard_arg__")))
            .count();
        assert_eq!(guard_count, 1);
    }
}
