//! Builders for the guard-call fragments the rewriter splices in.
//!
//! Every fragment is constructed at line 1; callers relocate it against the
//! node it is spliced next to (see [`crate::ast::relocate`]). Each guard call
//! receives the defining module's namespace (`globals()`) as an explicit
//! forward-reference resolution context.

use crate::ast::{ExprText, Stmt, StmtKind};

/// Python module the injected import pulls the guard functions from.
pub const RUNTIME_MODULE: &str = "typefence_runtime";

pub const ARG_GUARD: &str = "__guard_arg__";
pub const ASSIGN_GUARD: &str = "__guard_assign__";
pub const RETURN_GUARD: &str = "__guard_return__";

/// `from typefence_runtime import guard_arg as __guard_arg__, ...`
pub fn runtime_import() -> Stmt {
    Stmt {
        line: 1,
        kind: StmtKind::Import(format!(
            "from {RUNTIME_MODULE} import guard_arg as {ARG_GUARD}, \
             guard_assign as {ASSIGN_GUARD}, guard_return as {RETURN_GUARD}"
        )),
    }
}

/// Statement validating one annotated parameter, e.g.
/// `__guard_arg__('x', x, int, globals())`.
pub fn arg_guard(name: &str, annotation: &ExprText) -> Stmt {
    Stmt {
        line: 1,
        kind: StmtKind::Other(format!(
            "{ARG_GUARD}('{name}', {name}, {}, globals())",
            annotation.text
        )),
    }
}

/// Expression wrapping an annotated assignment's initializer; the guard
/// returns the value unchanged on success, so the assignment is unaffected.
pub fn assign_guard(target: &str, value: &ExprText, annotation: &ExprText) -> ExprText {
    ExprText::new(
        1,
        format!(
            "{ASSIGN_GUARD}('{target}', {}, {}, globals())",
            value.text, annotation.text
        ),
    )
}

/// Expression wrapping a `return` value; a bare `return` checks `None`.
pub fn return_guard(value: Option<&ExprText>, expected: &ExprText) -> ExprText {
    let value_text = value.map(|v| v.text.as_str()).unwrap_or("None");
    ExprText::new(
        1,
        format!("{RETURN_GUARD}({value_text}, {}, globals())", expected.text),
    )
}

/// Statement appended when a guarded function can fall off the end: models
/// the implicit `return None` and checks it against the declared type.
pub fn fallthrough_return_guard(expected: &ExprText) -> Stmt {
    Stmt {
        line: 1,
        kind: StmtKind::Other(format!(
            "{RETURN_GUARD}(None, {}, globals())",
            expected.text
        )),
    }
}
