//! Statement tree to program text.

use flux_core::ast::{Expr, FuncDecl, SeqAnnotation, Stmt, StmtKind};
use flux_core::kind::LiteralKind;
use flux_core::resolve::{SignatureExpr, TypeExpr};
use flux_core::type_id::{package_name, render_signature, render_type_expr};

use crate::lower::Lowered;
use crate::WriterOptions;

/// Renders a complete source file: package clause, imports and the
/// function. `package` is the import path of the function's package.
pub fn render_program(package: &str, lowered: &Lowered, options: &WriterOptions) -> String {
    let mut printer = Printer::new(package, options);
    printer.line(0, &format!("package {}", package_name(package)), None);
    if !lowered.imports.is_empty() {
        printer.out.push('\n');
        printer.line(0, "import (", None);
        for path in &lowered.imports {
            printer.line(1, &quote(path), None);
        }
        printer.line(0, ")", None);
    }
    printer.out.push('\n');
    printer.func(&lowered.decl);
    printer.out
}

/// Renders one function declaration.
pub fn render_function(package: &str, decl: &FuncDecl, options: &WriterOptions) -> String {
    let mut printer = Printer::new(package, options);
    printer.func(decl);
    printer.out
}

struct Printer<'a> {
    current: &'a str,
    options: &'a WriterOptions,
    out: String,
}

impl<'a> Printer<'a> {
    fn new(current: &'a str, options: &'a WriterOptions) -> Self {
        Printer {
            current,
            options,
            out: String::new(),
        }
    }

    fn indent(&self, depth: usize) -> String {
        self.options.indent.repeat(depth)
    }

    fn line(&mut self, depth: usize, text: &str, seq: Option<&SeqAnnotation>) {
        let indent = self.indent(depth);
        self.out.push_str(&indent);
        self.out.push_str(text);
        if let Some(seq) = seq.filter(|_| self.options.seq_comments) {
            self.out.push_str(" // seq:");
            self.out.push_str(&seq.render());
        }
        self.out.push('\n');
    }

    fn func(&mut self, decl: &FuncDecl) {
        let recv = decl
            .recv
            .as_ref()
            .map(|r| format!("({} {}) ", r.name, self.ty(&r.ty)))
            .unwrap_or_default();
        let sig = SignatureExpr {
            params: decl.params.clone(),
            results: decl.results.clone(),
            variadic: decl.variadic,
        };
        let header = format!(
            "func {}{}{} {{",
            recv,
            decl.name,
            render_signature(&sig, Some(self.current))
        );
        self.line(0, &header, None);
        self.stmts(1, &decl.body);
        self.line(0, "}", None);
    }

    fn stmts(&mut self, depth: usize, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(depth, stmt);
        }
    }

    fn stmt(&mut self, depth: usize, stmt: &Stmt) {
        let seq = stmt.seq.as_ref();
        match &stmt.kind {
            StmtKind::Define { names, value } => {
                let text = format!("{} := {}", names.join(", "), self.expr(value, depth));
                self.line(depth, &text, seq);
            }
            StmtKind::Assign { targets, values } => {
                let text = format!(
                    "{} = {}",
                    self.list(targets, depth),
                    self.list(values, depth)
                );
                self.line(depth, &text, seq);
            }
            StmtKind::VarDecl { name, ty } => {
                let text = format!("var {} {}", name, self.ty(ty));
                self.line(depth, &text, seq);
            }
            StmtKind::ConstDecl { name, value } => {
                let text = format!("const {} = {}", name, self.expr(value, depth));
                self.line(depth, &text, seq);
            }
            StmtKind::Expr(e) => {
                let text = self.expr(e, depth);
                self.line(depth, &text, seq);
            }
            StmtKind::If { cond, then, els } => {
                let text = format!("if {} {{", self.expr(cond, depth));
                self.line(depth, &text, seq);
                self.stmts(depth + 1, then);
                if !els.is_empty() {
                    self.line(depth, "} else {", None);
                    self.stmts(depth + 1, els);
                }
                self.line(depth, "}", None);
            }
            StmtKind::For { index, bound, body } => {
                let text = match bound {
                    Some(bound) => format!(
                        "for {i} := 0; {i} < {}; {i}++ {{",
                        self.expr(bound, depth),
                        i = index
                    ),
                    None => format!("for {i} := 0; ; {i}++ {{", i = index),
                };
                self.line(depth, &text, seq);
                self.stmts(depth + 1, body);
                self.line(depth, "}", None);
            }
            StmtKind::Range {
                key,
                value,
                x,
                body,
            } => {
                let x = self.expr(x, depth);
                let text = match value {
                    Some(value) => format!("for {}, {} := range {} {{", key, value, x),
                    None if key == "_" => format!("for range {} {{", x),
                    None => format!("for {} := range {} {{", key, x),
                };
                self.line(depth, &text, seq);
                self.stmts(depth + 1, body);
                self.line(depth, "}", None);
            }
            StmtKind::Branch(kind) => self.line(depth, kind.keyword(), seq),
            StmtKind::Return => self.line(depth, "return", seq),
        }
    }

    fn list(&self, exprs: &[Expr], depth: usize) -> String {
        exprs
            .iter()
            .map(|e| self.expr(e, depth))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn ty(&self, ty: &TypeExpr) -> String {
        render_type_expr(ty, Some(self.current))
    }

    /// Renders an expression that starts on a line indented `depth` deep.
    fn expr(&self, e: &Expr, depth: usize) -> String {
        match e {
            Expr::Ident(name) => name.clone(),
            Expr::Selector { x, name } => format!("{}.{}", self.expr(x, depth), name),
            Expr::Star(x) => format!("*{}", self.expr(x, depth)),
            Expr::AddrOf(x) => format!("&{}", self.expr(x, depth)),
            Expr::Unary { op, x } => format!("{}{}", op, self.expr(x, depth)),
            Expr::Binary { op, x, y } => {
                format!("{} {} {}", self.expr(x, depth), op, self.expr(y, depth))
            }
            Expr::Call { fun, args, spread } => format!(
                "{}({}{})",
                self.expr(fun, depth),
                self.list(args, depth),
                if *spread { "..." } else { "" }
            ),
            Expr::Convert { ty, x } => {
                let ty = self.ty(ty);
                // `*T(x)` would parse as a dereference.
                if ty.starts_with('*') || ty.starts_with("func") {
                    format!("({})({})", ty, self.expr(x, depth))
                } else {
                    format!("{}({})", ty, self.expr(x, depth))
                }
            }
            Expr::Make { ty, args } => {
                let mut parts = vec![self.ty(ty)];
                parts.extend(args.iter().map(|a| self.expr(a, depth)));
                format!("make({})", parts.join(", "))
            }
            Expr::Composite { ty, fields } => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|(name, value)| format!("{}: {}", name, self.expr(value, depth)))
                    .collect();
                format!("{}{{{}}}", self.ty(ty), fields.join(", "))
            }
            Expr::Index { x, key } => {
                format!("{}[{}]", self.expr(x, depth), self.expr(key, depth))
            }
            Expr::TypeAssert { x, ty } => format!("{}.({})", self.expr(x, depth), self.ty(ty)),
            Expr::FuncLit {
                params,
                results,
                body,
            } => {
                let sig = SignatureExpr {
                    params: params.clone(),
                    results: results.clone(),
                    variadic: false,
                };
                let mut inner = Printer::new(self.current, self.options);
                inner.stmts(depth + 1, body);
                format!(
                    "func{} {{\n{}{}}}",
                    render_signature(&sig, Some(self.current)),
                    inner.out,
                    self.indent(depth)
                )
            }
            Expr::BasicLit { kind, text } => match kind {
                LiteralKind::Int | LiteralKind::Float => text.clone(),
                LiteralKind::String => quote(text),
                LiteralKind::Char => quote_char(text),
            },
            Expr::Zero(ty) => format!("{}{{}}", self.ty(ty)),
            Expr::Nil => "nil".to_string(),
        }
    }
}

/// Double-quoted string literal.
fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        escape_into(&mut out, c, '"');
    }
    out.push('"');
    out
}

/// Single-quoted rune literal of the last character.
fn quote_char(text: &str) -> String {
    let mut out = String::from("'");
    if let Some(c) = text.chars().last() {
        escape_into(&mut out, c, '\'');
    }
    out.push('\'');
    out
}

fn escape_into(out: &mut String, c: char, delimiter: char) {
    match c {
        '\\' => out.push_str("\\\\"),
        '\n' => out.push_str("\\n"),
        '\t' => out.push_str("\\t"),
        '\r' => out.push_str("\\r"),
        c if c == delimiter => {
            out.push('\\');
            out.push(c);
        }
        c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
        c => out.push(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::kind::BranchKind;
    use flux_core::resolve::FieldExpr;

    fn options() -> WriterOptions {
        WriterOptions::default()
    }

    #[test]
    fn test_literals_are_quoted() {
        assert_eq!(quote("say \"hi\"\n"), "\"say \\\"hi\\\"\\n\"");
        assert_eq!(quote_char("'"), "'\\''");
        assert_eq!(quote_char("ab"), "'b'");
    }

    #[test]
    fn test_program_has_package_imports_and_function() {
        let decl = FuncDecl {
            name: "Shout".into(),
            recv: None,
            params: vec![FieldExpr::new("s", TypeExpr::name("string"))],
            results: vec![FieldExpr::new("r", TypeExpr::name("string"))],
            variadic: false,
            body: vec![
                Stmt::new(StmtKind::Define {
                    names: vec!["v1".into()],
                    value: Expr::call(
                        Expr::selector(Expr::ident("strings"), "ToUpper"),
                        vec![Expr::ident("s")],
                    ),
                }),
                Stmt::new(StmtKind::Assign {
                    targets: vec![Expr::ident("r")],
                    values: vec![Expr::ident("v1")],
                }),
                Stmt::new(StmtKind::Return),
            ],
        };
        let lowered = Lowered {
            decl,
            imports: vec!["fmt".into(), "strings".into()],
        };
        let text = render_program("example.com/app", &lowered, &options());
        assert_eq!(
            text,
            "package app\n\
             \n\
             import (\n\
             \t\"fmt\"\n\
             \t\"strings\"\n\
             )\n\
             \n\
             func Shout(s string) (r string) {\n\
             \tv1 := strings.ToUpper(s)\n\
             \tr = v1\n\
             \treturn\n\
             }\n"
        );
    }

    #[test]
    fn test_loops_branches_and_sequence_comments() {
        let seq = SeqAnnotation {
            after: vec![1],
            id: Some(2),
        };
        let body = vec![
            Stmt::new(StmtKind::For {
                index: "v1".into(),
                bound: Some(Expr::ident("n")),
                body: vec![Stmt::new(StmtKind::Branch(BranchKind::Continue))],
            }),
            Stmt::new(StmtKind::For {
                index: "v2".into(),
                bound: None,
                body: vec![Stmt::new(StmtKind::Branch(BranchKind::Break))],
            }),
            Stmt::new(StmtKind::Range {
                key: "_".into(),
                value: Some("v3".into()),
                x: Expr::ident("xs"),
                body: vec![],
            }),
            Stmt::new(StmtKind::Expr(Expr::call(Expr::ident("Print"), vec![Expr::Nil])))
                .with_seq(seq),
        ];
        let decl = FuncDecl {
            name: "F".into(),
            recv: None,
            params: vec![],
            results: vec![],
            variadic: false,
            body,
        };
        let text = render_function("example.com/app", &decl, &options());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "func F() {");
        assert_eq!(lines[1], "\tfor v1 := 0; v1 < n; v1++ {");
        assert_eq!(lines[2], "\t\tcontinue");
        assert_eq!(lines[4], "\tfor v2 := 0; ; v2++ {");
        assert_eq!(lines[7], "\tfor _, v3 := range xs {");
        assert_eq!(lines[9], "\tPrint(nil) // seq:1;2");

        let quiet = WriterOptions {
            seq_comments: false,
            ..options()
        };
        let text = render_function("example.com/app", &decl, &quiet);
        assert!(text.contains("\tPrint(nil)\n"));
    }

    #[test]
    fn test_function_literal_body_is_indented() {
        let lit = Expr::FuncLit {
            params: vec![FieldExpr::new("x", TypeExpr::name("int"))],
            results: vec![],
            body: vec![Stmt::new(StmtKind::Return)],
        };
        let decl = FuncDecl {
            name: "F".into(),
            recv: Some(FieldExpr::new(
                "c",
                TypeExpr::pointer(TypeExpr::qualified("example.com/app", "Counter")),
            )),
            params: vec![],
            results: vec![],
            variadic: false,
            body: vec![Stmt::new(StmtKind::Define {
                names: vec!["v1".into()],
                value: lit,
            })],
        };
        let text = render_function("example.com/app", &decl, &options());
        assert_eq!(
            text,
            "func (c *Counter) F() {\n\
             \tv1 := func(x int) {\n\
             \t\treturn\n\
             \t}\n\
             }\n"
        );
    }
}
