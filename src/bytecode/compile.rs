use tracing::debug;

use crate::{
    CompileOptions,
    bytecode::{
        BlockId, Command, Opcode, Operand, ProgramBc,
        compile_error::{CompileError, expr_kind_name},
        op,
    },
    lang::{
        node::{BinaryOp, CompositeKind, Expr, Stmt},
        program::{ConstGroup, ConstValues, Decl, FunctionDecl, Program},
        value::Literal,
    },
};

/// Where statements are being emitted: the block, and the parameters of
/// the function that owns it.
#[derive(Clone, Copy)]
struct Scope<'a> {
    block: BlockId,
    params: &'a [String],
}

impl<'a> Scope<'a> {
    fn at(self, block: BlockId) -> Self {
        Self { block, ..self }
    }
}

pub struct Compiler {
    options: CompileOptions,

    /// Output bytecode program
    program_bc: ProgramBc,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_options(CompileOptions::default())
    }

    pub fn with_options(options: CompileOptions) -> Self {
        Self {
            options,
            program_bc: ProgramBc::default(),
        }
    }

    /// Translate every declaration into blocks and constant macros. Names
    /// stay symbolic; see [`crate::bytecode::link::Linker`].
    pub fn compile_program(mut self, program: &Program) -> Result<ProgramBc, CompileError> {
        self.program_bc.name = program.name.clone();

        for decl in &program.decls {
            match decl {
                Decl::Function(func) => self.compile_function(func)?,
                Decl::Const(group) => self.compile_consts(group)?,
            }
        }

        debug!(
            program = %program.name,
            blocks = self.program_bc.blocks().len(),
            consts = self.program_bc.consts().len(),
            "compiled program"
        );
        Ok(self.program_bc)
    }

    fn compile_function(&mut self, func: &FunctionDecl) -> Result<(), CompileError> {
        let id = self
            .program_bc
            .add_function(&func.name, func.params.clone())?;
        debug!(function = %func.name, params = func.params.len(), "compiling function");

        let scope = Scope {
            block: id,
            params: &func.params,
        };
        self.compile_body(scope, &func.body)?;
        self.program_bc.add(id, Command::new(Opcode::Rtn));
        Ok(())
    }

    fn compile_consts(&mut self, group: &ConstGroup) -> Result<(), CompileError> {
        match &group.values {
            ConstValues::AutoIncrement => {
                for (ordinal, name) in group.names.iter().enumerate() {
                    let body = vec![Command::ldc(ordinal as i64).commented(name.as_str())];
                    self.program_bc.add_const(name, body)?;
                }
            }
            ConstValues::Exprs(values) => {
                if values.len() != group.names.len() {
                    return Err(CompileError::unsupported_with_hint(
                        format!(
                            "const group with {} names and {} values",
                            group.names.len(),
                            values.len()
                        ),
                        "give every constant its own initializer",
                    ));
                }
                for (name, value) in group.names.iter().zip(values) {
                    let mut body = Vec::new();
                    self.compile_expr(&[], value, &mut body)?;
                    let body = body
                        .into_iter()
                        .map(|c| c.or_commented(Some(name.as_str())))
                        .collect();
                    self.program_bc.add_const(name, body)?;
                }
            }
        }
        Ok(())
    }

    /// A function body: a trailing `return` supplies the result, any other
    /// `return` is rejected.
    fn compile_body(&mut self, scope: Scope<'_>, body: &[Stmt]) -> Result<(), CompileError> {
        let Some((last, init)) = body.split_last() else {
            return Ok(());
        };
        self.compile_stmts(scope, init)?;
        match last {
            Stmt::Return(values) => self.compile_return(scope, values),
            stmt => self.compile_stmt(scope, stmt),
        }
    }

    fn compile_stmts(&mut self, scope: Scope<'_>, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            self.compile_stmt(scope, stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, scope: Scope<'_>, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expr(expr) => self.emit_expr(scope, expr),

            Stmt::If {
                cond,
                then,
                otherwise,
            } => self.compile_if(scope, cond, then, otherwise.as_deref()),

            Stmt::Return(_) => Err(CompileError::UnsupportedReturn {
                block: self.program_bc.block(scope.block).name.clone(),
            }),

            Stmt::Assign { .. } | Stmt::Loop { .. } => Err(CompileError::unsupported_stmt(stmt)),
        }
    }

    fn compile_return(&mut self, scope: Scope<'_>, values: &[Expr]) -> Result<(), CompileError> {
        match values {
            [] => Ok(()),
            [value] => self.emit_expr(scope, value),
            _ => Err(CompileError::unsupported_with_hint(
                format!("return of {} values", values.len()),
                "return a list literal instead",
            )),
        }
    }

    /// Condition in the current block, then one child block per arm, each
    /// ending in `JOIN`, then `SEL` over the two children.
    fn compile_if(
        &mut self,
        scope: Scope<'_>,
        cond: &Expr,
        then: &[Stmt],
        otherwise: Option<&[Stmt]>,
    ) -> Result<(), CompileError> {
        self.emit_expr(scope, cond)?;

        let then_block = self.program_bc.child(scope.block, "t");
        self.compile_stmts(scope.at(then_block), then)?;
        self.program_bc.add(then_block, Command::new(Opcode::Join));

        let else_block = self.program_bc.child(scope.block, "f");
        if let Some(otherwise) = otherwise {
            self.compile_stmts(scope.at(else_block), otherwise)?;
        }
        self.program_bc.add(else_block, Command::new(Opcode::Join));

        let then_name = &self.program_bc.block(then_block).name;
        let else_name = &self.program_bc.block(else_block).name;
        let sel = Command::sel(then_name, else_name)
            .commented(format!("{} {}", then_name, else_name));
        self.program_bc.add(scope.block, sel);
        Ok(())
    }

    fn emit_expr(&mut self, scope: Scope<'_>, expr: &Expr) -> Result<(), CompileError> {
        let mut commands = Vec::new();
        self.compile_expr(scope.params, expr, &mut commands)?;
        self.program_bc.extend(scope.block, commands);
        Ok(())
    }

    pub fn compile_expr(
        &self,
        params: &[String],
        expr: &Expr,
        out: &mut Vec<Command>,
    ) -> Result<(), CompileError> {
        match expr {
            Expr::Literal(Literal::Int(n)) => out.push(Command::ldc(*n)),
            Expr::Literal(Literal::Str(s)) => {
                out.push(Command::with_args(Opcode::Ldc, vec![Operand::Str(s.clone())]))
            }

            Expr::Ident(name) => out.push(Command::ld(name).commented(name.as_str())),

            Expr::Binary { op, lhs, rhs } => self.compile_binary(params, *op, lhs, rhs, out)?,

            Expr::Call { func, args } => self.compile_call(params, func, args, out)?,

            Expr::Composite {
                kind: CompositeKind::Array,
                elems,
            } => self.compile_list(params, elems, out)?,

            Expr::Composite { kind, .. } => {
                return Err(CompileError::unsupported_with_hint(
                    format!("{} {}", kind, expr_kind_name(expr)),
                    "only array literals have a list representation",
                ));
            }

            Expr::Paren(inner) => self.compile_expr(params, inner, out)?,
        }

        Ok(())
    }

    fn compile_binary(
        &self,
        params: &[String],
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        out: &mut Vec<Command>,
    ) -> Result<(), CompileError> {
        let opcode = match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Eq | BinaryOp::NotEq => Opcode::Ceq,
            BinaryOp::Lt | BinaryOp::Gt => Opcode::Cgt,
            BinaryOp::LtEq | BinaryOp::GtEq => Opcode::Cgte,
            BinaryOp::Rem | BinaryOp::And | BinaryOp::Or => {
                return Err(CompileError::unsupported_with_hint(
                    format!("operator {}", op.symbol()),
                    "the machine has no instruction for this operator",
                ));
            }
        };

        // `<` and `<=` are `>` and `>=` with the operands swapped.
        let (first, second) = match op {
            BinaryOp::Lt | BinaryOp::LtEq => (rhs, lhs),
            _ => (lhs, rhs),
        };
        self.compile_expr(params, first, out)?;
        self.compile_expr(params, second, out)?;
        out.push(Command::new(opcode));

        // a != b  ==>  (a == b) == 0
        if op == BinaryOp::NotEq {
            out.push(Command::ldc(0));
            out.push(Command::new(Opcode::Ceq));
        }
        Ok(())
    }

    fn compile_call(
        &self,
        params: &[String],
        func: &str,
        args: &[Expr],
        out: &mut Vec<Command>,
    ) -> Result<(), CompileError> {
        if let Some(builtin) = op::builtin(func) {
            if self.options.check_builtin_arity && args.len() != builtin.arity {
                return Err(CompileError::BuiltinArity {
                    name: builtin.name.to_string(),
                    expected: builtin.arity,
                    got: args.len(),
                });
            }
            for arg in args {
                self.compile_expr(params, arg, out)?;
            }
            out.push(Command::new(builtin.opcode));
            return Ok(());
        }

        for arg in args {
            self.compile_expr(params, arg, out)?;
        }
        // A parameter holds a closure value; anything else names code.
        let load = if params.iter().any(|p| p == func) {
            Command::ld(func)
        } else {
            Command::ldf(func)
        };
        out.push(load.commented(func));
        out.push(Command::ap(args.len()));
        Ok(())
    }

    /// `{e0, e1, ..., en}` becomes `(e0 . (e1 . (... . en)))`: every element
    /// in order, then one `CONS` per pair. `CONS` takes the cdr from the top
    /// of the stack, so the innermost pair is built first.
    ///
    /// Elements are emitted first to last, not last to first; emitting
    /// `en` first would put it at the head of the chain.
    fn compile_list(
        &self,
        params: &[String],
        elems: &[Expr],
        out: &mut Vec<Command>,
    ) -> Result<(), CompileError> {
        if elems.is_empty() {
            out.push(Command::ldc(0).commented("nil"));
            return Ok(());
        }
        for elem in elems {
            self.compile_expr(params, elem, out)?;
        }
        for _ in 1..elems.len() {
            out.push(Command::new(Opcode::Cons));
        }
        Ok(())
    }
}
