use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, trace, warn};

use crate::{
    CompileOptions,
    bytecode::{
        BlockId, Command, Opcode, Operand, ProgramBc,
        compile_error::CompileError,
        disasm::{LinkedBlock, Listing},
        frame::Frame,
    },
};

/// Constant name -> command sequence with every constant reference
/// inlined. Closure loads stay symbolic until the macro is spliced.
type Macros = BTreeMap<String, Vec<Command>>;

/// A block after name resolution, waiting for address resolution.
struct Expanded<'p> {
    name: &'p str,
    offset: usize,
    commands: Vec<Command>,
}

/// Turns the code generator's symbolic blocks into a [`Listing`].
///
/// Linking runs in two passes. Name resolution rewrites every `LD name`
/// into a frame address or an inlined constant, walking the entry block
/// first and then each other top-level block, every parent immediately
/// followed by its branch arms. Address resolution lays the resolved
/// blocks out after the preamble and rewrites every `LDF`/`SEL` block name
/// into an absolute offset.
///
/// Calling convention: with `n > 0` other top-level functions the preamble
/// is `DUM n`, one `LDF` per function, `LDF main`, `RAP n`, `RTN`, so main
/// runs in a frame holding those closures and every other function's frame
/// has it as parent. Without other functions it is `LDF main`, `AP 0`,
/// `RTN`. Either way main's own parameters are the frame the host called
/// the program with, one level above main's frame.
pub struct Linker<'o> {
    options: &'o CompileOptions,
}

impl<'o> Linker<'o> {
    pub fn new(options: &'o CompileOptions) -> Self {
        Self { options }
    }

    pub fn link(&self, program: &ProgramBc) -> Result<Listing, CompileError> {
        let entry_name = self.options.entry.as_str();
        let entry = program
            .find(entry_name)
            .filter(|id| program.functions().contains(id))
            .ok_or_else(|| CompileError::missing_main(entry_name))?;

        let macros = self.resolve_constants(program)?;

        let others: Vec<BlockId> = program
            .functions()
            .iter()
            .copied()
            .filter(|&id| id != entry)
            .collect();
        let decls: Vec<String> = others
            .iter()
            .map(|&id| program.block(id).name.clone())
            .collect();
        self.warn_unused(program, &decls);

        // Pass 1: names.
        let entry_frame = Frame::root(&program.block(entry).frame);
        let main_frame = entry_frame.child(&decls);
        let mut expanded = Vec::new();
        self.expand_tree(program, entry, &main_frame, &macros, &mut expanded)?;
        for &id in &others {
            let frame = main_frame.child(&program.block(id).frame);
            self.expand_tree(program, id, &frame, &macros, &mut expanded)?;
        }

        // Pass 2: addresses.
        let preamble = preamble(entry_name, &decls);
        let mut offsets = HashMap::new();
        let mut next = preamble.len();
        for block in &mut expanded {
            block.offset = next;
            offsets.insert(block.name, next);
            next += block.commands.len();
        }
        debug!(
            program = %program.name,
            preamble = preamble.len(),
            blocks = expanded.len(),
            instructions = next,
            "laid out program"
        );

        let preamble = self.patch(preamble, "preamble", &offsets)?;
        let blocks = expanded
            .into_iter()
            .map(|block| {
                trace!(block = block.name, offset = block.offset, "placed block");
                Ok(LinkedBlock {
                    name: block.name.to_string(),
                    offset: block.offset,
                    commands: self.patch(block.commands, block.name, &offsets)?,
                })
            })
            .collect::<Result<Vec<_>, CompileError>>()?;

        Ok(Listing {
            name: program.name.clone(),
            preamble,
            blocks,
        })
    }

    /// Inline constant references inside constant bodies, so each macro
    /// is final before any block refers to it.
    fn resolve_constants(&self, program: &ProgramBc) -> Result<Macros, CompileError> {
        let mut resolved = Macros::new();
        for name in program.consts().keys() {
            self.resolve_constant(program, name, &mut Vec::new(), &mut resolved)?;
        }
        debug!(constants = resolved.len(), "resolved constants");
        Ok(resolved)
    }

    fn resolve_constant(
        &self,
        program: &ProgramBc,
        name: &str,
        visiting: &mut Vec<String>,
        resolved: &mut Macros,
    ) -> Result<Vec<Command>, CompileError> {
        if let Some(body) = resolved.get(name) {
            return Ok(body.clone());
        }
        if visiting.iter().any(|n| n == name) {
            return Err(CompileError::CyclicConstant(name.to_string()));
        }
        let context = format!("const {}", name);
        let Some(body) = program.const_body(name) else {
            return Err(CompileError::unresolved_symbol(name, &context, None));
        };

        visiting.push(name.to_string());
        let mut out = Vec::with_capacity(body.len());
        for command in body {
            match (command.opcode, command.symbol()) {
                (Opcode::Ld | Opcode::Ldf, Some(symbol))
                    if program.const_body(symbol).is_some() =>
                {
                    let inner = self.resolve_constant(program, symbol, visiting, resolved)?;
                    splice(&mut out, &inner, command.comment.as_deref());
                }
                // Constants only see other constants.
                (Opcode::Ld, Some(symbol)) => {
                    return Err(CompileError::unresolved_symbol(symbol, &context, None));
                }
                _ => out.push(command.clone()),
            }
        }
        visiting.pop();

        resolved.insert(name.to_string(), out.clone());
        Ok(out)
    }

    /// Expand a block, then its branch arms in the same frame.
    fn expand_tree<'p>(
        &self,
        program: &'p ProgramBc,
        id: BlockId,
        frame: &Frame<'_>,
        macros: &Macros,
        out: &mut Vec<Expanded<'p>>,
    ) -> Result<(), CompileError> {
        let block = program.block(id);
        let commands = self.expand(program, &block.name, &block.commands, frame, macros)?;
        out.push(Expanded {
            name: &block.name,
            offset: 0,
            commands,
        });
        for &child in &block.children {
            self.expand_tree(program, child, frame, macros, out)?;
        }
        Ok(())
    }

    /// Resolve symbolic loads: the frame chain first, then the constants.
    /// Closure loads inside a spliced constant are resolved here, against
    /// the frame of the block that refers to the constant.
    fn expand(
        &self,
        program: &ProgramBc,
        block: &str,
        commands: &[Command],
        frame: &Frame<'_>,
        macros: &Macros,
    ) -> Result<Vec<Command>, CompileError> {
        let mut out = Vec::with_capacity(commands.len());
        for command in commands {
            let (opcode @ (Opcode::Ld | Opcode::Ldf), Some(name)) =
                (command.opcode, command.symbol())
            else {
                out.push(command.clone());
                continue;
            };

            if let Some(address) = frame.find(name) {
                trace!(
                    block,
                    name,
                    depth = address.depth,
                    index = address.index,
                    "resolved variable"
                );
                out.push(Command::ld_addr(address).or_commented(command.comment.as_deref()));
            } else if let Some(body) = macros.get(name) {
                trace!(block, name, "inlined constant");
                let comment = command.comment.as_deref();
                for spliced in body {
                    let resolved = self.resolve_closure(program, block, spliced, frame)?;
                    out.push(resolved.or_commented(comment));
                }
            } else if opcode == Opcode::Ldf {
                out.push(self.resolve_closure(program, block, command, frame)?);
            } else {
                return Err(CompileError::unresolved_symbol(name, block, Some(frame)));
            }
        }
        Ok(out)
    }

    /// Resolve a symbolic `LDF` through the frame chain. A top-level
    /// function is only callable through the closure bound in the
    /// declarations frame, so one the chain does not reach (the entry
    /// function) is an error. Any other name waits for address resolution.
    fn resolve_closure(
        &self,
        program: &ProgramBc,
        block: &str,
        command: &Command,
        frame: &Frame<'_>,
    ) -> Result<Command, CompileError> {
        let (Opcode::Ldf, Some(name)) = (command.opcode, command.symbol()) else {
            return Ok(command.clone());
        };

        if let Some(address) = frame.find(name) {
            trace!(
                block,
                name,
                depth = address.depth,
                index = address.index,
                "resolved function"
            );
            return Ok(Command::ld_addr(address).or_commented(command.comment.as_deref()));
        }
        if program
            .find(name)
            .is_some_and(|id| program.functions().contains(&id))
        {
            return Err(CompileError::unreachable_function(name, block));
        }
        Ok(command.clone())
    }

    /// Rewrite block names in `LDF`/`SEL` operands to offsets.
    fn patch(
        &self,
        commands: Vec<Command>,
        block: &str,
        offsets: &HashMap<&str, usize>,
    ) -> Result<Vec<Command>, CompileError> {
        commands
            .into_iter()
            .map(|mut command| {
                if matches!(command.opcode, Opcode::Ldf | Opcode::Sel) {
                    for arg in &mut command.args {
                        if let Operand::Name(target) = arg {
                            let offset = offsets
                                .get(target.as_str())
                                .copied()
                                .ok_or_else(|| CompileError::unresolved_target(target, block))?;
                            *arg = Operand::Offset(offset);
                        }
                    }
                }
                if !self.options.comments {
                    command.comment = None;
                }
                Ok(command)
            })
            .collect()
    }

    fn warn_unused(&self, program: &ProgramBc, decls: &[String]) {
        let referenced: HashSet<&str> = program
            .blocks()
            .iter()
            .flat_map(|b| b.commands.iter())
            .chain(program.consts().values().flatten())
            .filter(|c| matches!(c.opcode, Opcode::Ld | Opcode::Ldf))
            .filter_map(Command::symbol)
            .collect();

        for decl in decls.iter().filter(|d| !referenced.contains(d.as_str())) {
            warn!(function = %decl, "top-level function is never referenced");
        }
    }
}

/// Entry sequence; block names are still symbolic.
fn preamble(entry: &str, decls: &[String]) -> Vec<Command> {
    let load_entry = Command::ldf(entry).commented(format!("load {}", entry));
    if decls.is_empty() {
        return vec![load_entry, Command::ap(0), Command::new(Opcode::Rtn)];
    }

    let mut commands = Vec::with_capacity(decls.len() + 4);
    commands.push(Command::dum(decls.len()).commented("top-level declarations"));
    commands.extend(
        decls
            .iter()
            .map(|decl| Command::ldf(decl).commented(format!("load {}", decl))),
    );
    commands.push(load_entry);
    commands.push(Command::rap(decls.len()));
    commands.push(Command::new(Opcode::Rtn));
    commands
}

/// Insert a macro body; the reference's comment fills in where the body
/// has none.
fn splice(out: &mut Vec<Command>, body: &[Command], comment: Option<&str>) {
    out.extend(body.iter().cloned().map(|c| c.or_commented(comment)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::lang::node::{BinaryOp, Expr, Stmt};
    use crate::lang::program::{ConstValues, Program};
    use pretty_assertions::assert_eq;

    fn link(program: &Program) -> Result<Listing, CompileError> {
        let bc = Compiler::new().compile_program(program)?;
        Linker::new(&CompileOptions::default()).link(&bc)
    }

    fn text(commands: &[Command]) -> Vec<String> {
        commands.iter().map(Command::to_string).collect()
    }

    fn block_text(listing: &Listing, name: &str) -> Vec<String> {
        text(&listing.block(name).unwrap().commands)
    }

    fn add_ab() -> Vec<Stmt> {
        vec![Stmt::expr(Expr::binary(
            BinaryOp::Add,
            Expr::ident("a"),
            Expr::ident("b"),
        ))]
    }

    #[test]
    fn test_lone_main_uses_plain_apply() {
        let program = Program::new("p").function("main", &[], vec![Stmt::ret(Expr::int(42))]);
        let listing = link(&program).unwrap();

        assert_eq!(text(&listing.preamble), vec!["LDF 3", "AP 0", "RTN"]);
        assert_eq!(listing.offset_of("main"), Some(listing.preamble.len()));
        assert_eq!(block_text(&listing, "main"), vec!["LDC 42", "RTN"]);
    }

    #[test]
    fn test_declarations_use_recursive_apply() {
        let program = Program::new("p")
            .function(
                "main",
                &[],
                vec![Stmt::expr(Expr::call("addtwo", vec![Expr::int(21), Expr::int(21)]))],
            )
            .function("addtwo", &["a", "b"], add_ab());
        let listing = link(&program).unwrap();

        assert_eq!(
            text(&listing.preamble),
            vec!["DUM 1", "LDF 10", "LDF 5", "RAP 1", "RTN"]
        );
        assert_eq!(
            block_text(&listing, "main"),
            vec!["LDC 21", "LDC 21", "LD 0 0", "AP 2", "RTN"]
        );
        assert_eq!(
            block_text(&listing, "addtwo"),
            vec!["LD 0 0", "LD 0 1", "ADD", "RTN"]
        );
        assert_eq!(listing.offset_of("main"), Some(5));
        assert_eq!(listing.offset_of("addtwo"), Some(10));
    }

    #[test]
    fn test_preamble_order_follows_declarations() {
        let program = Program::new("p")
            .function("first", &[], vec![Stmt::expr(Expr::int(1))])
            .function(
                "main",
                &[],
                vec![Stmt::expr(Expr::call("second", vec![]))],
            )
            .function("second", &[], vec![Stmt::expr(Expr::call("first", vec![]))]);
        let listing = link(&program).unwrap();

        let comments: Vec<Option<&str>> = listing
            .preamble
            .iter()
            .map(|c| c.comment.as_deref())
            .collect();
        assert_eq!(
            comments,
            vec![
                Some("top-level declarations"),
                Some("load first"),
                Some("load second"),
                Some("load main"),
                None,
                None
            ]
        );
        let order: Vec<&str> = listing.blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(order, vec!["main", "first", "second"]);
        // main's frame is [first, second]; second sees it one level up.
        assert_eq!(block_text(&listing, "main")[0], "LD 0 1");
        assert_eq!(block_text(&listing, "second")[0], "LD 1 0");
    }

    #[test]
    fn test_entry_parameters_sit_above_main_frame() {
        let program = Program::new("p")
            .function(
                "main",
                &["world", "ghosts"],
                vec![Stmt::expr(Expr::list(vec![
                    Expr::ident("ghosts"),
                    Expr::ident("step"),
                ]))],
            )
            .function("step", &["mem"], vec![Stmt::expr(Expr::ident("mem"))]);
        let listing = link(&program).unwrap();
        assert_eq!(
            block_text(&listing, "main"),
            vec!["LD 1 1", "LD 0 0", "CONS", "RTN"]
        );
    }

    #[test]
    fn test_branch_arms_share_the_function_frame() {
        let program = Program::new("p")
            .function("main", &[], vec![Stmt::expr(Expr::call("pick", vec![Expr::int(1)]))])
            .function(
                "pick",
                &["x"],
                vec![Stmt::if_else(
                    Expr::ident("x"),
                    vec![Stmt::expr(Expr::ident("x"))],
                    Some(vec![Stmt::expr(Expr::call("pick", vec![Expr::ident("x")]))]),
                )],
            );
        let listing = link(&program).unwrap();

        assert_eq!(block_text(&listing, "pick")[0], "LD 0 0");
        assert_eq!(block_text(&listing, "pick.1t"), vec!["LD 0 0", "JOIN"]);
        assert_eq!(
            block_text(&listing, "pick.1f"),
            vec!["LD 0 0", "LD 1 0", "AP 1", "JOIN"]
        );
    }

    #[test]
    fn test_sel_targets_are_block_offsets() {
        let program = Program::new("p").function(
            "main",
            &[],
            vec![Stmt::if_else(
                Expr::int(1),
                vec![Stmt::expr(Expr::int(2))],
                Some(vec![Stmt::expr(Expr::int(3))]),
            )],
        );
        let listing = link(&program).unwrap();

        let then_offset = listing.offset_of("main.1t").unwrap();
        let else_offset = listing.offset_of("main.1f").unwrap();
        assert_eq!(then_offset, 3 + 3);
        assert_eq!(else_offset, then_offset + 2);

        let sel = &listing.block("main").unwrap().commands[1];
        assert_eq!(
            sel.args,
            vec![Operand::Offset(then_offset), Operand::Offset(else_offset)]
        );
        assert_eq!(sel.comment.as_deref(), Some("main.1t main.1f"));
    }

    #[test]
    fn test_nested_branches_follow_their_parent() {
        let program = Program::new("p").function(
            "main",
            &[],
            vec![Stmt::if_else(
                Expr::int(1),
                vec![Stmt::if_else(Expr::int(2), vec![], None)],
                None,
            )],
        );
        let listing = link(&program).unwrap();
        let order: Vec<&str> = listing.blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            order,
            vec!["main", "main.1t", "main.1t.1t", "main.1t.1f", "main.1f"]
        );
    }

    #[test]
    fn test_missing_main() {
        let program = Program::new("p").function("helper", &[], vec![]);
        assert_eq!(link(&program), Err(CompileError::missing_main("main")));
    }

    #[test]
    fn test_custom_entry() {
        let program = Program::new("p").function("start", &[], vec![Stmt::expr(Expr::int(1))]);
        let bc = Compiler::new().compile_program(&program).unwrap();
        let options = CompileOptions::default().with_entry("start");
        let listing = Linker::new(&options).link(&bc).unwrap();
        assert_eq!(listing.preamble[0].comment.as_deref(), Some("load start"));
    }

    #[test]
    fn test_unresolved_symbol_names_block_and_frames() {
        let program = Program::new("p").function(
            "main",
            &["world"],
            vec![Stmt::if_else(
                Expr::int(1),
                vec![Stmt::expr(Expr::ident("nowhere"))],
                None,
            )],
        );
        let err = link(&program).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnresolvedSymbol(crate::bytecode::compile_error::NotFoundError {
                symbol: "nowhere".to_string(),
                block: "main.1t".to_string(),
                frames: vec![vec![], vec!["world".to_string()]],
            })
        );
    }

    #[test]
    fn test_unknown_call_target() {
        let program =
            Program::new("p").function("main", &[], vec![Stmt::expr(Expr::call("ghost", vec![]))]);
        let err = link(&program).unwrap_err();
        assert_eq!(err, CompileError::unresolved_target("ghost", "main"));
    }

    #[test]
    fn test_constants_are_inlined() {
        let program = Program::new("p")
            .constants(&["up", "right"], ConstValues::AutoIncrement)
            .function("main", &[], vec![Stmt::expr(Expr::ident("right"))]);
        let listing = link(&program).unwrap();
        let main = &listing.block("main").unwrap().commands;
        assert_eq!(main[0], Command::ldc(1).commented("right"));
    }

    #[test]
    fn test_parameters_shadow_constants() {
        let program = Program::new("p")
            .constants(&["x"], ConstValues::Exprs(vec![Expr::int(9)]))
            .function("main", &["x"], vec![Stmt::expr(Expr::ident("x"))]);
        let listing = link(&program).unwrap();
        assert_eq!(block_text(&listing, "main"), vec!["LD 1 0", "RTN"]);
    }

    #[test]
    fn test_constants_referring_to_constants() {
        let program = Program::new("p")
            .constants(
                &["four", "eight"],
                ConstValues::Exprs(vec![
                    Expr::int(4),
                    Expr::binary(BinaryOp::Add, Expr::ident("four"), Expr::ident("four")),
                ]),
            )
            .function("main", &[], vec![Stmt::expr(Expr::ident("eight"))]);
        let listing = link(&program).unwrap();
        assert_eq!(
            block_text(&listing, "main"),
            vec!["LDC 4", "LDC 4", "ADD", "RTN"]
        );
    }

    #[test]
    fn test_cyclic_constants() {
        let program = Program::new("p")
            .constants(
                &["a", "b"],
                ConstValues::Exprs(vec![Expr::ident("b"), Expr::ident("a")]),
            )
            .function("main", &[], vec![]);
        let err = link(&program).unwrap_err();
        assert!(matches!(err, CompileError::CyclicConstant(_)));
    }

    #[test]
    fn test_constant_with_unknown_name() {
        let program = Program::new("p")
            .constants(&["a"], ConstValues::Exprs(vec![Expr::ident("zzz")]))
            .function("main", &[], vec![]);
        let err = link(&program).unwrap_err();
        assert_eq!(err, CompileError::unresolved_symbol("zzz", "const a", None));
    }

    #[test]
    fn test_ldf_of_constant_is_spliced() {
        let mut bc = ProgramBc::new("p");
        let main = bc.add_function("main", vec![]).unwrap();
        bc.add(main, Command::ldf("handler").commented("handler"));
        bc.add(main, Command::new(Opcode::Rtn));
        bc.add_const("handler", vec![Command::ldc(7)]).unwrap();

        let listing = Linker::new(&CompileOptions::default()).link(&bc).unwrap();
        assert_eq!(
            listing.block("main").unwrap().commands[0],
            Command::ldc(7).commented("handler")
        );
    }

    fn shared_helper_program() -> Program {
        Program::new("p")
            .constants(
                &["k"],
                ConstValues::Exprs(vec![Expr::call("helper", vec![])]),
            )
            .function("main", &[], vec![Stmt::expr(Expr::ident("k"))])
            .function("step", &["x"], vec![Stmt::expr(Expr::ident("k"))])
            .function(
                "direct",
                &["x"],
                vec![Stmt::expr(Expr::call("helper", vec![]))],
            )
            .function("helper", &[], vec![Stmt::expr(Expr::call("other", vec![]))])
            .function("other", &[], vec![Stmt::expr(Expr::int(1))])
    }

    #[test]
    fn test_call_inside_constant_resolves_at_each_reference() {
        let listing = link(&shared_helper_program()).unwrap();

        assert_eq!(block_text(&listing, "main"), vec!["LD 0 2", "AP 0", "RTN"]);
        assert_eq!(block_text(&listing, "step"), vec!["LD 1 2", "AP 0", "RTN"]);
        assert_eq!(block_text(&listing, "step"), block_text(&listing, "direct"));
        assert_eq!(block_text(&listing, "helper")[0], "LD 1 3");

        let comments: Vec<Option<&str>> = listing
            .block("step")
            .unwrap()
            .commands
            .iter()
            .map(|c| c.comment.as_deref())
            .collect();
        assert_eq!(comments, vec![Some("helper"), Some("k"), None]);

        let closures = listing
            .blocks
            .iter()
            .flat_map(|b| b.commands.iter())
            .filter(|c| c.opcode == Opcode::Ldf)
            .count();
        assert_eq!(closures, 0);
    }

    #[test]
    fn test_entry_function_is_not_callable() {
        let program = Program::new("p")
            .function("main", &[], vec![Stmt::expr(Expr::call("main", vec![]))])
            .function("spare", &[], vec![Stmt::expr(Expr::int(1))]);
        assert_eq!(
            link(&program),
            Err(CompileError::unreachable_function("main", "main"))
        );

        let alone =
            Program::new("p").function("main", &[], vec![Stmt::expr(Expr::call("main", vec![]))]);
        assert_eq!(
            link(&alone),
            Err(CompileError::unreachable_function("main", "main"))
        );
    }

    #[test]
    fn test_entry_call_through_constant_is_rejected() {
        let program = Program::new("p")
            .constants(&["again"], ConstValues::Exprs(vec![Expr::call("main", vec![])]))
            .function(
                "main",
                &[],
                vec![Stmt::if_else(
                    Expr::int(1),
                    vec![Stmt::expr(Expr::ident("again"))],
                    None,
                )],
            );
        assert_eq!(
            link(&program),
            Err(CompileError::unreachable_function("main", "main.1t"))
        );
    }

    #[test]
    fn test_comments_can_be_dropped() {
        let program =
            Program::new("p").function("main", &["x"], vec![Stmt::expr(Expr::ident("x"))]);
        let bc = Compiler::new().compile_program(&program).unwrap();
        let options = CompileOptions::default().with_comments(false);
        let listing = Linker::new(&options).link(&bc).unwrap();
        assert!(listing.instructions().all(|c| c.comment.is_none()));
    }

    #[test]
    fn test_unused_function_is_still_linked() {
        let program = Program::new("p")
            .function("main", &[], vec![Stmt::expr(Expr::int(0))])
            .function("spare", &[], vec![Stmt::expr(Expr::int(1))]);
        let listing = link(&program).unwrap();
        assert_eq!(text(&listing.preamble)[0], "DUM 1");
        assert!(listing.block("spare").is_some());
    }
}
