//! The module-level driver: walks every function declaration in a
//! [`Module`], runs it through the full per-function pipeline (opt
//! passes, lowering, liveness, register allocation, stack-frame
//! layout, xasmgen text emission), and emits module-level data/TLS
//! globals once every function body has been consumed (spec.md §2
//! "Control flow through the core"; component table's "Glue (module
//! walker, symbol emission)").
//!
//! Grounded on cranelift-codegen's `Context::compile_and_emit` /
//! `ObjectModule::define_function` pairing: the per-function pipeline
//! (`Context::compile`) is a library call with no knowledge of the
//! surrounding module, and a thin outer driver sequences it over every
//! function and appends the module's data section afterward. Every
//! stage this module calls already exists elsewhere in the crate; nothing
//! here does any new lowering.
//!
//! When `cfg.debug_info` is set, `codegen::dwarf` walks the module's
//! debug tree into DIEs once every function body has been consumed,
//! and the resulting `.debug_abbrev`/`.debug_info`/`.debug_line`/
//! `.debug_loclists`/`.debug_str` sections are appended as `.byte`
//! directives, the same way `emit_module_data` appends its sections.

use crate::asmcmp::{self, regalloc, AsmContext, Assignment, Operand, OperandWidth, PhysReg};
use crate::codegen::dwarf::DwarfBuilder;
use crate::codegen::lower;
use crate::codegen::xasmgen;
use crate::config::Config;
use crate::error::{CoreError, ErrorKind, Result};
use crate::ir::entities::FuncDecl;
use crate::ir::module::{IdentifierKind, Module};
use crate::opt;
use crate::util::strbuf::StringBuffer;

/// Renders one already-lowered, already-allocated function as text:
/// `.globl`/label, synthesized prologue, the body xasmgen already
/// knows how to print, synthesized epilogue (spec.md §4.3 step 6,
/// §4.4 "Prologue"/"Epilogue").
fn emit_one_function(
    name: &str,
    external: bool,
    ctx: &AsmContext,
    preserved: &[PhysReg],
    allocated: u64,
    cfg: &Config,
) -> String {
    let mut out = StringBuffer::new();
    if external {
        out.push_line(&format!(".globl {name}"));
    }
    out.push_line(&format!("{name}:"));

    let mut prologue = AsmContext::new();
    prologue.push(asmcmp::AsmOp::Push, vec![Operand::Phys(PhysReg::Rbp)]);
    prologue.push(
        asmcmp::AsmOp::Mov,
        vec![Operand::Phys(PhysReg::Rbp), Operand::Phys(PhysReg::Rsp)],
    );
    for &reg in preserved {
        prologue.push(asmcmp::AsmOp::Push, vec![Operand::Phys(reg)]);
    }
    if allocated > 0 {
        prologue.push(
            asmcmp::AsmOp::Sub,
            vec![Operand::Phys(PhysReg::Rsp), Operand::ImmUnsigned(allocated)],
        );
    }
    out.push_str(&xasmgen::emit_function_body(
        &prologue,
        cfg.syntax,
        cfg.emit_comments,
        cfg.emit_indentation,
    ));

    out.push_str(&xasmgen::emit_function_body(
        ctx,
        cfg.syntax,
        cfg.emit_comments,
        cfg.emit_indentation,
    ));

    // Epilogue: spec.md §4.4 "add rsp, allocated; pop <each used
    // callee-saved in reverse>; pop rbp; ret" — appended once after the
    // body rather than spliced before every `ret`, since every
    // terminator this crate lowers already ends the control-flow path
    // (spec.md §3 "every block ends in exactly one terminator") and
    // `ret`/tail-calls are the only exits a function can take.
    let mut epilogue = AsmContext::new();
    if allocated > 0 {
        epilogue.push(
            asmcmp::AsmOp::Add,
            vec![Operand::Phys(PhysReg::Rsp), Operand::ImmUnsigned(allocated)],
        );
    }
    for &reg in preserved.iter().rev() {
        epilogue.push(asmcmp::AsmOp::Pop, vec![Operand::Phys(reg)]);
    }
    epilogue.push(asmcmp::AsmOp::Pop, vec![Operand::Phys(PhysReg::Rbp)]);
    out.push_str(&xasmgen::emit_function_body(
        &epilogue,
        cfg.syntax,
        cfg.emit_comments,
        cfg.emit_indentation,
    ));
    out.into_string()
}

/// Runs one function body through opt, lowering, liveness, register
/// allocation, and stack-frame layout, then renders its text (spec.md
/// §2 steps (a)-(f)).
fn compile_function(module: &mut Module, decl: FuncDecl, passes: &[opt::PassId], cfg: &Config) -> Result<String> {
    let decl_data = module.declaration(decl)?.clone();
    let name = module.strings.resolve(decl_data.name).to_string();
    let external = !module.is_external_definition(&decl_data);

    let mut func = module.take_function_body(decl).ok_or_else(|| {
        CoreError::new(
            ErrorKind::InvalidState,
            format!("function '{name}' has no body to consume, or was already consumed"),
        )
    })?;

    opt::run_pipeline(passes, module, &mut func)?;

    let (mut state, _entry_label) = lower::lower_function(module, &func, cfg)?;

    let liveness = asmcmp::build_from_context(&state.ctx);
    let stashes: Vec<regalloc::Stash> = state
        .ctx
        .stashes()
        .filter_map(|id| {
            let data = state.ctx.stash(id);
            data.call_position.map(|pos| regalloc::Stash {
                regs: data.regs.clone(),
                call_position: pos as u64,
            })
        })
        .collect();
    let assignment = regalloc::allocate(&state.vregs, &liveness, &stashes);

    let spill_count = assignment
        .values()
        .filter_map(|a| match a {
            Assignment::Spill(idx) => Some(*idx + 1),
            Assignment::Register(_) => None,
        })
        .max()
        .unwrap_or(0);
    for _ in 0..spill_count {
        state.frame_mut().add_spill_slot();
    }

    let mut preserved: Vec<PhysReg> = assignment
        .values()
        .filter_map(|a| match a {
            Assignment::Register(r) if r.is_callee_saved() => Some(*r),
            _ => None,
        })
        .collect();
    preserved.sort_by_key(|r| format!("{r:?}"));
    preserved.dedup();

    state.frame_mut().set_preserved_regs_size(preserved.len() as u64 * 8);
    let frame = state.frame.build();

    state.ctx.resolve_vregs(|vreg| match assignment.get(&vreg) {
        Some(Assignment::Register(reg)) => Operand::Phys(*reg),
        Some(Assignment::Spill(idx)) => Operand::indirect(
            Operand::Phys(PhysReg::Rbp),
            -(frame.spill_slot_offset(*idx) as i64),
            OperandWidth::Qword,
        ),
        None => Operand::Phys(PhysReg::Rax),
    });

    Ok(emit_one_function(&name, external, &state.ctx, &preserved, frame.allocated, cfg))
}

/// Emits `.extern`/TLS-section directives for every declaration with
/// no body and for the module's TLS table (spec.md §2: "Module-level
/// data and TLS globals are emitted after function bodies"; §6
/// "`.tbss` and `.tdata` (TLS)").
fn emit_module_data(module: &Module) -> String {
    let mut out = StringBuffer::new();

    let mut has_initialized = false;
    let mut has_uninitialized = false;
    for entry in module.tls_entries() {
        if entry.initialized {
            has_initialized = true;
        } else {
            has_uninitialized = true;
        }
    }
    if has_initialized {
        out.push_line(".tdata");
        for entry in module.tls_entries().iter().filter(|e| e.initialized) {
            out.push_line(&format!("{}:", module.strings.resolve(entry.name)));
        }
    }
    if has_uninitialized {
        out.push_line(".tbss");
        for entry in module.tls_entries().iter().filter(|e| !e.initialized) {
            out.push_line(&format!("{}:", module.strings.resolve(entry.name)));
        }
    }

    for decl in module.function_declarations() {
        if let Ok(data) = module.declaration(decl) {
            if module.function_body(decl).is_none() {
                out.push_line(&format!(".extern {}", module.strings.resolve(data.name)));
            }
        }
    }

    out.into_string()
}

/// Renders a byte slice as `.byte`-directive lines, twelve bytes per
/// line, matching the comma-separated style `emit_module_data` already
/// uses for its own directives.
fn emit_byte_section(out: &mut StringBuffer, directive: &str, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    out.push_line(directive);
    for chunk in bytes.chunks(12) {
        let values: Vec<String> = chunk.iter().map(|b| format!("0x{b:02x}")).collect();
        out.push_line(&format!(".byte {}", values.join(", ")));
    }
}

/// Walks `module.debug_info` into DWARF v5 DIEs and renders the
/// sections spec.md §6 lists (`.debug_abbrev`, `.debug_info`,
/// `.debug_line`, `.debug_loclists`, `.debug_str`) as `.byte`
/// directives. Called only when `cfg.debug_info` is set; an empty
/// debug tree still produces a valid, near-empty compilation unit.
fn emit_debug_sections(module: &Module) -> Result<String> {
    let mut builder = DwarfBuilder::new("amd64cc", "<module>");
    builder.build_from_tree(&module.debug_info);
    let sections = builder
        .write_sections()
        .map_err(|e| CoreError::new(ErrorKind::InvalidState, format!("DWARF emission failed: {e}")))?;

    let mut out = StringBuffer::new();
    emit_byte_section(&mut out, ".section .debug_abbrev", sections.debug_abbrev.slice());
    emit_byte_section(&mut out, ".section .debug_info", sections.debug_info.slice());
    emit_byte_section(&mut out, ".section .debug_line", sections.debug_line.slice());
    emit_byte_section(&mut out, ".section .debug_loclists", sections.debug_loclists.slice());
    emit_byte_section(&mut out, ".section .debug_str", sections.debug_str.slice());
    Ok(out.into_string())
}

/// Compiles every function body in `module` and appends the module's
/// data/TLS/external-symbol directives, producing one block of
/// assembly text in `cfg.syntax` (spec.md §2's end-to-end control
/// flow, applied to a whole module rather than one function).
///
/// Consumes every function body exactly once (spec.md §3 lifecycle:
/// "each IR function is consumed at most once per output"); calling
/// this twice on the same module is a no-op the second time around for
/// bodies already taken, surfacing as an error rather than silently
/// skipping them.
pub fn compile_module(module: &mut Module, cfg: &Config) -> Result<String> {
    let passes = opt::pipeline_for_level(cfg.optimization_level);
    let decls: Vec<FuncDecl> = module.function_declarations().collect();

    let mut out = StringBuffer::new();
    out.push_line(".text");
    for decl in decls {
        if module.function_body(decl).is_none() {
            continue;
        }
        let text = compile_function(module, decl, &passes, cfg)?;
        out.push_str(&text);
    }
    out.push_str(&emit_module_data(module));
    if cfg.debug_info {
        out.push_str(&emit_debug_sections(module)?);
    }
    Ok(out.into_string())
}

impl Module {
    /// Whether a declaration with a defined body should be visible
    /// outside this translation unit: spec.md §6 ties visibility to
    /// `IdentifierKind::Global`, matching the `.globl` directive this
    /// module emits for it.
    fn is_external_definition(&self, data: &crate::ir::module::FuncDeclData) -> bool {
        matches!(data.kind, IdentifierKind::Global)
    }
}
