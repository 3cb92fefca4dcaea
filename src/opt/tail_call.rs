//! Tail-call recognition: rewrites `call` immediately followed by
//! `return` of exactly that call's result (or a void call followed by
//! a void return) into a single `tail_invoke` terminator (spec.md §2
//! row "tail-call").
//!
//! Grounded on cranelift-codegen's tail-call lowering shape (pattern
//! match the call/return pair at the end of a block) adapted to this
//! IR's call-descriptor-only `CallRef`/`TailInvoke` payloads.

use crate::error::Result;
use crate::ir::instructions::InstData;
use crate::ir::module::Module;
use crate::ir::Function;
use crate::opt::PassResult;
use cranelift_entity::EntityRef;

pub fn apply(_module: &Module, func: &mut Function) -> Result<PassResult> {
    let mut changed = PassResult::Unchanged;
    let blocks: Vec<_> = func.blocks().collect();
    for block in blocks {
        let control = func.control_instructions(block);
        if control.len() < 2 {
            continue;
        }
        let ret = control[control.len() - 1];
        let call = control[control.len() - 2];

        let InstData::RefN {
            opcode: crate::ir::instructions::Opcode::Return,
            args,
        } = func.dfg.data(ret).clone()
        else {
            continue;
        };
        let InstData::CallRef { desc } = *func.dfg.data(call) else {
            continue;
        };

        let returns_call_result = match args.as_slice(&func.dfg.inst_pool) {
            [] => func.dfg.result_type(call).is_none(),
            [single] => *single == call,
            _ => false,
        };
        if !returns_call_result {
            continue;
        }
        // the call must have no other consumer: its only user is the
        // return we are about to erase (or none, in the void case).
        let other_users = func
            .dfg
            .users(call)
            .iter()
            .filter(|&&u| u != ret)
            .count();
        if other_users != 0 {
            continue;
        }

        func.drop_control(block, ret)?;
        func.drop_control(block, call)?;
        func.finalize_tail_invoke(block, desc)?;
        log::debug!(
            "tail_call: block {:?} fused call/return into tail_invoke ({})",
            block,
            desc.index()
        );
        changed = PassResult::Changed;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::entities::CallDescId;
    use cranelift_entity::EntityRef;

    #[test]
    fn fuses_call_then_return_of_its_result() {
        let module = Module::new();
        let mut func = Function::new();
        let block = func.make_block();
        let desc = CallDescId::new(0);
        let call = func
            .add_instruction(block, InstData::CallRef { desc }, None, true)
            .unwrap();
        func.finalize_return(block, Some(call)).unwrap();

        let result = apply(&module, &mut func).unwrap();
        assert_eq!(result, PassResult::Changed);
        let term = *func.control_instructions(block).last().unwrap();
        match func.dfg.data(term) {
            InstData::TailInvoke { desc: d } => assert_eq!(*d, desc),
            other => panic!("expected tail_invoke, got {other:?}"),
        }
    }

    #[test]
    fn leaves_call_alone_when_result_is_reused() {
        let module = Module::new();
        let mut func = Function::new();
        let block = func.make_block();
        let desc = CallDescId::new(0);
        let call = func
            .add_instruction(block, InstData::CallRef { desc }, None, true)
            .unwrap();
        func.add_instruction(
            block,
            InstData::Unary {
                opcode: crate::ir::instructions::Opcode::IntNeg,
                arg: call,
            },
            None,
            false,
        )
        .unwrap();
        func.finalize_return(block, Some(call)).unwrap();

        let result = apply(&module, &mut func).unwrap();
        assert_eq!(result, PassResult::Unchanged);
    }
}
