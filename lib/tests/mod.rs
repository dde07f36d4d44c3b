//! End-to-end dataflow scenarios over hand-built IL.

use crate::analysis::{self, Dataflow, DataflowAnalyzer};
use crate::architecture::{Amd64, Architecture, Endian, Mips};
use crate::il::{
    self, Access, Callback, IntrinsicKind, MemoryDomain, MemoryLocation, Term,
};
use crate::{CancellationToken, Error};

/// A register slot: 64-bit registers at 64-bit strides in the bank.
fn reg(slot: i64, bits: usize) -> Term {
    il::register(slot * 64, bits)
}

fn analyze(function: &mut il::Function, architecture: &dyn Architecture) -> Dataflow {
    analysis::dataflow(function, architecture, &CancellationToken::new()).unwrap()
}

fn single_block_function<F>(build: F) -> il::Function
where
    F: FnOnce(&mut il::Block),
{
    let mut control_flow_graph = il::ControlFlowGraph::new();
    let block_index = {
        let block = control_flow_graph.new_block().unwrap();
        build(block);
        block.index()
    };
    control_flow_graph.set_entry(block_index).unwrap();
    il::Function::new(0x1000, control_flow_graph)
}

/// Two blocks `entry -> tail` with `tail` looping on itself.
fn loop_function<FE, FT>(build_entry: FE, build_tail: FT) -> il::Function
where
    FE: FnOnce(&mut il::Block),
    FT: FnOnce(&mut il::Block),
{
    let mut control_flow_graph = il::ControlFlowGraph::new();

    let entry_index = {
        let block = control_flow_graph.new_block().unwrap();
        build_entry(block);
        block.index()
    };
    let tail_index = {
        let block = control_flow_graph.new_block().unwrap();
        build_tail(block);
        block.index()
    };

    control_flow_graph.add_edge(entry_index, tail_index).unwrap();
    control_flow_graph.add_edge(tail_index, tail_index).unwrap();
    control_flow_graph.set_entry(entry_index).unwrap();

    il::Function::new(0x1000, control_flow_graph)
}

#[test]
fn constant_propagation_through_register() {
    // r0 = 5; r1 = r0 + 3
    let sum = il::add(reg(0, 64), il::const_term(3, 64)).unwrap();

    let mut function = single_block_function(|block| {
        block.assign(reg(0, 64), il::const_term(5, 64));
        block.assign(reg(1, 64), sum.clone());
    });
    let dataflow = analyze(&mut function, &Amd64::new());

    let value = dataflow.value(&sum).unwrap();
    assert_eq!(value.abstract_value().as_concrete().unwrap().value(), 8);
    assert!(value.is_not_stack_offset());
    assert!(value.is_not_product());
}

#[test]
fn stack_frame_slot_propagation() {
    // sp = <entry sp>; sp = sp - 16; [sp + 4] = 7; x = [sp + 4]
    let sp = 16;
    let store = Term::dereference(
        il::add(reg(sp, 64), il::const_term(4, 64)).unwrap(),
        MemoryDomain::Memory,
        32,
    );
    let load = Term::dereference(
        il::add(reg(sp, 64), il::const_term(4, 64)).unwrap(),
        MemoryDomain::Memory,
        32,
    );

    let mut function = single_block_function(|block| {
        block.assign(reg(sp, 64), il::intrinsic(IntrinsicKind::ZeroStackOffset, 64));
        block.assign(
            reg(sp, 64),
            il::sub(reg(sp, 64), il::const_term(16, 64)).unwrap(),
        );
        block.assign(store.clone(), il::const_term(7, 32));
        block.assign(reg(0, 32), load.clone());
    });
    let dataflow = analyze(&mut function, &Amd64::new());

    assert_eq!(
        dataflow.memory_location(&load),
        Some(&MemoryLocation::new(MemoryDomain::Stack, -12 * 8, 32))
    );
    assert_eq!(
        dataflow
            .value(&load)
            .unwrap()
            .abstract_value()
            .as_concrete()
            .unwrap()
            .value(),
        7
    );
}

#[test]
fn loop_widening_terminates() {
    // entry: i = 0; loop: i = i + 1
    let i_read = reg(2, 64);
    let increment = il::add(i_read.clone(), il::const_term(1, 64)).unwrap();

    let mut function = loop_function(
        |entry| {
            entry.assign(reg(2, 64), il::const_term(0, 64));
        },
        |tail| {
            tail.assign(reg(2, 64), increment.clone());
        },
    );
    let dataflow = analyze(&mut function, &Amd64::new());

    let value = dataflow.value(&i_read).unwrap();
    assert!(value.abstract_value().is_nondeterministic());
    assert!(value.is_not_stack_offset());
    assert!(value.is_not_product());
}

fn wider_write_narrow_read(architecture: &dyn Architecture) -> u64 {
    // [0x100] = 0xDEADBEEF as 32 bits; read [0x100] as 16 bits
    let load = Term::dereference(il::const_term(0x100, 64), MemoryDomain::Memory, 16);

    let mut function = single_block_function(|block| {
        block.assign(
            Term::dereference(il::const_term(0x100, 64), MemoryDomain::Memory, 32),
            il::const_term(0xdeadbeef, 32),
        );
        block.assign(reg(0, 16), load.clone());
    });
    let dataflow = analyze(&mut function, architecture);

    dataflow
        .value(&load)
        .unwrap()
        .abstract_value()
        .as_concrete()
        .unwrap()
        .value()
}

#[test]
fn kill_on_wider_write() {
    assert_eq!(wider_write_narrow_read(&Amd64::new()), 0xbeef);
    assert_eq!(wider_write_narrow_read(&Mips::new()), 0xdead);
}

fn two_halfword_writes_word_read(architecture: &dyn Architecture) -> u64 {
    // [0x100] = 0xAABB; [0x102] = 0xCCDD; read 32 bits at [0x100]
    let load = Term::dereference(il::const_term(0x100, 64), MemoryDomain::Memory, 32);

    let mut function = single_block_function(|block| {
        block.assign(
            Term::dereference(il::const_term(0x100, 64), MemoryDomain::Memory, 16),
            il::const_term(0xaabb, 16),
        );
        block.assign(
            Term::dereference(il::const_term(0x102, 64), MemoryDomain::Memory, 16),
            il::const_term(0xccdd, 16),
        );
        block.assign(reg(0, 32), load.clone());
    });
    let dataflow = analyze(&mut function, architecture);

    dataflow
        .value(&load)
        .unwrap()
        .abstract_value()
        .as_concrete()
        .unwrap()
        .value()
}

#[test]
fn endian_symmetry() {
    let little = two_halfword_writes_word_read(&Amd64::new());
    let big = two_halfword_writes_word_read(&Mips::new());

    assert_eq!(little, 0xccdd_aabb);
    assert_eq!(big, 0xaabb_ccdd);
    // The same two halfword stores read back halfword-mirrored across
    // byte orders.
    assert_eq!(little as u32, (big as u32).rotate_left(16));
}

#[test]
fn unresolved_dereference_clears_definitions() {
    // entry: a = 5; loop: x = [a]; a = <unknown>
    // On the first pass [a] resolves to memory address 5; once the loop
    // merges the unknown redefinition of a, the address is lost again.
    let load = Term::dereference(reg(1, 64), MemoryDomain::Memory, 32);

    let mut function = loop_function(
        |entry| {
            entry.assign(reg(1, 64), il::const_term(5, 64));
        },
        |tail| {
            tail.assign(reg(0, 32), load.clone());
            tail.assign(reg(1, 64), il::intrinsic(IntrinsicKind::Unknown, 64));
        },
    );
    let dataflow = analyze(&mut function, &Amd64::new());

    assert_eq!(dataflow.memory_location(&load), None);
    assert!(dataflow
        .definitions(&load)
        .map(|definitions| definitions.is_empty())
        .unwrap_or(true));
}

#[test]
fn cancellation_aborts_analysis() {
    let mut function = single_block_function(|block| {
        block.assign(reg(0, 64), il::const_term(5, 64));
    });

    let canceled = CancellationToken::new();
    canceled.cancel();

    let mut dataflow = Dataflow::new();
    let result =
        DataflowAnalyzer::new(&mut dataflow, &Amd64::new()).analyze(&mut function, &canceled);

    assert!(matches!(result, Err(Error::Cancelled)));
    // The first iteration ran to completion before the poll; partial
    // facts exist and simply must not be trusted.
    assert!(dataflow.values().next().is_some());
}

#[test]
fn choice_selects_on_reaching_definitions() {
    let defined = Term::choice(reg(5, 64), il::const_term(9, 64)).unwrap();
    let undefined = Term::choice(reg(6, 64), il::const_term(9, 64)).unwrap();

    let mut function = single_block_function(|block| {
        block.assign(reg(5, 64), il::const_term(5, 64));
        block.touch(defined.clone(), Access::READ);
        block.touch(undefined.clone(), Access::READ);
    });
    let dataflow = analyze(&mut function, &Amd64::new());

    assert_eq!(
        dataflow
            .value(&defined)
            .unwrap()
            .abstract_value()
            .as_concrete()
            .unwrap()
            .value(),
        5
    );
    assert_eq!(
        dataflow
            .value(&undefined)
            .unwrap()
            .abstract_value()
            .as_concrete()
            .unwrap()
            .value(),
        9
    );
}

#[test]
fn analysis_is_idempotent() {
    // Re-running over a converged store must change nothing, on a CFG
    // with a dependency cycle.
    let i_read = reg(2, 64);
    let increment = il::add(i_read, il::const_term(1, 64)).unwrap();

    let mut function = loop_function(
        |entry| {
            entry.assign(reg(2, 64), il::const_term(0, 64));
        },
        |tail| {
            tail.assign(reg(2, 64), increment);
        },
    );

    let mut dataflow = Dataflow::new();
    DataflowAnalyzer::new(&mut dataflow, &Amd64::new())
        .analyze(&mut function, &CancellationToken::new())
        .unwrap();
    let converged = dataflow.clone();

    DataflowAnalyzer::new(&mut dataflow, &Amd64::new())
        .analyze(&mut function, &CancellationToken::new())
        .unwrap();

    assert_eq!(dataflow, converged);
}

#[test]
fn reaching_snapshot_captures_definitions() {
    let snapshot = il::intrinsic(IntrinsicKind::ReachingSnapshot, 64);
    let r0_write = reg(0, 64);
    let r0_index = r0_write.index();

    let mut function = single_block_function(|block| {
        block.assign(r0_write, il::const_term(5, 64));
        block.touch(snapshot.clone(), Access::READ);
    });
    let dataflow = analyze(&mut function, &Amd64::new());

    let definitions = dataflow.definitions(&snapshot).unwrap();
    assert_eq!(definitions.chunks().len(), 1);
    let chunk = &definitions.chunks()[0];
    assert_eq!(
        chunk.location(),
        &MemoryLocation::new(MemoryDomain::Registers, 0, 64)
    );
    assert_eq!(chunk.definitions(), &[r0_index]);
}

#[test]
fn instruction_address_intrinsics() {
    let here = il::intrinsic(IntrinsicKind::InstructionAddress, 64);
    let next = il::intrinsic(IntrinsicKind::NextInstructionAddress, 64);

    let mut function = single_block_function(|block| {
        block
            .touch(here.clone(), Access::READ)
            .set_address(Some(0x4000))
            .set_byte_size(Some(4));
        block
            .touch(next.clone(), Access::READ)
            .set_address(Some(0x4000))
            .set_byte_size(Some(4));
    });
    let dataflow = analyze(&mut function, &Amd64::new());

    assert_eq!(
        dataflow
            .value(&here)
            .unwrap()
            .abstract_value()
            .as_concrete()
            .unwrap()
            .value(),
        0x4000
    );
    assert_eq!(
        dataflow
            .value(&next)
            .unwrap()
            .abstract_value()
            .as_concrete()
            .unwrap()
            .value(),
        0x4004
    );
}

#[test]
fn inline_assembly_preserves_definitions() {
    // Clearing definitions at inline assembly would be conservatively
    // correct; the analyzer deliberately keeps them.
    let sum = il::add(reg(0, 64), il::const_term(3, 64)).unwrap();

    let mut function = single_block_function(|block| {
        block.assign(reg(0, 64), il::const_term(5, 64));
        block.inline_assembly();
        block.ret();
        block.assign(reg(1, 64), sum.clone());
    });
    let dataflow = analyze(&mut function, &Amd64::new());

    assert_eq!(
        dataflow
            .value(&sum)
            .unwrap()
            .abstract_value()
            .as_concrete()
            .unwrap()
            .value(),
        8
    );
}

#[test]
fn jump_and_call_operands_are_evaluated() {
    let condition = Term::binary(
        il::BinaryOperatorKind::Cmpltu,
        reg(0, 64),
        il::const_term(10, 64),
    )
    .unwrap();
    let then_target = il::const_term(0x2000, 64);
    let call_target = il::const_term(0x3000, 64);

    let mut function = single_block_function(|block| {
        block.assign(reg(0, 64), il::const_term(4, 64));
        block.call(call_target.clone());
        block.jump(Some(condition.clone()), Some(then_target.clone()), None);
    });
    let dataflow = analyze(&mut function, &Amd64::new());

    assert_eq!(
        dataflow
            .value(&condition)
            .unwrap()
            .abstract_value()
            .as_concrete()
            .unwrap()
            .value(),
        1
    );
    assert_eq!(
        dataflow
            .value(&then_target)
            .unwrap()
            .abstract_value()
            .as_concrete()
            .unwrap()
            .value(),
        0x2000
    );
    assert_eq!(
        dataflow
            .value(&call_target)
            .unwrap()
            .abstract_value()
            .as_concrete()
            .unwrap()
            .value(),
        0x3000
    );
}

#[test]
fn kill_access_removes_definitions() {
    let killed = Term::choice(reg(0, 64), il::const_term(9, 64)).unwrap();

    let mut function = single_block_function(|block| {
        block.assign(reg(0, 64), il::const_term(5, 64));
        block.touch(reg(0, 64), Access::KILL);
        block.touch(killed.clone(), Access::READ);
    });
    let dataflow = analyze(&mut function, &Amd64::new());

    // No definition of r0 reaches the choice; it falls to its default.
    assert_eq!(
        dataflow
            .value(&killed)
            .unwrap()
            .abstract_value()
            .as_concrete()
            .unwrap()
            .value(),
        9
    );
}

#[test]
fn callback_deinstruments_a_block() {
    // entry: r0 = 1; victim: r1 = 2; last: <remove victim>
    let victim_write = reg(1, 64);
    let victim_index = victim_write.index();

    let mut control_flow_graph = il::ControlFlowGraph::new();
    let entry_index = {
        let block = control_flow_graph.new_block().unwrap();
        block.assign(reg(0, 64), il::const_term(1, 64));
        block.index()
    };
    let victim_block_index = {
        let block = control_flow_graph.new_block().unwrap();
        block.assign(victim_write, il::const_term(2, 64));
        block.index()
    };
    let last_index = {
        let block = control_flow_graph.new_block().unwrap();
        block.callback(Callback::new(move |function| {
            let _ = function
                .control_flow_graph_mut()
                .remove_block(victim_block_index);
        }));
        block.index()
    };

    control_flow_graph.add_edge(entry_index, victim_block_index).unwrap();
    control_flow_graph.add_edge(victim_block_index, last_index).unwrap();
    control_flow_graph.set_entry(entry_index).unwrap();

    let mut function = il::Function::new(0x1000, control_flow_graph);
    let dataflow = analyze(&mut function, &Amd64::new());

    // The victim block's terms disappeared from every map, including
    // from stored definition sets.
    assert!(dataflow.index_value(victim_index).is_none());
    assert!(dataflow.index_memory_location(victim_index).is_none());
    assert!(dataflow.all_definitions().all(|(_, definitions)| {
        definitions
            .chunks()
            .iter()
            .all(|chunk| !chunk.definitions().contains(&victim_index))
    }));
}

#[test]
fn global_memory_reads_are_opaque() {
    #[derive(Clone, Debug)]
    struct GlobalDataArch {}

    impl Architecture for GlobalDataArch {
        fn name(&self) -> &str {
            "global-data"
        }
        fn endian(&self) -> Endian {
            Endian::Little
        }
        fn word_size(&self) -> usize {
            64
        }
        fn is_global_memory(&self, memory_location: &MemoryLocation) -> bool {
            memory_location.domain() == MemoryDomain::Memory
        }
        fn box_clone(&self) -> Box<dyn Architecture> {
            Box::new(self.clone())
        }
    }

    let load = Term::dereference(il::const_term(0x100, 64), MemoryDomain::Memory, 32);

    let mut function = single_block_function(|block| {
        block.assign(
            Term::dereference(il::const_term(0x100, 64), MemoryDomain::Memory, 32),
            il::const_term(7, 32),
        );
        block.assign(reg(0, 32), load.clone());
    });
    let dataflow = analyze(&mut function, &GlobalDataArch {});

    // The location resolves, but no definitions are tracked through
    // global memory and no value is learned.
    assert_eq!(
        dataflow.memory_location(&load),
        Some(&MemoryLocation::new(MemoryDomain::Memory, 0x100 * 8, 32))
    );
    assert!(dataflow
        .value(&load)
        .map(|value| !value.abstract_value().is_concrete())
        .unwrap_or(true));
    assert!(dataflow
        .definitions(&load)
        .map(|definitions| definitions.is_empty())
        .unwrap_or(true));
}
