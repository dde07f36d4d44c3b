//! The dataflow analyzer: abstract interpretation of a function until
//! values, memory locations and reaching definitions stop changing.
//!
//! The three results feed each other. Resolving a dereference gives a
//! term a memory location; the location gives its reads reaching
//! definitions; merging the defining values can make another address
//! concrete and resolve the next dereference. No single problem can be
//! solved first, so the analyzer sweeps every basic block and keeps
//! sweeping until three consecutive passes leave the per-block
//! out-definitions untouched.
//!
//! A single stable pass is not enough: with mutually dependent locations
//! and definitions, one unchanged sweep can be an artefact of traversal
//! order. Three identical passes guarantee every dependency cycle has
//! quiesced.

use crate::analysis::abstract_value::bit_mask;
use crate::analysis::{AbstractValue, Dataflow, ExecutionContext, ReachingDefinitions};
use crate::architecture::{Architecture, Endian};
use crate::il::{
    BinaryOperatorKind, Constant, Function, Instruction, IntrinsicKind, MemoryDomain,
    MemoryLocation, Statement, Term, TermKind, UnaryOperatorKind,
};
use crate::{CancellationToken, Error};
use log::warn;
use rustc_hash::{FxHashMap, FxHashSet};

/// Bits per unit of byte-addressed machine memory.
const BITS_PER_BYTE: i64 = 8;

/// Hard cap on fixpoint iterations, against pathological divergence.
const MAX_ITERATIONS: usize = 30;

/// Number of consecutive unchanged passes required for convergence.
const STABLE_PASSES: usize = 3;

/// Compute dataflow for the given function.
pub fn dataflow(
    function: &mut Function,
    architecture: &dyn Architecture,
    canceled: &CancellationToken,
) -> Result<Dataflow, Error> {
    let mut dataflow = Dataflow::new();
    DataflowAnalyzer::new(&mut dataflow, architecture).analyze(function, canceled)?;
    Ok(dataflow)
}

/// Drives abstract interpretation over one function, filling a borrowed
/// `Dataflow` store.
pub struct DataflowAnalyzer<'a> {
    dataflow: &'a mut Dataflow,
    architecture: &'a dyn Architecture,
}

impl<'a> DataflowAnalyzer<'a> {
    pub fn new(
        dataflow: &'a mut Dataflow,
        architecture: &'a dyn Architecture,
    ) -> DataflowAnalyzer<'a> {
        DataflowAnalyzer {
            dataflow,
            architecture,
        }
    }

    pub fn dataflow(&self) -> &Dataflow {
        self.dataflow
    }

    pub fn architecture(&self) -> &dyn Architecture {
        self.architecture
    }

    /// Run the analysis to a fixpoint, mutating the dataflow store.
    ///
    /// Statements may mutate the function through embedded callbacks;
    /// block and statement lists are therefore re-read on every pass. On
    /// cancellation the store is left as-is and may be inconsistent; on
    /// normal return facts about terms that disappeared from the
    /// function have been dropped.
    pub fn analyze(
        &mut self,
        function: &mut Function,
        canceled: &CancellationToken,
    ) -> Result<(), Error> {
        // Definitions reaching the end of each basic block.
        let mut out_definitions: FxHashMap<usize, ReachingDefinitions> = FxHashMap::default();

        let mut iterations = 0;
        let mut stable_passes = 0;

        while stable_passes < STABLE_PASSES {
            stable_passes += 1;

            let block_indices: Vec<usize> = function
                .blocks()
                .into_iter()
                .map(|block| block.index())
                .collect();

            for block_index in block_indices {
                let mut context = ExecutionContext::new();

                for predecessor in function
                    .control_flow_graph()
                    .predecessor_indices(block_index)?
                {
                    if let Some(definitions) = out_definitions.get(&predecessor) {
                        context.definitions_mut().merge(definitions);
                    }
                }

                // Definitions whose defining term has since moved to an
                // incompatible location do not reach this block.
                {
                    let dataflow = &*self.dataflow;
                    context.definitions_mut().filter_out(|location, term_index| {
                        !dataflow.location_covers(term_index, location)
                    });
                }

                let mut position = 0;
                loop {
                    // Re-fetched on every step: a callback may have
                    // restructured the function under our feet.
                    let instruction = match function
                        .block(block_index)
                        .ok()
                        .and_then(|block| block.instructions().get(position))
                    {
                        Some(instruction) => instruction.clone(),
                        None => break,
                    };
                    position += 1;
                    self.execute_statement(&instruction, function, &mut context)?;
                }

                let definitions = out_definitions.entry(block_index).or_default();
                if *definitions != *context.definitions() {
                    *definitions = context.into_definitions();
                    stable_passes = 0;
                }
            }

            // Term locations may have migrated during the pass. Filter
            // the stored per-term definitions again.
            self.dataflow.retain_covering_definitions();

            iterations += 1;
            if iterations >= MAX_ITERATIONS {
                warn!(
                    "Fixpoint was not reached after {} iterations while analyzing dataflow of {}. Giving up.",
                    iterations,
                    function.name()
                );
                break;
            }

            canceled.poll()?;
        }

        // Remove information about terms that disappeared. Terms can
        // disappear if e.g. a call is de-instrumented during the
        // analysis.
        let live: FxHashSet<u64> = function.terms().iter().map(|term| term.index()).collect();
        self.dataflow
            .retain_terms(|term_index| live.contains(&term_index));

        Ok(())
    }

    fn execute_statement(
        &mut self,
        instruction: &Instruction,
        function: &mut Function,
        context: &mut ExecutionContext,
    ) -> Result<(), Error> {
        match instruction.statement() {
            // Clearing the reaching definitions here would be completely
            // correct, but usually leads to worse code downstream.
            Statement::InlineAssembly => {}
            Statement::Assign { left, right } => {
                self.execute_term(right, instruction, context)?;
                self.execute_term(left, instruction, context)?;

                // The written location carries the value of the right
                // side; reads reached by this definition merge it in.
                let value = self.dataflow.value(right).cloned().unwrap_or_default();
                *self.dataflow.value_mut(left) = value;
            }
            Statement::Jump {
                condition,
                then_target,
                else_target,
            } => {
                if let Some(condition) = condition {
                    self.execute_term(condition, instruction, context)?;
                }
                if let Some(target) = then_target {
                    self.execute_term(target, instruction, context)?;
                }
                if let Some(target) = else_target {
                    self.execute_term(target, instruction, context)?;
                }
            }
            Statement::Call { target } => {
                self.execute_term(target, instruction, context)?;
            }
            Statement::Return => {}
            Statement::Touch { term } => {
                self.execute_term(term, instruction, context)?;
            }
            Statement::Callback { callback } => {
                callback.call(function);
            }
        }
        Ok(())
    }

    fn execute_term(
        &mut self,
        term: &Term,
        instruction: &Instruction,
        context: &mut ExecutionContext,
    ) -> Result<(), Error> {
        match term.kind() {
            TermKind::IntConst(constant) => {
                let value = self.dataflow.value_mut(term);
                value.set_abstract_value(AbstractValue::from(constant.clone()));
                value.make_not_stack_offset();
                value.make_not_product();
            }
            TermKind::Intrinsic(kind) => {
                self.execute_intrinsic(term, *kind, instruction, context);
            }
            TermKind::MemoryLocationAccess(memory_location) => {
                let memory_location = memory_location.clone();
                self.set_memory_location(term, Some(memory_location), context);
            }
            TermKind::Dereference { address, domain } => {
                self.execute_term(address, instruction, context)?;

                let address_value = self.dataflow.value(address).cloned().unwrap_or_default();
                let memory_location =
                    if let Some(constant) = address_value.abstract_value().as_concrete() {
                        if *domain == MemoryDomain::Memory {
                            // Memory addresses are in bytes; locations in bits.
                            Some(MemoryLocation::new(
                                *domain,
                                (constant.value() as i64).wrapping_mul(BITS_PER_BYTE),
                                term.bits(),
                            ))
                        } else {
                            // Non-memory domains are bit-addressed already.
                            Some(MemoryLocation::new(
                                *domain,
                                constant.value() as i64,
                                term.bits(),
                            ))
                        }
                    } else if address_value.is_stack_offset() {
                        Some(MemoryLocation::new(
                            MemoryDomain::Stack,
                            address_value.stack_offset().wrapping_mul(BITS_PER_BYTE),
                            term.bits(),
                        ))
                    } else {
                        None
                    };

                self.set_memory_location(term, memory_location, context);
            }
            TermKind::UnaryOperator { kind, operand } => {
                self.execute_unary_operator(term, *kind, operand, instruction, context)?;
            }
            TermKind::BinaryOperator { kind, left, right } => {
                self.execute_binary_operator(term, *kind, left, right, instruction, context)?;
            }
            TermKind::Choice { preferred, default } => {
                self.execute_term(preferred, instruction, context)?;
                self.execute_term(default, instruction, context)?;

                let preferred_is_defined = self
                    .dataflow
                    .definitions(preferred)
                    .map(|definitions| !definitions.is_empty())
                    .unwrap_or(false);
                let chosen = if preferred_is_defined {
                    self.dataflow.value(preferred).cloned().unwrap_or_default()
                } else {
                    self.dataflow.value(default).cloned().unwrap_or_default()
                };
                *self.dataflow.value_mut(term) = chosen;
            }
        }
        Ok(())
    }

    fn execute_intrinsic(
        &mut self,
        term: &Term,
        kind: IntrinsicKind,
        instruction: &Instruction,
        context: &ExecutionContext,
    ) {
        match kind {
            IntrinsicKind::Unknown | IntrinsicKind::Undefined => {
                let value = self.dataflow.value_mut(term);
                value.set_abstract_value(AbstractValue::nondeterministic(term.bits()));
                value.make_not_stack_offset();
                value.make_not_product();
            }
            IntrinsicKind::ZeroStackOffset => {
                let value = self.dataflow.value_mut(term);
                value.set_abstract_value(AbstractValue::nondeterministic(term.bits()));
                value.make_stack_offset(0);
                value.make_not_product();
            }
            IntrinsicKind::ReachingSnapshot => {
                *self.dataflow.definitions_mut(term) = context.definitions().clone();
            }
            IntrinsicKind::InstructionAddress => {
                self.set_address_value(term, instruction.address());
            }
            IntrinsicKind::NextInstructionAddress => {
                let address = instruction.address().and_then(|address| {
                    instruction
                        .byte_size()
                        .map(|byte_size| address.wrapping_add(byte_size))
                });
                self.set_address_value(term, address);
            }
        }
    }

    // Instruction addresses are concrete when known and degrade to the
    // nondeterministic value when the IR carries no address information.
    fn set_address_value(&mut self, term: &Term, address: Option<u64>) {
        let value = self.dataflow.value_mut(term);
        match address {
            Some(address) => {
                value.set_abstract_value(AbstractValue::from(Constant::new(address, term.bits())));
            }
            None => {
                value.set_abstract_value(AbstractValue::nondeterministic(term.bits()));
            }
        }
        value.make_not_stack_offset();
        value.make_not_product();
    }

    /// Record the location a term resolved to and update the reaching
    /// definitions: project them into reads, add writes, apply kills.
    fn set_memory_location(
        &mut self,
        term: &Term,
        new_location: Option<MemoryLocation>,
        context: &mut ExecutionContext,
    ) {
        let old_location = self.dataflow.memory_location(term).cloned();

        if old_location != new_location {
            self.dataflow.set_memory_location(term, new_location.clone());

            // A write that changed location no longer defines the old
            // one; drop its stale pairs from the context.
            if old_location.is_some() && term.is_write() {
                let term_index = term.index();
                context
                    .definitions_mut()
                    .filter_out(|_, definition| definition == term_index);
            }
        }

        match new_location {
            Some(location) if !self.architecture.is_global_memory(&location) => {
                if term.is_read() {
                    let definitions = {
                        let stored = self.dataflow.definitions_mut(term);
                        context.definitions().project(&location, stored);
                        stored.clone()
                    };
                    self.merge_reaching_values(term, &location, &definitions);
                }
                if term.is_write() {
                    context
                        .definitions_mut()
                        .add_definition(location.clone(), term.index());
                }
                if term.is_kill() {
                    context.definitions_mut().kill_definitions(&location);
                }
            }
            _ => {
                // Reads of global memory, and reads whose address is no
                // longer resolvable, have no applicable definitions.
                if term.is_read() && old_location.is_some() {
                    self.dataflow.definitions_mut(term).clear();
                }
            }
        }
    }

    /// Merge the abstract values and flags of the definitions reaching a
    /// read into the read's value, shifting each definition's bits to
    /// the position it occupies within the read.
    fn merge_reaching_values(
        &mut self,
        term: &Term,
        term_location: &MemoryLocation,
        definitions: &ReachingDefinitions,
    ) {
        debug_assert!(term.is_read());

        if definitions.is_empty() {
            return;
        }

        let little_endian = self.architecture.endian() == Endian::Little;

        let mut merged = self
            .dataflow
            .value(term)
            .map(|value| value.abstract_value().clone())
            .unwrap_or_default();

        for chunk in definitions.chunks() {
            debug_assert!(term_location.covers(chunk.location()));

            // Mask of the bits of the term's value this chunk covers.
            let mask_shift = if little_endian {
                chunk.location().addr() - term_location.addr()
            } else {
                term_location.end_addr() - chunk.location().end_addr()
            };
            let mask = if mask_shift >= 64 {
                0
            } else {
                bit_mask(chunk.location().size()) << mask_shift as u32
            };

            for &definition in chunk.definitions() {
                let definition_location = match self.dataflow.index_memory_location(definition) {
                    Some(location) => location.clone(),
                    None => continue,
                };
                debug_assert!(definition_location.covers(chunk.location()));

                let definition_abstract_value = self
                    .dataflow
                    .index_value(definition)
                    .map(|value| value.abstract_value().clone())
                    .unwrap_or_default();

                // Shift the definition's value to the position of its
                // own location within the term, then keep only the bits
                // the chunk says it defines.
                let offset = if little_endian {
                    definition_location.addr() - term_location.addr()
                } else {
                    term_location.end_addr() - definition_location.end_addr()
                };
                let definition_abstract_value =
                    definition_abstract_value.shift(offset).project(mask);

                merged = merged.merge(&definition_abstract_value);
            }
        }

        self.dataflow
            .value_mut(term)
            .set_abstract_value(merged.resize(term.bits()));

        // Stack-offset and product flags propagate only from definitions
        // supplying the low-order bits of the term's value; only there
        // does the arithmetic interpretation survive.
        let lower_bits_definitions = if little_endian {
            definitions
                .chunks()
                .first()
                .filter(|chunk| chunk.location().addr() == term_location.addr())
                .map(|chunk| chunk.definitions().to_vec())
        } else {
            definitions
                .chunks()
                .last()
                .filter(|chunk| chunk.location().end_addr() == term_location.end_addr())
                .map(|chunk| chunk.definitions().to_vec())
        };

        if let Some(lower_bits_definitions) = lower_bits_definitions {
            for definition in lower_bits_definitions {
                let definition_value =
                    self.dataflow.index_value(definition).cloned().unwrap_or_default();
                let term_value = self.dataflow.value_mut(term);

                if definition_value.is_not_stack_offset() {
                    term_value.make_not_stack_offset();
                } else if definition_value.is_stack_offset() {
                    term_value.make_stack_offset(definition_value.stack_offset());
                }

                if definition_value.is_not_product() {
                    term_value.make_not_product();
                } else if definition_value.is_product() {
                    term_value.make_product();
                }
            }
        }
    }

    fn execute_unary_operator(
        &mut self,
        term: &Term,
        kind: UnaryOperatorKind,
        operand: &Term,
        instruction: &Instruction,
        context: &mut ExecutionContext,
    ) -> Result<(), Error> {
        self.execute_term(operand, instruction, context)?;

        let operand_value = self.dataflow.value(operand).cloned().unwrap_or_default();
        let result = DataflowAnalyzer::apply_unary(kind, term.bits(), operand_value.abstract_value());

        let value = self.dataflow.value_mut(term);
        let merged = result.merge(value.abstract_value());
        value.set_abstract_value(merged);

        match kind {
            // Resizing a pointer preserves its offset.
            UnaryOperatorKind::SignExtend
            | UnaryOperatorKind::ZeroExtend
            | UnaryOperatorKind::Truncate => {
                if operand_value.is_not_stack_offset() {
                    value.make_not_stack_offset();
                } else if operand_value.is_stack_offset() {
                    value.make_stack_offset(operand_value.stack_offset());
                }
                if operand_value.is_not_product() {
                    value.make_not_product();
                } else if operand_value.is_product() {
                    value.make_product();
                }
            }
            _ => {
                value.make_not_stack_offset();
                value.make_not_product();
            }
        }

        Ok(())
    }

    fn execute_binary_operator(
        &mut self,
        term: &Term,
        kind: BinaryOperatorKind,
        left: &Term,
        right: &Term,
        instruction: &Instruction,
        context: &mut ExecutionContext,
    ) -> Result<(), Error> {
        self.execute_term(left, instruction, context)?;
        self.execute_term(right, instruction, context)?;

        let left_value = self.dataflow.value(left).cloned().unwrap_or_default();
        let right_value = self.dataflow.value(right).cloned().unwrap_or_default();

        let result = DataflowAnalyzer::apply_binary(
            kind,
            left_value.abstract_value(),
            right_value.abstract_value(),
        );

        let value = self.dataflow.value_mut(term);
        let merged = result.merge(value.abstract_value());
        value.set_abstract_value(merged);

        // Compute the stack-offset flag.
        match kind {
            BinaryOperatorKind::Add => {
                if left_value.is_stack_offset() {
                    if let Some(constant) = right_value.abstract_value().as_concrete() {
                        value.make_stack_offset(
                            left_value.stack_offset().wrapping_add(constant.signed_value()),
                        );
                    } else if right_value.abstract_value().is_nondeterministic() {
                        value.make_not_stack_offset();
                    }
                }
                if right_value.is_stack_offset() {
                    if let Some(constant) = left_value.abstract_value().as_concrete() {
                        value.make_stack_offset(
                            right_value.stack_offset().wrapping_add(constant.signed_value()),
                        );
                    } else if left_value.abstract_value().is_nondeterministic() {
                        value.make_not_stack_offset();
                    }
                }
                if left_value.is_not_stack_offset() && right_value.is_not_stack_offset() {
                    value.make_not_stack_offset();
                }
            }
            BinaryOperatorKind::Sub => {
                match right_value.abstract_value().as_concrete() {
                    Some(constant) if left_value.is_stack_offset() => {
                        value.make_stack_offset(
                            left_value.stack_offset().wrapping_sub(constant.signed_value()),
                        );
                    }
                    _ => {
                        if left_value.is_not_stack_offset()
                            || right_value.abstract_value().is_nondeterministic()
                        {
                            value.make_not_stack_offset();
                        }
                    }
                }
            }
            BinaryOperatorKind::And => {
                // Sometimes used for aligning stack pointer values.
                let left_constant = left_value.abstract_value().as_concrete();
                let right_constant = right_value.abstract_value().as_concrete();
                match (left_constant, right_constant) {
                    (_, Some(constant)) if left_value.is_stack_offset() => {
                        value.make_stack_offset(
                            left_value.stack_offset() & constant.value() as i64,
                        );
                    }
                    (Some(constant), _) if right_value.is_stack_offset() => {
                        value.make_stack_offset(
                            right_value.stack_offset() & constant.value() as i64,
                        );
                    }
                    _ => {
                        if (left_value.abstract_value().is_nondeterministic()
                            && left_value.is_not_stack_offset())
                            || (right_value.abstract_value().is_nondeterministic()
                                && right_value.is_not_stack_offset())
                        {
                            value.make_not_stack_offset();
                        }
                    }
                }
            }
            _ => {
                value.make_not_stack_offset();
            }
        }

        // Compute the product flag.
        match kind {
            BinaryOperatorKind::Mul | BinaryOperatorKind::Shl => {
                value.make_product();
            }
            _ => {
                value.make_not_product();
            }
        }

        Ok(())
    }

    fn apply_unary(kind: UnaryOperatorKind, bits: usize, a: &AbstractValue) -> AbstractValue {
        match kind {
            UnaryOperatorKind::Not => a.not(),
            UnaryOperatorKind::Negate => a.neg(),
            UnaryOperatorKind::SignExtend => a.clone().sign_extend(bits),
            UnaryOperatorKind::ZeroExtend => a.clone().zero_extend(bits),
            UnaryOperatorKind::Truncate => a.clone().resize(bits),
        }
    }

    fn apply_binary(
        kind: BinaryOperatorKind,
        a: &AbstractValue,
        b: &AbstractValue,
    ) -> AbstractValue {
        match kind {
            BinaryOperatorKind::And => a.and(b),
            BinaryOperatorKind::Or => a.or(b),
            BinaryOperatorKind::Xor => a.xor(b),
            BinaryOperatorKind::Shl => a.shl(b),
            BinaryOperatorKind::Shr => a.shr(b),
            BinaryOperatorKind::Sar => a.sar(b),
            BinaryOperatorKind::Add => a.add(b),
            BinaryOperatorKind::Sub => a.sub(b),
            BinaryOperatorKind::Mul => a.mul(b),
            BinaryOperatorKind::Divs => a.divs(b),
            BinaryOperatorKind::Divu => a.divu(b),
            BinaryOperatorKind::Mods => a.mods(b),
            BinaryOperatorKind::Modu => a.modu(b),
            BinaryOperatorKind::Cmpeq => a.cmpeq(b),
            BinaryOperatorKind::Cmplts => a.cmplts(b),
            BinaryOperatorKind::Cmples => a.cmples(b),
            BinaryOperatorKind::Cmpltu => a.cmpltu(b),
            BinaryOperatorKind::Cmpleu => a.cmpleu(b),
        }
    }
}
