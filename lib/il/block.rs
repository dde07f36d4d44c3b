//! A `Block` is a linear sequence of `Instruction`.
//!
//! A `Block` must belong to a `ControlFlowGraph`. When building a series
//! of statements, we normally do so by calling the relevant method
//! directly on the block where we wish to add them.
//!
//! To create a `Block`, call `ControlFlowGraph::new_block`.

use crate::graph;
use crate::il::{Access, Callback, Instruction, Statement, Term};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A basic block in Kestrel IL.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, Default)]
pub struct Block {
    /// The index of the block.
    index: usize,
    /// An internal counter for the next block-unique instruction.
    next_instruction_index: usize,
    /// The instructions for this block.
    instructions: Vec<Instruction>,
}

impl Block {
    pub(crate) fn new(index: usize) -> Block {
        Block {
            index,
            next_instruction_index: 0,
            instructions: Vec::new(),
        }
    }

    fn new_instruction_index(&mut self) -> usize {
        let instruction_index = self.next_instruction_index;
        self.next_instruction_index = instruction_index + 1;
        instruction_index
    }

    fn push(&mut self, instruction: Instruction) -> &mut Instruction {
        self.instructions.push(instruction);
        self.instructions.last_mut().unwrap()
    }

    /// Appends the contents of another `Block` to this `Block`.
    ///
    /// Instruction indices are updated accordingly.
    pub fn append(&mut self, other: &Block) {
        other.instructions().iter().for_each(|instruction| {
            let index = self.new_instruction_index();
            self.instructions.push(instruction.clone_new_index(index));
        })
    }

    /// Returns the index of this `Block`
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns instructions for this `Block`
    pub fn instructions(&self) -> &Vec<Instruction> {
        &self.instructions
    }

    /// Returns a mutable reference to the instructions for this `Block`.
    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.instructions
    }

    /// Returns true if this `Block` is empty, meaning it has no `Instruction`
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Returns an `Instruction` by index, or `None` if the instruction
    /// does not exist.
    pub fn instruction(&self, index: usize) -> Option<&Instruction> {
        self.instructions
            .iter()
            .find(|instruction| instruction.index() == index)
    }

    /// Returns a mutable reference to an `Instruction` by index, or `None`
    /// if the `Instruction` does not exist.
    pub fn instruction_mut(&mut self, index: usize) -> Option<&mut Instruction> {
        self.instructions
            .iter_mut()
            .find(|instruction| instruction.index() == index)
    }

    /// Deletes an `Instruction` by its index.
    pub fn remove_instruction(&mut self, index: usize) -> Result<(), Error> {
        self.instructions
            .iter()
            .position(|instruction| instruction.index() == index)
            .map(|index| {
                self.instructions.remove(index);
            })
            .ok_or_else(|| format!("No instruction with index {} found", index).into())
    }

    /// Adds an assignment to the end of this block.
    pub fn assign(&mut self, left: Term, right: Term) -> &mut Instruction {
        let index = self.new_instruction_index();
        self.push(Instruction::new(index, Statement::assign(left, right)))
    }

    /// Adds a jump to the end of this block.
    pub fn jump(
        &mut self,
        condition: Option<Term>,
        then_target: Option<Term>,
        else_target: Option<Term>,
    ) -> &mut Instruction {
        let index = self.new_instruction_index();
        self.push(Instruction::new(
            index,
            Statement::jump(condition, then_target, else_target),
        ))
    }

    /// Adds a call to the end of this block.
    pub fn call(&mut self, target: Term) -> &mut Instruction {
        let index = self.new_instruction_index();
        self.push(Instruction::new(index, Statement::call(target)))
    }

    /// Adds a return to the end of this block.
    pub fn ret(&mut self) -> &mut Instruction {
        let index = self.new_instruction_index();
        self.push(Instruction::new(index, Statement::Return))
    }

    /// Adds a touch with the given access flags to the end of this block.
    pub fn touch(&mut self, term: Term, access: Access) -> &mut Instruction {
        let index = self.new_instruction_index();
        self.push(Instruction::new(index, Statement::touch(term, access)))
    }

    /// Adds an inline-assembly placeholder to the end of this block.
    pub fn inline_assembly(&mut self) -> &mut Instruction {
        let index = self.new_instruction_index();
        self.push(Instruction::new(index, Statement::InlineAssembly))
    }

    /// Adds a callback to the end of this block.
    pub fn callback(&mut self, callback: Callback) -> &mut Instruction {
        let index = self.new_instruction_index();
        self.push(Instruction::new(index, Statement::callback(callback)))
    }
}

impl graph::Vertex for Block {
    fn index(&self) -> usize {
        self.index
    }
    fn dot_label(&self) -> String {
        format!("{}", self)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "[ Block: 0x{:X} ]", self.index)?;
        for instruction in self.instructions() {
            writeln!(f, "{}", instruction)?;
        }
        Ok(())
    }
}
