//! Instruction set of the Quill VM

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation codes understood by the dispatch loop.
///
/// Operand conventions are given per variant: `unary` is the integer operand
/// of [`Code`](crate::Code), `op1`/`op2` are its constant operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // Stack manipulation
    /// Push `op1`. Function constants capture the current scope as they are pushed.
    Push,
    /// Push the value bound to symbol `unary`
    PushRef,
    /// Push an assignable reference to symbol `unary`
    PushLeftRef,
    /// Push a global or native named by `op1`
    PushId,
    /// Pop and remember the top of the stack as the last value
    Pop,

    // Assignment
    /// Pop `unary` references then `op1` values and store them pairwise
    Assign,

    // Unary operators
    /// Logical not
    Not,
    /// Arithmetic negation
    Neg,
    /// Unary plus
    Plus,
    /// Bitwise complement
    BitNot,

    // Binary operators
    /// Addition and concatenation
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
    /// Remainder
    Mod,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Bit clear
    AndNot,
    /// Left shift
    Shl,
    /// Right shift
    Shr,
    /// Less than
    Lt,
    /// Less than or equal
    LtEq,
    /// Greater than
    Gt,
    /// Greater than or equal
    GtEq,
    /// Equality
    Eq,
    /// Inequality
    NotEq,
    /// Membership test
    In,
    /// Send the top value to the channel below it
    SendChan,

    // Compound assignment: pop reference then operand
    /// `+=`
    PlusEq,
    /// `-=`
    MinusEq,
    /// `*=`
    MulEq,
    /// `/=`
    DivEq,
    /// `%=`
    ModEq,
    /// `&=`
    AndEq,
    /// `|=`
    OrEq,
    /// `^=`
    XorEq,
    /// `&^=`
    AndNotEq,
    /// `<<=`
    ShlEq,
    /// `>>=`
    ShrEq,
    /// `++` on the popped reference
    PlusPlus,
    /// `--` on the popped reference
    MinusMinus,

    // Control flow
    /// Jump to `unary`
    Jmp,
    /// Pop; jump to `unary` when truthy
    JmpT,
    /// Pop; jump to `unary` when falsy
    JmpF,
    /// Jump to `unary` keeping the top when truthy, otherwise pop it
    JmpTop,
    /// Jump to `unary` keeping the top when falsy, otherwise pop it
    JmpFop,
    /// Jump to `unary`, leave `op1` scopes, and when `op2` is 1 drop the
    /// current iterator
    Break,
    /// Jump to `unary` and leave `op1` scopes
    Continue,

    // Scopes
    /// Enter a child scope for symbol table `unary`
    Scope,
    /// Leave the current scope
    ScopeEnd,

    // Iteration
    /// Pop a subject and push an iterator over it on the iterator stack
    EnterFR,
    /// Advance the iterator yielding `unary` values; jump to `op1` when exhausted
    RangeNext,
    /// Like `RangeNext` but drops slice indices and unpacks slice elements
    InNext,
    /// Pop the current iterator
    ExitFR,

    // Containers and types
    /// Pop `unary` values into a new slice
    NewSlice,
    /// Pop `unary` key/value pairs into a new map
    NewMap,
    /// Pop `unary` size arguments and a type; push a new container or channel
    Make,
    /// Pop a value and a type; push the converted value
    TypeCast,
    /// Pop an index and a container; push the element with its location
    Index,
    /// Pop step, high, low and a sequence; push the sub-sequence
    SliceRange,
    /// Pop an object; push member `op1` with its location
    Member,

    // Calls
    /// Pop `unary` arguments and a callee; call it. `op1` true spreads the last argument
    Call,
    /// Same as `Call` but runs the callee as an independent unit
    AsyncCall,
    /// Pop `unary` values and return them
    Return,

    // Defer, panic and recovery
    /// Register code block `op1` to run when the frame exits
    Defer,
    /// Register code block `op1` as the finally block of the enclosing try
    Finally,
    /// Run and discard the most recent pending finally block
    RunFinally,
    /// Pop a payload and raise a panic
    Panic,
    /// Clear the pending panic and push its payload
    Recover,
    /// Install a try handler: catch entry `op1`, error variable `op2`
    CatchError,
    /// Remove the innermost try handler
    StopCatchError,
    /// Re-raise the panic last caught by a handler in this frame
    Rethrow,

    // Misc
    /// Pop a channel; receive one value (`unary` 1) or value and flag (`unary` 2)
    Recv,
    /// Pop `unary` values (condition, optional message); panic on a false condition
    Assert,
}

impl Opcode {
    /// True for opcodes that set the program counter themselves
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::JmpT
                | Opcode::JmpF
                | Opcode::JmpTop
                | Opcode::JmpFop
                | Opcode::Break
                | Opcode::Continue
        )
    }

    /// The binary operator a compound assignment applies
    pub fn compound_base(self) -> Option<Opcode> {
        Some(match self {
            Opcode::PlusEq => Opcode::Add,
            Opcode::MinusEq => Opcode::Sub,
            Opcode::MulEq => Opcode::Mul,
            Opcode::DivEq => Opcode::Div,
            Opcode::ModEq => Opcode::Mod,
            Opcode::AndEq => Opcode::And,
            Opcode::OrEq => Opcode::Or,
            Opcode::XorEq => Opcode::Xor,
            Opcode::AndNotEq => Opcode::AndNot,
            Opcode::ShlEq => Opcode::Shl,
            Opcode::ShrEq => Opcode::Shr,
            _ => return None,
        })
    }

    /// The compound assignment form of a binary operator
    pub fn compound_of(self) -> Option<Opcode> {
        Some(match self {
            Opcode::Add => Opcode::PlusEq,
            Opcode::Sub => Opcode::MinusEq,
            Opcode::Mul => Opcode::MulEq,
            Opcode::Div => Opcode::DivEq,
            Opcode::Mod => Opcode::ModEq,
            Opcode::And => Opcode::AndEq,
            Opcode::Or => Opcode::OrEq,
            Opcode::Xor => Opcode::XorEq,
            Opcode::AndNot => Opcode::AndNotEq,
            Opcode::Shl => Opcode::ShlEq,
            Opcode::Shr => Opcode::ShrEq,
            _ => return None,
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug names double as mnemonics
        let name = format!("{:?}", self);
        f.pad(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_round_trip() {
        for op in [Opcode::Add, Opcode::Shl, Opcode::AndNot] {
            let eq = op.compound_of().unwrap();
            assert_eq!(eq.compound_base(), Some(op));
        }
        assert_eq!(Opcode::Lt.compound_of(), None);
    }

    #[test]
    fn mnemonic_padding() {
        assert_eq!(format!("{:<6}|", Opcode::Push), "Push  |");
    }
}
