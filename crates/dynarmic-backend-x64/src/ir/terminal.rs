//! `Terminal`: how a block's body ends and where control resumes (§3).
//!
//! Expressed as an exhaustive Rust enum rather than the reference
//! implementation's visitor (§9): the compiler enforces that every match
//! over `Terminal` handles every variant, replacing the source's runtime
//! `ASSERT(false, "Invalid terminal")` fallback.

use crate::ir::block::Cond;
use crate::location::LocationDescriptor;

#[derive(Debug, Clone)]
pub enum Terminal {
    /// Never emitted; reaching this in the emitter is a programmer error.
    Invalid,
    Interpret {
        next: LocationDescriptor,
        num_instructions: u32,
    },
    ReturnToDispatch,
    LinkBlock {
        next: LocationDescriptor,
    },
    LinkBlockFast {
        next: LocationDescriptor,
    },
    PopRsbHint,
    FastDispatchHint,
    If {
        cond: Cond,
        then_: Box<Terminal>,
        else_: Box<Terminal>,
    },
    CheckBit {
        then_: Box<Terminal>,
        else_: Box<Terminal>,
    },
    CheckHalt {
        else_: Box<Terminal>,
    },
}

impl Terminal {
    pub fn if_(cond: Cond, then_: Terminal, else_: Terminal) -> Terminal {
        Terminal::If {
            cond,
            then_: Box::new(then_),
            else_: Box::new(else_),
        }
    }

    pub fn check_bit(then_: Terminal, else_: Terminal) -> Terminal {
        Terminal::CheckBit {
            then_: Box::new(then_),
            else_: Box::new(else_),
        }
    }

    pub fn check_halt(else_: Terminal) -> Terminal {
        Terminal::CheckHalt {
            else_: Box::new(else_),
        }
    }

    /// Every link/hint target this terminal may jump to, innermost-first.
    /// Used by the emitter's recursive codegen and by the block cache's
    /// "what does this block reference" bookkeeping.
    pub fn link_targets(&self) -> Vec<LocationDescriptor> {
        match self {
            Terminal::Invalid
            | Terminal::ReturnToDispatch
            | Terminal::PopRsbHint
            | Terminal::FastDispatchHint => Vec::new(),
            Terminal::Interpret { next, .. } => vec![*next],
            Terminal::LinkBlock { next } | Terminal::LinkBlockFast { next } => vec![*next],
            Terminal::If { then_, else_, .. } => {
                let mut v = then_.link_targets();
                v.extend(else_.link_targets());
                v
            }
            Terminal::CheckBit { then_, else_ } => {
                let mut v = then_.link_targets();
                v.extend(else_.link_targets());
                v
            }
            Terminal::CheckHalt { else_ } => else_.link_targets(),
        }
    }
}
