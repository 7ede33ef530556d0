// 7.0 tape.rs: the output tape. an append-only, execution-scoped sequence of
// (token, amount) slots. instructions thread state between steps purely by
// positional index into this tape, UTXO-style; slots are never mutated after
// creation.
//
// flash-loan bodies run in a nested scope: they may read every earlier slot by
// absolute index, but their own appends are truncated when the scope exits, so
// nested outputs never leak into the outer execution.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Address, TokenAmount};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TapeError {
    #[error("slot {index} referenced but tape has {len} slots")]
    ForwardReference { index: usize, len: usize },
}

/// One immutable value produced by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSlot {
    pub token: Address,
    pub amount: TokenAmount,
}

/// Typed index into the tape. `SlotRef::BALANCE` is the reserved index meaning
/// "resolve to the executing context's full current balance of the instruction's
/// token at call time" rather than a tape slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRef(pub usize);

impl SlotRef {
    pub const BALANCE: SlotRef = SlotRef(usize::MAX);

    pub fn is_reserved(&self) -> bool {
        *self == Self::BALANCE
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_reserved() {
            write!(f, "#balance")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// The tape itself. One instance lives for exactly one execution.
#[derive(Debug, Clone, Default)]
pub struct Tape {
    slots: Vec<OutputSlot>,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn append(&mut self, token: Address, amount: TokenAmount) -> SlotRef {
        self.slots.push(OutputSlot { token, amount });
        SlotRef(self.slots.len() - 1)
    }

    /// Read a prior slot. An index at or past the current length is a forward
    /// reference and always fails; the reserved index must be resolved by the
    /// caller before it gets here.
    pub fn read(&self, slot: SlotRef) -> Result<OutputSlot, TapeError> {
        self.slots
            .get(slot.0)
            .copied()
            .ok_or(TapeError::ForwardReference {
                index: slot.0,
                len: self.slots.len(),
            })
    }

    pub fn last(&self) -> Option<OutputSlot> {
        self.slots.last().copied()
    }

    /// Mark the start of a nested (flash-loan) scope. Returns the scope base;
    /// the next append is the scope's slot 0 in relative terms.
    pub fn enter_scope(&mut self) -> usize {
        self.slots.len()
    }

    /// Drop every slot appended since `base`. Reads of outer slots were allowed
    /// throughout; only the nested appends are local.
    pub fn exit_scope(&mut self, base: usize) {
        self.slots.truncate(base);
    }

    /// Slots appended since `base`, in order.
    pub fn scope_slots(&self, base: usize) -> &[OutputSlot] {
        &self.slots[base.min(self.slots.len())..]
    }

    pub fn into_slots(self) -> Vec<OutputSlot> {
        self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: Address = Address(10);
    const Y: Address = Address(11);

    #[test]
    fn append_and_read() {
        let mut tape = Tape::new();
        let a = tape.append(X, 100);
        let b = tape.append(Y, 50);

        assert_eq!(a, SlotRef(0));
        assert_eq!(b, SlotRef(1));
        assert_eq!(tape.read(a).unwrap(), OutputSlot { token: X, amount: 100 });
        assert_eq!(tape.read(b).unwrap().token, Y);
    }

    #[test]
    fn forward_reference_fails() {
        let mut tape = Tape::new();
        tape.append(X, 1);

        let err = tape.read(SlotRef(1)).unwrap_err();
        assert_eq!(err, TapeError::ForwardReference { index: 1, len: 1 });
    }

    #[test]
    fn reserved_index_never_reads() {
        let mut tape = Tape::new();
        tape.append(X, 1);
        assert!(tape.read(SlotRef::BALANCE).is_err());
    }

    #[test]
    fn scope_appends_are_local() {
        let mut tape = Tape::new();
        tape.append(X, 100);

        let base = tape.enter_scope();
        tape.append(X, 500); // borrowed funds, scope-relative slot 0
        tape.append(Y, 42);

        // cross-reference into the outer tape still works
        assert_eq!(tape.read(SlotRef(0)).unwrap().amount, 100);
        assert_eq!(tape.scope_slots(base).len(), 2);

        tape.exit_scope(base);
        assert_eq!(tape.len(), 1);
        assert!(tape.read(SlotRef(1)).is_err());
    }
}
