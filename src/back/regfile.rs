//! The register file model.
//!
//! Eight slots mirroring the RV32 argument registers a0..a7.  Each slot
//! tracks its occupant variable and a dirty bit; a dirty slot holds a value
//! newer than the occupant's home frame slot.  At most one slot holds a
//! given variable, and an empty slot is always clean.
//!
//! Slot states: Empty -> Clean (after a reload) -> Dirty (after a write)
//! -> Empty (after a spill or end-of-life expiration).  The spill and
//! reload operations themselves live on the lowering context, which owns
//! the Phase-2 stream the stores and loads are appended to.

use crate::middle::store::{Store, VarId};

pub const REG_COUNT: usize = 8;

/// Phase-2 slot index reserved for indirect-call targets; the emitter maps
/// slot `n` to machine register `x(10 + n)`, so this one lands on t6.
pub const TEMP_SLOT: i32 = 21;

#[derive(Clone, Copy, Default)]
pub struct Slot {
    pub var: Option<VarId>,
    pub dirty: bool,
}

pub struct RegFile {
    pub slots: [Slot; REG_COUNT],
}

impl RegFile {
    pub fn new() -> Self {
        RegFile {
            slots: [Slot::default(); REG_COUNT],
        }
    }

    /// Slot currently holding `var`, if any.
    pub fn find(&self, var: VarId) -> Option<usize> {
        self.slots.iter().position(|s| s.var == Some(var))
    }

    /// First empty slot, if any.
    pub fn try_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.var.is_none())
    }

    /// Empty every slot whose occupant died strictly before instruction
    /// `i`.  Expiration never emits a store.
    pub fn expire(&mut self, store: &Store, i: usize) {
        for slot in &mut self.slots {
            if let Some(var) = slot.var {
                if store.var(var).eol < i {
                    slot.var = None;
                    slot.dirty = false;
                }
            }
        }
    }

    pub fn occupy(&mut self, idx: usize, var: VarId, dirty: bool) {
        self.slots[idx] = Slot {
            var: Some(var),
            dirty,
        };
    }

    pub fn evict(&mut self, idx: usize) {
        self.slots[idx] = Slot::default();
    }

    /// Drop everything without storing; used for the caller-save clear
    /// after calls.
    pub fn clear(&mut self) {
        self.slots = [Slot::default(); REG_COUNT];
    }
}

impl Default for RegFile {
    fn default() -> Self {
        RegFile::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::middle::store::Variable;

    #[test]
    fn expire_frees_dead_occupants_only() {
        let mut store = Store::new();
        let a = store.add_var(Variable::new(id("a"), id("int"))).unwrap();
        let b = store.add_var(Variable::new(id("b"), id("int"))).unwrap();
        store.set_liveout(a, 3);
        store.set_liveout(b, 9);

        let mut regs = RegFile::new();
        regs.occupy(0, a, true);
        regs.occupy(1, b, true);
        regs.expire(&store, 5);

        assert_eq!(regs.slots[0].var, None);
        assert!(!regs.slots[0].dirty);
        assert_eq!(regs.slots[1].var, Some(b));
        assert_eq!(regs.find(b), Some(1));
        assert_eq!(regs.try_free(), Some(0));
    }

    #[test]
    fn clear_leaves_no_dirty_slots() {
        let mut store = Store::new();
        let a = store.add_var(Variable::new(id("a"), id("int"))).unwrap();
        let mut regs = RegFile::new();
        regs.occupy(4, a, true);
        regs.clear();
        assert!(regs.slots.iter().all(|s| s.var.is_none() && !s.dirty));
    }
}
