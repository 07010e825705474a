/// Depth of every stack. Pushing past it overwrites the oldest value.
pub const STACK_DEPTH: usize = 10;
/// Stacks private to each thread (AX, BX, CX).
pub const NUM_LOCAL_STACKS: usize = 3;
/// Stacks shared by every thread of one hardware instance (DX).
pub const NUM_GLOBAL_STACKS: usize = 1;
pub const NUM_STACKS: usize = NUM_LOCAL_STACKS + NUM_GLOBAL_STACKS;

pub const STACK_AX: usize = 0;
pub const STACK_BX: usize = 1;
pub const STACK_CX: usize = 2;
pub const STACK_DX: usize = 3;

/// Where a stack id lives once mapped onto the bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackSlot {
    Local(usize),
    Global(usize),
}

/// Map a stack id onto the bank. Out-of-range ids fall back to AX; ids past
/// the local stacks wrap into the shared bank.
pub fn stack_slot(id: usize) -> StackSlot {
    let id = if id >= NUM_STACKS { 0 } else { id };
    if id < NUM_LOCAL_STACKS {
        StackSlot::Local(id)
    } else {
        StackSlot::Global((id % NUM_LOCAL_STACKS) % NUM_GLOBAL_STACKS)
    }
}

/// Fixed-depth ring buffer of integers.
#[derive(Clone, Debug)]
pub struct CpuStack {
    data: [i32; STACK_DEPTH],
    pointer: usize,
}

impl Default for CpuStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Stacks compare by visible contents, not by where the ring happens to start.
impl PartialEq for CpuStack {
    fn eq(&self, other: &Self) -> bool {
        (0..STACK_DEPTH).all(|d| self.get(d) == other.get(d))
    }
}

impl Eq for CpuStack {}

impl CpuStack {
    pub const fn new() -> Self {
        Self {
            data: [0; STACK_DEPTH],
            pointer: 0,
        }
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    #[inline(always)]
    pub fn push(&mut self, value: i32) {
        self.pointer = if self.pointer == 0 {
            STACK_DEPTH - 1
        } else {
            self.pointer - 1
        };
        self.data[self.pointer] = value;
    }

    #[inline(always)]
    pub fn pop(&mut self) -> i32 {
        let value = self.data[self.pointer];
        self.data[self.pointer] = 0;
        self.pointer += 1;
        if self.pointer == STACK_DEPTH {
            self.pointer = 0;
        }
        value
    }

    /// Peek `depth` entries below the top.
    #[inline(always)]
    pub fn get(&self, depth: usize) -> i32 {
        self.data[(self.pointer + depth) % STACK_DEPTH]
    }

    #[inline(always)]
    pub fn top(&self) -> i32 {
        self.data[self.pointer]
    }

    /// Overwrite the top entry in place.
    pub fn set_top(&mut self, value: i32) {
        self.data[self.pointer] = value;
    }

    pub fn clear(&mut self) {
        self.data = [0; STACK_DEPTH];
        self.pointer = 0;
    }

    /// Values from the deepest entry to the top. Pushing them in this order
    /// onto an empty stack rebuilds it.
    pub fn bottom_up(&self) -> impl Iterator<Item = i32> + '_ {
        (0..STACK_DEPTH).rev().map(|d| self.get(d))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn push_then_pop_restores_pointer(
            prefix in prop::collection::vec(any::<i32>(), 0..25),
            value in any::<i32>(),
        ) {
            let mut stack = CpuStack::new();
            for v in prefix {
                stack.push(v);
            }
            let before = stack.pointer();
            stack.push(value);
            prop_assert_eq!(stack.pop(), value);
            prop_assert_eq!(stack.pointer(), before);
        }

        #[test]
        fn overflow_keeps_most_recent(values in prop::collection::vec(any::<i32>(), STACK_DEPTH + 1..40)) {
            let mut stack = CpuStack::new();
            for &v in &values {
                stack.push(v);
            }
            for &v in values.iter().rev().take(STACK_DEPTH) {
                prop_assert_eq!(stack.pop(), v);
            }
        }
    }
}
