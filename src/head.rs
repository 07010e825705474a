use crate::inst::Instruction;
use crate::memory::{HardwareId, MemorySpace, SiteFlags, SpaceResolver};

/// A cursor into one memory space of one hardware instance.
///
/// A head names its memory by key: the hardware it currently points into and
/// the hardware it belongs to. Every operation that touches memory takes a
/// [`SpaceResolver`] for the length of the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Head {
    space: usize,
    position: i32,
    current: HardwareId,
    home: HardwareId,
}

impl Head {
    pub fn new(home: HardwareId, space: usize) -> Self {
        Self {
            space,
            position: 0,
            current: home,
            home,
        }
    }

    pub fn reset(&mut self, home: HardwareId, space: usize) {
        *self = Self::new(home, space);
    }

    pub fn space(&self) -> usize {
        self.space
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    /// Position as an index. Only meaningful after [`Head::adjust`].
    pub fn pos(&self) -> usize {
        self.position.max(0) as usize
    }

    pub fn current(&self) -> HardwareId {
        self.current
    }

    pub fn home(&self) -> HardwareId {
        self.home
    }

    /// Rebind the head to another hardware instance (a parasite thread
    /// pointing into its host, for instance).
    pub fn bind(&mut self, hw: HardwareId) {
        self.current = hw;
    }

    pub fn memory<'a, R: SpaceResolver + ?Sized>(&self, r: &'a R) -> &'a MemorySpace {
        r.space_or_empty(self.current, self.space)
    }

    fn size<R: SpaceResolver + ?Sized>(&self, r: &R) -> i64 {
        self.memory(r).len() as i64
    }

    /// Bring the position back inside the bound space.
    ///
    /// An empty space pins the head to 0 at home. Falling off the end rebinds
    /// the head to its home hardware and wraps it into the home space.
    pub fn adjust<R: SpaceResolver + ?Sized>(&mut self, r: &R) {
        let position = self.position as i64;
        self.adjust_from(position, r);
    }

    fn adjust_from<R: SpaceResolver + ?Sized>(&mut self, mut position: i64, r: &R) {
        let size = self.size(r);
        if position >= 0 && position < size {
            self.position = position as i32;
            return;
        }
        if size == 0 {
            self.current = self.home;
            self.position = 0;
            return;
        }
        if position < 0 {
            self.position = 0;
            return;
        }

        self.current = self.home;
        position -= size;
        let new_size = self.size(r);
        if new_size == 0 {
            position = 0;
        } else if position >= new_size {
            position %= new_size;
        }
        self.position = position as i32;
    }

    #[inline(always)]
    pub fn advance<R: SpaceResolver + ?Sized>(&mut self, r: &R) {
        self.adjust_from(self.position as i64 + 1, r);
    }

    /// Relative move with clamping at the start and wrapping at the end.
    pub fn jump<R: SpaceResolver + ?Sized>(&mut self, delta: i32, r: &R) {
        self.adjust_from(self.position as i64 + delta as i64, r);
    }

    /// Relative move that always wraps around the space. A wrap landing on 0
    /// is reported as `size`, so the next adjustment rebinds home.
    pub fn loop_jump<R: SpaceResolver + ?Sized>(&mut self, delta: i32, r: &R) {
        let size = self.size(r);
        let mut position = self.position as i64 + delta as i64;
        if size == 0 {
            self.position = 0;
            return;
        }
        if position < 0 || position >= size {
            position %= size;
            if position <= 0 {
                position += size;
            }
        }
        self.position = position as i32;
    }

    /// Raw position write without adjustment.
    pub fn abs_set(&mut self, position: i32) {
        self.position = position;
    }

    pub fn set<R: SpaceResolver + ?Sized>(&mut self, position: i32, r: &R) {
        self.adjust_from(position as i64, r);
    }

    pub fn set_in_space<R: SpaceResolver + ?Sized>(&mut self, position: i32, space: usize, r: &R) {
        self.space = space;
        self.adjust_from(position as i64, r);
    }

    /// Space and position packed into one stack value: position in the low
    /// 24 bits, space above.
    pub fn full_location(&self) -> i32 {
        (self.position & 0x00ff_ffff) | ((self.space as i32) << 24)
    }

    pub fn set_full_location<R: SpaceResolver + ?Sized>(&mut self, location: i32, r: &R) {
        self.space = ((location as u32) >> 24) as usize;
        self.adjust_from((location & 0x00ff_ffff) as i64, r);
    }

    /// Copy another head's location (hardware, space and position), then
    /// bring it back inside its memory.
    pub fn set_to<R: SpaceResolver + ?Sized>(&mut self, other: &Head, r: &R) {
        self.space = other.space;
        self.current = other.current;
        self.adjust_from(other.position as i64, r);
    }

    pub fn at_end<R: SpaceResolver + ?Sized>(&self, r: &R) -> bool {
        self.position as i64 + 1 == self.size(r)
    }

    pub fn inst<R: SpaceResolver + ?Sized>(&self, r: &R) -> Instruction {
        self.memory(r)
            .sites()
            .get(self.pos())
            .map_or_else(Instruction::default, |s| s.inst)
    }

    /// Instruction after the head, or `None` at the last site.
    pub fn next_inst<R: SpaceResolver + ?Sized>(&self, r: &R) -> Option<Instruction> {
        if self.at_end(r) {
            return None;
        }
        self.memory(r).sites().get(self.pos() + 1).map(|s| s.inst)
    }

    pub fn flag<R: SpaceResolver + ?Sized>(&self, r: &R, flag: SiteFlags) -> bool {
        self.memory(r)
            .sites()
            .get(self.pos())
            .is_some_and(|s| s.flags.contains(flag))
    }

    pub fn set_flag<R: SpaceResolver + ?Sized>(&self, r: &mut R, flag: SiteFlags) {
        let pos = self.pos();
        if let Some(space) = r.space_mut(self.current, self.space) {
            if pos < space.len() {
                space.set_flag(pos, flag);
            }
        }
    }

    /// Gate for writes into memory this head does not own. Returns `false`
    /// when the write must be dropped.
    fn may_write<R: SpaceResolver + ?Sized>(&self, r: &mut R) -> bool {
        if self.current == self.home {
            return true;
        }
        if r.write_protected() {
            return false;
        }
        r.mark_modified(self.current);
        true
    }

    pub fn set_inst<R: SpaceResolver + ?Sized>(&self, r: &mut R, inst: Instruction) -> bool {
        let pos = self.pos();
        if !self.may_write(r) {
            return false;
        }
        match r.space_mut(self.current, self.space) {
            Some(space) if pos < space.len() => {
                space.set(pos, inst);
                true
            }
            _ => false,
        }
    }

    /// Insert at the head's position. Callers re-adjust every head on the
    /// same space afterwards.
    pub fn insert_inst<R: SpaceResolver + ?Sized>(&self, r: &mut R, inst: Instruction) -> bool {
        let pos = self.pos();
        if !self.may_write(r) {
            return false;
        }
        match r.space_mut(self.current, self.space) {
            Some(space) if pos <= space.len() => {
                space.insert(pos, inst);
                true
            }
            _ => false,
        }
    }

    pub fn remove_inst<R: SpaceResolver + ?Sized>(&self, r: &mut R) -> bool {
        let pos = self.pos();
        if !self.may_write(r) {
            return false;
        }
        match r.space_mut(self.current, self.space) {
            Some(space) if pos < space.len() => {
                space.remove(pos);
                true
            }
            _ => false,
        }
    }
}
