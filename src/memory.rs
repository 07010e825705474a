use crate::inst::Instruction;

/// Identifies one hardware instance inside a simulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareId(pub u32);

/// Per-site flag set stored alongside each instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SiteFlags(u8);

impl SiteFlags {
    pub const COPIED: SiteFlags = SiteFlags(0x01);
    pub const MUTATED: SiteFlags = SiteFlags(0x02);
    pub const EXECUTED: SiteFlags = SiteFlags(0x04);
    pub const BREAKPOINT: SiteFlags = SiteFlags(0x08);
    pub const POINT_MUT: SiteFlags = SiteFlags(0x10);
    pub const COPY_MUT: SiteFlags = SiteFlags(0x20);
    pub const INJECTED: SiteFlags = SiteFlags(0x40);

    pub const fn empty() -> Self {
        SiteFlags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: SiteFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SiteFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: SiteFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for SiteFlags {
    type Output = SiteFlags;

    fn bitor(self, rhs: SiteFlags) -> SiteFlags {
        SiteFlags(self.0 | rhs.0)
    }
}

/// One genome site.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Site {
    pub inst: Instruction,
    pub flags: SiteFlags,
}

impl Site {
    pub const fn new(inst: Instruction) -> Self {
        Self {
            inst,
            flags: SiteFlags::empty(),
        }
    }
}

/// A circular instruction buffer. Instructions and flags live in one vector
/// of sites, so their lengths cannot diverge.
///
/// Truncated tails are remembered so that a later growth can reuse them.
#[derive(Clone, Debug, Default)]
pub struct MemorySpace {
    sites: Vec<Site>,
    vacated: Vec<Instruction>,
}

impl PartialEq for MemorySpace {
    fn eq(&self, other: &Self) -> bool {
        self.sites == other.sites
    }
}

impl Eq for MemorySpace {}

impl MemorySpace {
    pub const fn empty() -> Self {
        Self {
            sites: Vec::new(),
            vacated: Vec::new(),
        }
    }

    pub fn from_genome(genome: &[Instruction]) -> Self {
        Self {
            sites: genome.iter().copied().map(Site::new).collect(),
            vacated: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Instruction at `pos`. The caller has already adjusted `pos`.
    #[inline(always)]
    pub fn get(&self, pos: usize) -> Instruction {
        self.sites[pos].inst
    }

    #[inline(always)]
    pub fn set(&mut self, pos: usize, inst: Instruction) {
        self.sites[pos].inst = inst;
    }

    #[inline(always)]
    pub fn flags(&self, pos: usize) -> SiteFlags {
        self.sites[pos].flags
    }

    #[inline(always)]
    pub fn set_flag(&mut self, pos: usize, flag: SiteFlags) {
        self.sites[pos].flags.insert(flag);
    }


    pub fn clear_flags(&mut self) {
        for site in &mut self.sites {
            site.flags = SiteFlags::empty();
        }
    }

    /// Grow by one site at `pos`, shifting the tail. The new site has no flags.
    pub fn insert(&mut self, pos: usize, inst: Instruction) {
        self.sites.insert(pos, Site::new(inst));
    }

    /// Shrink by one site at `pos`, shifting the tail.
    pub fn remove(&mut self, pos: usize) -> Instruction {
        self.sites.remove(pos).inst
    }

    /// Number of sites carrying `flag`.
    pub fn count_flag(&self, flag: SiteFlags) -> usize {
        self.sites.iter().filter(|s| s.flags.contains(flag)).count()
    }

    pub fn genome(&self) -> Vec<Instruction> {
        self.sites.iter().map(|s| s.inst).collect()
    }

    /// Shrink to `len` sites, remembering the dropped tail for later reuse.
    /// Only the most recent tail is kept.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.sites.len() {
            return;
        }
        self.vacated = self.sites.drain(len..).map(|s| s.inst).collect();
    }

    /// Resize to `len`, filling new sites with `fill`.
    pub fn resize(&mut self, len: usize, fill: Instruction) {
        self.truncate(len);
        self.sites.resize(len, Site::new(fill));
    }

    /// Resize to `len`, filling new sites from previously vacated contents
    /// first and from `fill` once those run out.
    pub fn resize_reusing(&mut self, len: usize, fill: Instruction) {
        self.truncate(len);
        let needed = len.saturating_sub(self.sites.len());
        let reused = needed.min(self.vacated.len());
        self.sites
            .extend(self.vacated.drain(..reused).map(Site::new));
        self.sites.resize(len, Site::new(fill));
    }

    /// Replace the whole contents, forgetting vacated history.
    pub fn reset_to(&mut self, genome: &[Instruction]) {
        self.sites = genome.iter().copied().map(Site::new).collect();
        self.vacated.clear();
    }
}

static EMPTY_SPACE: MemorySpace = MemorySpace::empty();

/// Resolves (hardware, space) keys to memory. Heads never own memory; every
/// head operation is given a resolver for the duration of one call.
pub trait SpaceResolver {
    /// All spaces of `hw`, or `None` if that hardware is not reachable.
    fn spaces(&self, hw: HardwareId) -> Option<&[MemorySpace]>;

    fn spaces_mut(&mut self, hw: HardwareId) -> Option<&mut Vec<MemorySpace>>;

    /// Record that `hw` was written by a head homed elsewhere.
    fn mark_modified(&mut self, hw: HardwareId);

    /// When set, writes by a head into foreign hardware are dropped.
    fn write_protected(&self) -> bool;

    /// Space `index` of `hw`, taken modulo the live space count.
    fn space(&self, hw: HardwareId, index: usize) -> Option<&MemorySpace> {
        let spaces = self.spaces(hw)?;
        if spaces.is_empty() {
            return None;
        }
        spaces.get(index % spaces.len())
    }

    fn space_mut(&mut self, hw: HardwareId, index: usize) -> Option<&mut MemorySpace> {
        let spaces = self.spaces_mut(hw)?;
        if spaces.is_empty() {
            return None;
        }
        let n = spaces.len();
        spaces.get_mut(index % n)
    }

    /// Like [`SpaceResolver::space`] but yields an empty space when unresolved.
    fn space_or_empty(&self, hw: HardwareId, index: usize) -> &MemorySpace {
        self.space(hw, index).unwrap_or(&EMPTY_SPACE)
    }
}

/// The memory spaces owned by one hardware instance.
#[derive(Clone, Debug)]
pub struct SpaceBank {
    owner: HardwareId,
    spaces: Vec<MemorySpace>,
    write_protect: bool,
    modified: bool,
}

impl SpaceBank {
    pub fn new(owner: HardwareId, write_protect: bool) -> Self {
        Self {
            owner,
            spaces: vec![MemorySpace::empty()],
            write_protect,
            modified: false,
        }
    }

    pub fn owner(&self) -> HardwareId {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    pub fn get(&self, index: usize) -> &MemorySpace {
        &self.spaces[index % self.spaces.len()]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut MemorySpace {
        let n = self.spaces.len();
        &mut self.spaces[index % n]
    }

    pub fn push(&mut self, space: MemorySpace) -> usize {
        self.spaces.push(space);
        self.spaces.len() - 1
    }

    /// Drop every space except a fresh space 0 holding `genome`.
    pub fn reset(&mut self, genome: &[Instruction]) {
        self.spaces.truncate(1);
        self.spaces[0].reset_to(genome);
        self.modified = false;
    }

    /// Drop every space but space 0 and clear its flags.
    pub fn retain_main(&mut self) {
        self.spaces.truncate(1);
        self.spaces[0].clear_flags();
        self.modified = false;
    }

    /// True once a foreign head has written into this bank.
    pub fn modified(&self) -> bool {
        self.modified
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemorySpace> {
        self.spaces.iter()
    }
}

impl SpaceResolver for SpaceBank {
    fn spaces(&self, hw: HardwareId) -> Option<&[MemorySpace]> {
        (hw == self.owner).then_some(self.spaces.as_slice())
    }

    fn spaces_mut(&mut self, hw: HardwareId) -> Option<&mut Vec<MemorySpace>> {
        (hw == self.owner).then_some(&mut self.spaces)
    }

    fn mark_modified(&mut self, hw: HardwareId) {
        if hw == self.owner {
            self.modified = true;
        }
    }

    fn write_protected(&self) -> bool {
        self.write_protect
    }
}

/// Several hardware instances' spaces, addressable by id. Lets a head homed on
/// one instance reach into another.
#[cfg(test)]
#[derive(Clone, Debug, Default)]
pub(crate) struct SpaceRegistry {
    banks: std::collections::BTreeMap<HardwareId, SpaceBank>,
    write_protect: bool,
}

#[cfg(test)]
impl SpaceRegistry {
    pub(crate) fn new(write_protect: bool) -> Self {
        Self {
            banks: std::collections::BTreeMap::new(),
            write_protect,
        }
    }

    pub(crate) fn insert(&mut self, bank: SpaceBank) {
        self.banks.insert(bank.owner(), bank);
    }

    pub(crate) fn bank(&self, hw: HardwareId) -> Option<&SpaceBank> {
        self.banks.get(&hw)
    }
}

#[cfg(test)]
impl SpaceResolver for SpaceRegistry {
    fn spaces(&self, hw: HardwareId) -> Option<&[MemorySpace]> {
        self.banks.get(&hw).map(|b| b.spaces.as_slice())
    }

    fn spaces_mut(&mut self, hw: HardwareId) -> Option<&mut Vec<MemorySpace>> {
        self.banks.get_mut(&hw).map(|b| &mut b.spaces)
    }

    fn mark_modified(&mut self, hw: HardwareId) {
        if let Some(bank) = self.banks.get_mut(&hw) {
            bank.modified = true;
        }
    }

    fn write_protected(&self) -> bool {
        self.write_protect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insts(ops: &[u8]) -> Vec<Instruction> {
        ops.iter().map(|&o| Instruction::new(o)).collect()
    }

    #[test]
    fn test_insert_resets_flags() {
        let mut space = MemorySpace::from_genome(&insts(&[1, 2, 3]));
        space.set_flag(1, SiteFlags::EXECUTED);
        space.insert(1, Instruction::new(9));
        assert_eq!(space.genome(), insts(&[1, 9, 2, 3]));
        assert_eq!(space.flags(1), SiteFlags::empty());
        assert!(space.flags(2).contains(SiteFlags::EXECUTED));
    }

    #[test]
    fn test_remove_shifts_tail() {
        let mut space = MemorySpace::from_genome(&insts(&[1, 2, 3]));
        assert_eq!(space.remove(0), Instruction::new(1));
        assert_eq!(space.genome(), insts(&[2, 3]));
    }

    #[test]
    fn test_flags() {
        let mut flags = SiteFlags::empty();
        flags.insert(SiteFlags::MUTATED | SiteFlags::COPY_MUT);
        assert!(flags.contains(SiteFlags::MUTATED));
        assert!(flags.contains(SiteFlags::COPY_MUT));
        assert!(!flags.contains(SiteFlags::COPIED));
        flags.remove(SiteFlags::MUTATED);
        assert_eq!(flags.bits(), 0x20);
    }

    #[test]
    fn test_count_flag() {
        let mut space = MemorySpace::from_genome(&insts(&[0, 0, 0, 0]));
        space.set_flag(0, SiteFlags::COPIED);
        space.set_flag(3, SiteFlags::COPIED);
        assert_eq!(space.count_flag(SiteFlags::COPIED), 2);
        space.clear_flags();
        assert_eq!(space.count_flag(SiteFlags::COPIED), 0);
    }

    #[test]
    fn test_resize_reusing_restores_vacated() {
        let mut space = MemorySpace::from_genome(&insts(&[1, 2, 3, 4]));
        space.truncate(1);
        assert_eq!(space.genome(), insts(&[1]));
        space.resize_reusing(6, Instruction::new(0));
        assert_eq!(space.genome(), insts(&[1, 2, 3, 4, 0, 0]));
    }

    #[test]
    fn test_resize_fills() {
        let mut space = MemorySpace::from_genome(&insts(&[1, 2]));
        space.resize(4, Instruction::new(7));
        assert_eq!(space.genome(), insts(&[1, 2, 7, 7]));
        space.resize(1, Instruction::new(7));
        assert_eq!(space.genome(), insts(&[1]));
    }

    #[test]
    fn test_equality_ignores_vacated() {
        let mut a = MemorySpace::from_genome(&insts(&[1, 2, 3]));
        a.truncate(2);
        let b = MemorySpace::from_genome(&insts(&[1, 2]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_bank_resolves_only_owner() {
        let bank = SpaceBank::new(HardwareId(3), false);
        assert!(bank.spaces(HardwareId(3)).is_some());
        assert!(bank.spaces(HardwareId(4)).is_none());
        assert!(bank.space_or_empty(HardwareId(4), 0).is_empty());
    }

    #[test]
    fn test_space_index_wraps() {
        let mut bank = SpaceBank::new(HardwareId(0), false);
        bank.reset(&insts(&[5]));
        bank.push(MemorySpace::from_genome(&insts(&[6, 6])));
        assert_eq!(bank.space(HardwareId(0), 3).map(|s| s.len()), Some(2));
        assert_eq!(bank.get(2).len(), 1);
    }

    #[test]
    fn test_registry_marks_modified() {
        let mut registry = SpaceRegistry::new(false);
        registry.insert(SpaceBank::new(HardwareId(1), false));
        registry.mark_modified(HardwareId(1));
        assert!(registry.bank(HardwareId(1)).unwrap().modified());
    }
}
