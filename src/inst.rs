use rand::Rng;

use crate::error::{Error, Result};

/// Number of distinct label nops. Label symbols are taken modulo this base.
pub const NUM_NOPS: usize = 4;

/// Genome text symbols, one per opcode index.
const SYMBOLS: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A single genome site value: an index into the active [`InstSet`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Instruction(u8);

impl Instruction {
    pub const fn new(op: u8) -> Self {
        Self(op)
    }

    pub const fn op(self) -> u8 {
        self.0
    }

    /// Display symbol used in genome strings.
    pub fn symbol(self) -> char {
        SYMBOLS.get(self.0 as usize).map_or('?', |&b| b as char)
    }

    pub fn from_symbol(c: char) -> Option<Self> {
        SYMBOLS
            .iter()
            .position(|&b| b as char == c)
            .map(|i| Self(i as u8))
    }
}

/// Handler identity for an instruction. Each instruction set entry maps one
/// opcode value to one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    NopA,
    NopB,
    NopC,
    NopD,
    NopX,
    ValShiftR,
    ValShiftL,
    ValNand,
    ValAdd,
    ValSub,
    ValNegate,
    ValMult,
    ValDiv,
    ValMod,
    ValInc,
    ValDec,
    ValCopy,
    ValDelete,
    StackDelete,
    PushNext,
    PushPrev,
    PushComp,
    MemSet,
    MemAlloc,
    Divide,
    Inject,
    InstRead,
    InstWrite,
    InstCopy,
    InstCopyEc,
    IfEqual,
    IfNotEqual,
    IfLess,
    IfGreater,
    IfLabel,
    HeadPush,
    HeadPop,
    HeadMove,
    Search,
    SearchF,
    SearchB,
    Io,
    SendMsg,
    Sense,
    ThreadFork,
    ThreadKill,
}

impl Opcode {
    pub const ALL: [Opcode; 46] = [
        Opcode::NopA,
        Opcode::NopB,
        Opcode::NopC,
        Opcode::NopD,
        Opcode::NopX,
        Opcode::ValShiftR,
        Opcode::ValShiftL,
        Opcode::ValNand,
        Opcode::ValAdd,
        Opcode::ValSub,
        Opcode::ValNegate,
        Opcode::ValMult,
        Opcode::ValDiv,
        Opcode::ValMod,
        Opcode::ValInc,
        Opcode::ValDec,
        Opcode::ValCopy,
        Opcode::ValDelete,
        Opcode::StackDelete,
        Opcode::PushNext,
        Opcode::PushPrev,
        Opcode::PushComp,
        Opcode::MemSet,
        Opcode::MemAlloc,
        Opcode::Divide,
        Opcode::Inject,
        Opcode::InstRead,
        Opcode::InstWrite,
        Opcode::InstCopy,
        Opcode::InstCopyEc,
        Opcode::IfEqual,
        Opcode::IfNotEqual,
        Opcode::IfLess,
        Opcode::IfGreater,
        Opcode::IfLabel,
        Opcode::HeadPush,
        Opcode::HeadPop,
        Opcode::HeadMove,
        Opcode::Search,
        Opcode::SearchF,
        Opcode::SearchB,
        Opcode::Io,
        Opcode::SendMsg,
        Opcode::Sense,
        Opcode::ThreadFork,
        Opcode::ThreadKill,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Opcode::NopA => "Nop-A",
            Opcode::NopB => "Nop-B",
            Opcode::NopC => "Nop-C",
            Opcode::NopD => "Nop-D",
            Opcode::NopX => "Nop-X",
            Opcode::ValShiftR => "Val-Shift-R",
            Opcode::ValShiftL => "Val-Shift-L",
            Opcode::ValNand => "Val-Nand",
            Opcode::ValAdd => "Val-Add",
            Opcode::ValSub => "Val-Sub",
            Opcode::ValNegate => "Val-Negate",
            Opcode::ValMult => "Val-Mult",
            Opcode::ValDiv => "Val-Div",
            Opcode::ValMod => "Val-Mod",
            Opcode::ValInc => "Val-Inc",
            Opcode::ValDec => "Val-Dec",
            Opcode::ValCopy => "Val-Copy",
            Opcode::ValDelete => "Val-Delete",
            Opcode::StackDelete => "Stack-Delete",
            Opcode::PushNext => "Push-Next",
            Opcode::PushPrev => "Push-Prev",
            Opcode::PushComp => "Push-Comp",
            Opcode::MemSet => "Mem-Set",
            Opcode::MemAlloc => "Mem-Alloc",
            Opcode::Divide => "Divide",
            Opcode::Inject => "Inject",
            Opcode::InstRead => "Inst-Read",
            Opcode::InstWrite => "Inst-Write",
            Opcode::InstCopy => "Inst-Copy",
            Opcode::InstCopyEc => "Inst-Copy-EC",
            Opcode::IfEqual => "If-Equal",
            Opcode::IfNotEqual => "If-Not-Equal",
            Opcode::IfLess => "If-Less",
            Opcode::IfGreater => "If-Greater",
            Opcode::IfLabel => "If-Label",
            Opcode::HeadPush => "Head-Push",
            Opcode::HeadPop => "Head-Pop",
            Opcode::HeadMove => "Head-Move",
            Opcode::Search => "Search",
            Opcode::SearchF => "Search-F",
            Opcode::SearchB => "Search-B",
            Opcode::Io => "IO",
            Opcode::SendMsg => "Send-Msg",
            Opcode::Sense => "Sense",
            Opcode::ThreadFork => "Thread-Fork",
            Opcode::ThreadKill => "Thread-Kill",
        }
    }

    /// Case-insensitive lookup by instruction name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }

    /// Label value of a nop, or `None` for every other opcode.
    pub fn nop_mod(self) -> Option<usize> {
        match self {
            Opcode::NopA => Some(0),
            Opcode::NopB => Some(1),
            Opcode::NopC => Some(2),
            Opcode::NopD => Some(3),
            _ => None,
        }
    }
}

/// One instruction set record: handler plus the costs the dispatcher charges.
#[derive(Clone, Debug, PartialEq)]
pub struct InstEntry {
    pub opcode: Opcode,
    /// Cycles that must be paid before each execution.
    pub cost: u32,
    /// Cycles paid once, the first time this instruction executes.
    pub first_time_cost: u32,
    /// Probability that an execution silently fails.
    pub prob_fail: f64,
}

impl InstEntry {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            cost: 0,
            first_time_cost: 0,
            prob_fail: 0.0,
        }
    }
}

/// Read-only instruction set shared by every hardware instance built from it.
///
/// Instruction values are dense indices into the entry list, so every
/// instruction stored in a memory space is below [`InstSet::len`].
#[derive(Clone, Debug, PartialEq)]
pub struct InstSet {
    entries: Vec<InstEntry>,
    nops: [Option<Instruction>; NUM_NOPS],
}

impl InstSet {
    pub fn new(entries: Vec<InstEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::EmptyInstructionSet);
        }
        if entries.len() > SYMBOLS.len() {
            return Err(Error::TooManyInstructions(entries.len()));
        }
        let mut nops = [None; NUM_NOPS];
        for (i, entry) in entries.iter().enumerate() {
            if let Some(m) = entry.opcode.nop_mod() {
                nops[m].get_or_insert(Instruction::new(i as u8));
            }
        }
        if nops.iter().all(Option::is_none) {
            return Err(Error::MissingNops);
        }
        Ok(Self { entries, nops })
    }

    /// Build a zero-cost set from instruction names, in order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let entries = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                Opcode::from_name(name)
                    .map(InstEntry::new)
                    .ok_or_else(|| Error::UnknownInstruction(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(entries)
    }

    /// Every opcode once, in declaration order, at zero cost.
    pub fn standard() -> Self {
        let entries = Opcode::ALL.iter().copied().map(InstEntry::new).collect();
        let mut nops = [None; NUM_NOPS];
        for (i, slot) in nops.iter_mut().enumerate() {
            *slot = Some(Instruction::new(i as u8));
        }
        Self { entries, nops }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[InstEntry] {
        &self.entries
    }

    #[inline(always)]
    pub fn entry(&self, inst: Instruction) -> &InstEntry {
        &self.entries[inst.op() as usize % self.entries.len()]
    }

    #[inline(always)]
    pub fn opcode(&self, inst: Instruction) -> Opcode {
        self.entry(inst).opcode
    }

    #[inline(always)]
    pub fn nop_mod(&self, inst: Instruction) -> Option<usize> {
        self.opcode(inst).nop_mod()
    }

    #[inline(always)]
    pub fn is_nop(&self, inst: Instruction) -> bool {
        self.nop_mod(inst).is_some()
    }

    /// The instruction encoding label value `m`, if the set contains that nop.
    pub fn nop_inst(&self, m: usize) -> Option<Instruction> {
        self.nops.get(m).copied().flatten()
    }

    /// Neutral fill value.
    pub fn default_inst(&self) -> Instruction {
        Instruction::new(0)
    }

    pub fn random_inst<R: Rng + ?Sized>(&self, rng: &mut R) -> Instruction {
        Instruction::new(rng.gen_range(0..self.entries.len()) as u8)
    }

    /// First instruction bound to `opcode`.
    pub fn find(&self, opcode: Opcode) -> Option<Instruction> {
        self.entries
            .iter()
            .position(|e| e.opcode == opcode)
            .map(|i| Instruction::new(i as u8))
    }

    /// Whether any instruction ever makes the dispatcher wait.
    pub fn has_costs(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.cost > 1 || e.first_time_cost > 0)
    }

    pub fn contains(&self, inst: Instruction) -> bool {
        (inst.op() as usize) < self.entries.len()
    }

    pub fn check_genome(&self, genome: &[Instruction]) -> Result<()> {
        if genome.is_empty() {
            return Err(Error::EmptyGenome);
        }
        match genome.iter().find(|inst| !self.contains(**inst)) {
            Some(inst) => Err(Error::OpcodeOutOfRange {
                opcode: inst.op(),
                size: self.len(),
            }),
            None => Ok(()),
        }
    }

    /// Parse a genome written as one symbol per site. Whitespace is ignored.
    pub fn parse_genome(&self, text: &str) -> Result<Vec<Instruction>> {
        let genome = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| {
                Instruction::from_symbol(c)
                    .filter(|inst| self.contains(*inst))
                    .ok_or(Error::InvalidGenome { symbol: c })
            })
            .collect::<Result<Vec<_>>>()?;
        self.check_genome(&genome)?;
        Ok(genome)
    }

    pub fn genome_string(&self, genome: &[Instruction]) -> String {
        genome.iter().map(|inst| inst.symbol()).collect()
    }

    /// One instruction name per line, for human inspection.
    pub fn disassemble(&self, genome: &[Instruction]) -> String {
        let mut out = String::new();
        for (i, inst) in genome.iter().enumerate() {
            out.push_str(&format!("{i:4}: {}\n", self.opcode(*inst).name()));
        }
        out
    }
}
