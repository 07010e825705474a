use thiserror::Error;

/// Errors surfaced to the code that builds or restores hardware.
///
/// Organism misbehaviour at runtime is never reported through this type; it is
/// raised as a [`Fault`](crate::fault::Fault) and the organism keeps running.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown instruction `{0}`")]
    UnknownInstruction(String),
    #[error("instruction set is empty")]
    EmptyInstructionSet,
    #[error("instruction set has {0} entries, more than an opcode can address")]
    TooManyInstructions(usize),
    #[error("instruction set defines no label nops")]
    MissingNops,
    #[error("invalid genome symbol `{symbol}`")]
    InvalidGenome { symbol: char },
    #[error("opcode {opcode} out of range for an instruction set of {size}")]
    OpcodeOutOfRange { opcode: u8, size: usize },
    #[error("genome is empty")]
    EmptyGenome,
    #[error("saved state: {0}")]
    State(#[from] StateError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parse failures while reading a hardware checkpoint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("missing `{0}` header")]
    MissingHeader(&'static str),
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unexpected token `{found}`, expected {expected}")]
    BadToken { found: String, expected: &'static str },
    #[error("state has no thread contexts")]
    NoThreads,
}

pub type Result<T> = std::result::Result<T, Error>;
