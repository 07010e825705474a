use std::fmt;

/// How bad a fault is. Neither severity stops the organism.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultSeverity {
    /// Logged; the instruction carries on.
    Warning,
    /// The triggering operation is abandoned for this cycle.
    Error,
}

/// Where a fault was raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultLocation {
    Default,
    Instruction,
    Jump,
    Math,
    Inject,
    ThreadFork,
    ThreadKill,
    Alloc,
    Divide,
    Copy,
}

impl FaultLocation {
    pub fn name(self) -> &'static str {
        match self {
            FaultLocation::Default => "default",
            FaultLocation::Instruction => "instruction",
            FaultLocation::Jump => "jump",
            FaultLocation::Math => "math",
            FaultLocation::Inject => "inject",
            FaultLocation::ThreadFork => "thread-fork",
            FaultLocation::ThreadKill => "thread-kill",
            FaultLocation::Alloc => "alloc",
            FaultLocation::Divide => "divide",
            FaultLocation::Copy => "copy",
        }
    }
}

/// A recoverable problem raised by an instruction handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub location: FaultLocation,
    pub severity: FaultSeverity,
    pub message: String,
}

impl Fault {
    pub fn new(location: FaultLocation, severity: FaultSeverity, message: impl Into<String>) -> Self {
        Self {
            location,
            severity,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == FaultSeverity::Error
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            FaultSeverity::Warning => "warning",
            FaultSeverity::Error => "error",
        };
        write!(f, "{severity} [{}]: {}", self.location.name(), self.message)
    }
}
