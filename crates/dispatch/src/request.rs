//! The inbound compile request.

use std::fmt;
use std::str::FromStr;

use aotserver_cache::{CacheOffset, MethodId};

/// Optimization level a client asks for, coldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptLevel {
    NoOpt,
    Cold,
    Warm,
    Hot,
    VeryHot,
    Scorching,
}

impl OptLevel {
    pub const ALL: [OptLevel; 6] = [
        OptLevel::NoOpt,
        OptLevel::Cold,
        OptLevel::Warm,
        OptLevel::Hot,
        OptLevel::VeryHot,
        OptLevel::Scorching,
    ];

    /// Wire code of this level.
    pub const fn code(self) -> u8 {
        match self {
            OptLevel::NoOpt => 0,
            OptLevel::Cold => 1,
            OptLevel::Warm => 2,
            OptLevel::Hot => 3,
            OptLevel::VeryHot => 4,
            OptLevel::Scorching => 5,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OptLevel::NoOpt),
            1 => Some(OptLevel::Cold),
            2 => Some(OptLevel::Warm),
            3 => Some(OptLevel::Hot),
            4 => Some(OptLevel::VeryHot),
            5 => Some(OptLevel::Scorching),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            OptLevel::NoOpt => "noOpt",
            OptLevel::Cold => "cold",
            OptLevel::Warm => "warm",
            OptLevel::Hot => "hot",
            OptLevel::VeryHot => "veryHot",
            OptLevel::Scorching => "scorching",
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OptLevel::ALL
            .into_iter()
            .find(|level| level.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!("unknown opt level `{s}` (expected noOpt, cold, warm, hot, veryHot or scorching)")
            })
    }
}

/// Client-provided placement hint for the generated code.
///
/// Advisory only: it is copied into the plan unchanged and interpreted by
/// the compilation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBufferHint {
    pub address: u64,
    pub size: u64,
}

impl CodeBufferHint {
    /// Build a hint from its wire fields; a null address means no hint.
    pub fn from_parts(address: u64, size: u64) -> Option<Self> {
        (address != 0).then_some(Self { address, size })
    }
}

/// A request to compile one method. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub class_offset: CacheOffset,
    pub method_offset: CacheOffset,
    /// Resident method handle the client already holds, if any.
    pub direct_method: Option<MethodId>,
    pub opt_level: OptLevel,
    pub code_buffer: Option<CodeBufferHint>,
}

impl CompileRequest {
    pub fn new(class_offset: CacheOffset, method_offset: CacheOffset, opt_level: OptLevel) -> Self {
        Self {
            class_offset,
            method_offset,
            direct_method: None,
            opt_level,
            code_buffer: None,
        }
    }

    pub fn with_direct_method(mut self, method: MethodId) -> Self {
        self.direct_method = Some(method);
        self
    }

    pub fn with_code_buffer(mut self, hint: CodeBufferHint) -> Self {
        self.code_buffer = Some(hint);
        self
    }
}
