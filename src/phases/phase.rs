//! Lifecycle phases and mode normalization.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{ModError, Result};

/// A named stage of graph-wide work.
///
/// `Train`, `Deploy` and `Eval` are requestable; `PostProcess` is always
/// collected and run regardless of which phases were requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Train,
    Deploy,
    Eval,
    PostProcess,
}

impl Phase {
    /// Phases a caller may request.
    pub const REQUESTABLE: [Phase; 3] = [Phase::Train, Phase::Deploy, Phase::Eval];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Deploy => "deploy",
            Phase::Eval => "eval",
            Phase::PostProcess => "post_process",
        }
    }
}

impl FromStr for Phase {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Phase::Train),
            "deploy" => Ok(Phase::Deploy),
            "eval" => Ok(Phase::Eval),
            other => Err(ModError::usage(format!(
                "cannot find {other:?} in phase list: [\"train\", \"deploy\", \"eval\"]"
            ))),
        }
    }
}

/// Requested phase set: a single phase or a list, normalized to a list.
#[derive(Debug, Clone)]
pub enum Mode {
    One(Phase),
    Many(Vec<Phase>),
}

impl Mode {
    pub fn into_phases(self) -> Vec<Phase> {
        match self {
            Mode::One(p) => vec![p],
            Mode::Many(ps) => ps,
        }
    }
}

impl From<Phase> for Mode {
    fn from(p: Phase) -> Self {
        Mode::One(p)
    }
}

impl From<Vec<Phase>> for Mode {
    fn from(ps: Vec<Phase>) -> Self {
        Mode::Many(ps)
    }
}

/// Parse phase names into a normalized list. Unknown names are fatal
/// usage errors, never retried.
pub fn parse_phases<I, S>(names: I) -> Result<Vec<Phase>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names.into_iter().map(|n| n.as_ref().parse()).collect()
}
