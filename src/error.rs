//! Error taxonomy: walk-rule violations vs. hard generation failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A violated RISC-V page-table-walk rule. Under error injection these are
/// the expected outcome and travel as the tag of an invalid walk; they only
/// surface as hard failures when they hit a walk that was supposed to be
/// valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    #[error("PTE marked invalid (V=0)")]
    PteMarkedInvalid,
    #[error("write permission without read (R=0, W=1)")]
    WriteNoRead,
    #[error("leaf entry encoded as a pointer (R=W=X=0)")]
    LeafMarkedAsPointer,
    #[error("superpage leaf has nonzero low page-number bits")]
    SuperPageNotCleared,
    #[error("non-global mapping below a global one")]
    NonGlobalAfterGlobal,
    #[error("leaf entry where a pointer is required")]
    UnexpectedLeaf,
    #[error("pointer entry with D/A/U set")]
    InvalidDau,
}

/// Hard failure of a generation request. A test case that fails is not
/// recorded at all — there is no partial success.
#[derive(Debug, Error)]
pub enum GenError {
    /// The resolver could not find a legal address/PTE/error assignment
    /// within its retry bound.
    #[error("could not satisfy constraints: {0}")]
    InvalidConstraints(String),
    /// A walk rule was violated on a walk no error was requested for.
    #[error("unexpected walk violation: {0}")]
    UnexpectedViolation(Violation),
    /// The request itself is malformed (bad mode/pagesize combination,
    /// mismatched PTE list, empty error-type set, ...).
    #[error("bad test spec: {0}")]
    BadSpec(String),
}
