// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stagecast Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the staging engine.
//!
//! Only caller misuse is modeled as an error: wrong call order, conflicting
//! variable definitions, malformed selections, mismatched buffers. Liveness
//! outcomes (a step not yet available, the writer side gone) are ordinary
//! return values — see [`crate::step::StepStatus`] — and coverage gaps are
//! not reported at all; the destination buffer is simply left untouched.

use thiserror::Error;

use crate::dtype::DType;

/// Errors surfaced synchronously to the calling process.
///
/// There is no cross-process propagation: a writer's logic error never aborts
/// a reader, though the reader may later observe its consequences as a
/// coverage gap or an eventual end-of-stream.
#[derive(Debug, Error)]
pub enum Error {
    /// The variable name is already defined with a different dtype or shape.
    #[error("variable `{name}` is already defined with a different dtype or shape")]
    DuplicateDefinition { name: String },

    /// The variable name is not known to this engine.
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    /// The selection violates its construction or boundedness invariants.
    #[error("invalid selection: {reason}")]
    InvalidSelection { reason: String },

    /// The access element type does not match the variable's declared dtype.
    #[error("variable `{variable}` is declared {declared}, accessed as {accessed}")]
    TypeMismatch {
        variable: String,
        declared: DType,
        accessed: DType,
    },

    /// The caller's buffer does not hold exactly one element per selected cell.
    #[error("buffer holds {actual} elements, selection covers {expected}")]
    BufferSize { expected: usize, actual: usize },

    /// A step-controller call was made in the wrong handle state.
    #[error("invalid engine state: {0}")]
    InvalidState(&'static str),

    /// A reader opened a stream no writer ever opened.
    #[error("stream `{0}` unavailable: no writer has opened it")]
    StreamUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
