// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stagecast Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Steps: the discrete, sequence-numbered units of produced data.
//!
//! A step accumulates writer payloads while `Open`, becomes `Sealed` once
//! every writer rank in the group has ended it, and is `Retired` once every
//! reader rank has moved past it (or the buffering-depth policy evicts it).
//! Sealed steps are immutable; concurrent readers share them freely.

use std::sync::Arc;

use bytes::Bytes;

use crate::selection::Selection;
use crate::variable::VariableHandle;

/// Monotonically increasing per-stream step sequence number.
pub type StepSeq = u64;

/// Lifecycle state of a step within its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Open,
    Sealed,
    Retired,
}

/// How `begin_step` advances through the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Writer side: open this rank's next step. Never blocks.
    Append,
    /// Reader side: admit the next not-yet-admitted sealed step.
    NextAvailable,
    /// Reader side: admit the newest sealed step, skipping intervening ones.
    Latest,
}

/// Outcome of a `begin_step` call.
///
/// Liveness conditions are values, not errors: callers check the status and
/// decide whether to retry, not catch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// A step is active; data calls may proceed.
    Ok,
    /// No step became available within the timeout.
    NotReady,
    /// The writer side has closed and every sealed step has been drained.
    EndOfStream,
}

/// One writer contribution: a variable, the sub-region it covers, and the
/// staged bytes for that region.
#[derive(Debug, Clone)]
pub struct StepPayload {
    variable: VariableHandle,
    selection: Selection,
    data: Bytes,
}

impl StepPayload {
    pub(crate) fn new(variable: VariableHandle, selection: Selection, data: Bytes) -> Self {
        Self {
            variable,
            selection,
            data,
        }
    }

    pub fn variable(&self) -> &VariableHandle {
        &self.variable
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// An immutable, fully-contributed step as exposed to readers.
///
/// Payloads are kept in arrival order; when writer selections overlap, the
/// later arrival wins for the overlapped sub-region.
#[derive(Debug)]
pub struct SealedStep {
    seq: StepSeq,
    payloads: Vec<StepPayload>,
}

impl SealedStep {
    pub(crate) fn new(seq: StepSeq, payloads: Vec<StepPayload>) -> Arc<Self> {
        Arc::new(Self { seq, payloads })
    }

    pub fn seq(&self) -> StepSeq {
        self.seq
    }

    /// All payloads in the step, in arrival order.
    pub fn payloads(&self) -> &[StepPayload] {
        &self.payloads
    }

    /// Payloads contributed for one variable, in arrival order.
    pub fn payloads_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a StepPayload> {
        self.payloads
            .iter()
            .filter(move |p| p.variable().name() == name)
    }

    /// Whether any writer contributed to `name` in this step.
    pub fn has_variable(&self, name: &str) -> bool {
        self.payloads_for(name).next().is_some()
    }
}
