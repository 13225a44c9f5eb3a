// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stagecast Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Step-synchronized MxN array staging.
//!
//! Stagecast moves large multidimensional array data between two
//! independently-sized groups of writer and reader processes, step by step,
//! with neither side knowing the other's process count or domain
//! decomposition:
//! - Variables declare a global shape; each process accesses its own
//!   offset+count selection of it per step.
//! - Writers seal a step once every rank in the group has contributed;
//!   sealed steps are immutable and visible to readers.
//! - The redistribution engine assembles any reader selection from the
//!   intersecting writer contributions, whatever the two decompositions are.
//! - Readers park (with timeout) for the next sealed step and observe
//!   end-of-stream once the writer group closes.
//!
//! The process-group substrate is the [`comm::GroupComm`] capability trait;
//! [`comm::LocalWorld`] is the in-process threads-as-processes
//! implementation used for testing.

pub mod comm;
pub mod config;
pub mod dtype;
pub mod engine;
pub mod error;
pub mod hub;
pub mod logging;
pub mod selection;
pub mod step;
pub mod variable;

pub(crate) mod redistribute;
pub(crate) mod stream;

pub use comm::{GroupComm, LocalGroup, LocalPeer, LocalWorld};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use dtype::{DType, Element};
pub use engine::{Engine, Mode};
pub use error::{Error, Result};
pub use hub::StagingHub;
pub use selection::Selection;
pub use step::{SealedStep, StepMode, StepPayload, StepSeq, StepState, StepStatus};
pub use variable::{Variable, VariableHandle, VariableRegistry};
