// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stagecast Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! The per-process engine handle.
//!
//! An `Engine` binds steps, selections, and redistribution into the
//! write/read API surface for one process of one group on one stream.
//! Writer puts are staged against the active step and publish when the
//! group seals it; reader gets execute immediately, since an admitted step
//! is always sealed and immutable.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::comm::GroupComm;
use crate::config::EngineConfig;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::hub::StagingHub;
use crate::redistribute;
use crate::selection::Selection;
use crate::step::{SealedStep, StepMode, StepPayload, StepSeq, StepStatus};
use crate::stream::StreamCore;
use crate::variable::{VariableHandle, VariableRegistry};

/// Which side of the stream a handle drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Write,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Idle,
    StepActive,
    Closed,
}

/// One process's handle onto one stream.
pub struct Engine {
    mode: Mode,
    comm: Arc<dyn GroupComm>,
    hub: Arc<StagingHub>,
    stream: Arc<StreamCore>,
    registry: VariableRegistry,
    state: HandleState,
    /// Sequence number of the active step, writer or reader side.
    current_seq: Option<StepSeq>,
    /// The admitted sealed step (reader side only).
    current_step: Option<Arc<SealedStep>>,
    /// Puts staged against the active step (writer side only).
    pending: Vec<StepPayload>,
    /// Lowest sequence number this reader has not admitted yet.
    read_cursor: StepSeq,
}

impl Engine {
    /// Open a stream for this process.
    ///
    /// Every process of the group must open the same stream name with the
    /// same mode. A reader parks until some writer has opened the name,
    /// bounded by `config.open_timeout`, and fails
    /// [`Error::StreamUnavailable`] if none ever does.
    pub fn open(
        hub: &Arc<StagingHub>,
        stream_name: &str,
        mode: Mode,
        comm: Arc<dyn GroupComm>,
        config: EngineConfig,
    ) -> Result<Self> {
        let stream = match mode {
            Mode::Write => hub.open_write(stream_name, comm.size(), config.max_buffered_steps),
            Mode::Read => hub.open_read(stream_name, comm.size(), config.open_timeout)?,
        };
        tracing::debug!(
            stream = stream_name,
            ?mode,
            rank = comm.rank(),
            group_size = comm.size(),
            "engine opened"
        );
        Ok(Self {
            mode,
            comm,
            hub: hub.clone(),
            stream,
            registry: VariableRegistry::new(),
            state: HandleState::Idle,
            current_seq: None,
            current_step: None,
            pending: Vec::new(),
            read_cursor: 0,
        })
    }

    /// Declare a variable in this process's registry. Identical redefinition
    /// returns the existing handle; a conflicting one fails
    /// [`Error::DuplicateDefinition`].
    pub fn define_variable(
        &mut self,
        name: &str,
        dtype: DType,
        shape: Vec<usize>,
        local: Option<Selection>,
    ) -> Result<VariableHandle> {
        self.registry.define(name, dtype, shape, local)
    }

    /// Look up a variable by name.
    ///
    /// On the reader side this also discovers variables contributed to the
    /// currently admitted step, mirroring how definitions travel with the
    /// data rather than out of band.
    pub fn inquire_variable(&mut self, name: &str) -> Option<VariableHandle> {
        if let Some(handle) = self.registry.lookup(name) {
            return Some(handle);
        }
        let step = self.current_step.as_ref()?;
        let payload = step.payloads_for(name).next()?;
        let var = payload.variable();
        match self.registry.define(
            name,
            var.dtype(),
            var.shape().to_vec(),
            var.local_selection().cloned(),
        ) {
            Ok(handle) => Some(handle),
            Err(err) => {
                // A conflicting local declaration wins; the step's metadata
                // is only a discovery fallback.
                tracing::warn!(variable = name, %err, "step metadata conflicts with local definition");
                self.registry.lookup(name)
            }
        }
    }

    /// Advance to the next step.
    ///
    /// Writers use [`StepMode::Append`]: never blocks, always `Ok`. Readers
    /// use [`StepMode::NextAvailable`] or [`StepMode::Latest`] and must check
    /// the returned status: `NotReady` after `timeout` with no sealed step
    /// (a zero timeout polls), `EndOfStream` once the writer side has closed
    /// and every sealed step has been drained.
    pub fn begin_step(&mut self, mode: StepMode, timeout: Duration) -> Result<StepStatus> {
        match self.state {
            HandleState::StepActive => {
                return Err(Error::InvalidState("begin_step while a step is active"))
            }
            HandleState::Closed => return Err(Error::InvalidState("begin_step after close")),
            HandleState::Idle => {}
        }

        match (self.mode, mode) {
            (Mode::Write, StepMode::Append) => {
                let seq = self.stream.begin_write_step(self.comm.rank());
                self.current_seq = Some(seq);
                self.state = HandleState::StepActive;
                Ok(StepStatus::Ok)
            }
            (Mode::Write, _) => Err(Error::InvalidState(
                "writer streams advance with StepMode::Append",
            )),
            (Mode::Read, StepMode::Append) => Err(Error::InvalidState(
                "reader streams advance with StepMode::NextAvailable or StepMode::Latest",
            )),
            (Mode::Read, step_mode) => {
                let latest = step_mode == StepMode::Latest;
                let (status, step) = self.stream.next_step(self.read_cursor, latest, timeout);
                if let Some(step) = step {
                    self.read_cursor = step.seq() + 1;
                    self.current_seq = Some(step.seq());
                    self.current_step = Some(step);
                    self.state = HandleState::StepActive;
                }
                Ok(status)
            }
        }
    }

    /// Sequence number of the active step, if any.
    pub fn current_step_seq(&self) -> Option<StepSeq> {
        self.current_seq
    }

    /// Stage a writer contribution against the active step.
    ///
    /// The buffer must hold exactly one element per selected cell, in the
    /// selection's row-major order. With `selection` of `None` the variable's
    /// default local selection applies. Data is staged immediately and
    /// published when the step seals.
    pub fn put<T: Element>(
        &mut self,
        variable: &VariableHandle,
        selection: Option<Selection>,
        data: &[T],
    ) -> Result<()> {
        if self.mode != Mode::Write {
            return Err(Error::InvalidState("put on a reader stream"));
        }
        if self.state != HandleState::StepActive {
            return Err(Error::InvalidState("put outside an active step"));
        }
        let (variable, selection) = self.resolve_access::<T>(variable, selection, data.len())?;

        let bytes = Bytes::copy_from_slice(bytemuck::cast_slice(data));
        tracing::trace!(
            variable = variable.name(),
            seq = self.current_seq,
            offset = ?selection.offset(),
            count = ?selection.count(),
            "staged put"
        );
        self.pending
            .push(StepPayload::new(variable, selection, bytes));
        Ok(())
    }

    /// Read the selected sub-array of `variable` out of the admitted step.
    ///
    /// Executes immediately. Elements no writer covered are left untouched
    /// in `out`; callers needing completeness must validate it themselves.
    pub fn get<T: Element>(
        &mut self,
        variable: &VariableHandle,
        selection: Option<Selection>,
        out: &mut [T],
    ) -> Result<()> {
        if self.mode != Mode::Read {
            return Err(Error::InvalidState("get on a writer stream"));
        }
        if self.state != HandleState::StepActive {
            return Err(Error::InvalidState("get outside an active step"));
        }
        let (variable, selection) = self.resolve_access::<T>(variable, selection, out.len())?;

        let step = self
            .current_step
            .as_ref()
            .expect("reader in StepActive always holds a step");
        let contributors = redistribute::execute_read(
            step.payloads_for(variable.name()),
            &selection,
            bytemuck::cast_slice_mut(out),
            variable.dtype().size(),
        );
        tracing::trace!(
            variable = variable.name(),
            seq = step.seq(),
            contributors,
            "get executed"
        );
        Ok(())
    }

    /// Validate an access: the variable must be known here, the dtype must
    /// match `T`, the selection must fit the global shape, and the buffer
    /// must hold exactly the selected element count.
    fn resolve_access<T: Element>(
        &self,
        variable: &VariableHandle,
        selection: Option<Selection>,
        buffer_len: usize,
    ) -> Result<(VariableHandle, Selection)> {
        let known = self
            .registry
            .lookup(variable.name())
            .ok_or_else(|| Error::UnknownVariable(variable.name().into()))?;
        if known.dtype() != T::DTYPE {
            return Err(Error::TypeMismatch {
                variable: known.name().into(),
                declared: known.dtype(),
                accessed: T::DTYPE,
            });
        }
        let selection = match selection {
            Some(sel) => sel,
            None => known
                .local_selection()
                .cloned()
                .ok_or_else(|| Error::InvalidSelection {
                    reason: format!(
                        "variable `{}` has no default local selection",
                        known.name()
                    ),
                })?,
        };
        selection.check_within(known.shape())?;
        if buffer_len != selection.num_elements() {
            return Err(Error::BufferSize {
                expected: selection.num_elements(),
                actual: buffer_len,
            });
        }
        Ok((known, selection))
    }

    /// End the active step.
    ///
    /// Writer side: flush the staged puts into the step, record this rank's
    /// completion (the last rank seals the step), then hold at a group
    /// barrier so the whole group agrees the step is sealed before anyone
    /// proceeds. Reader side: retire this rank's admission.
    pub fn end_step(&mut self) -> Result<()> {
        if self.state != HandleState::StepActive {
            return Err(Error::InvalidState("end_step without an active step"));
        }
        let seq = self
            .current_seq
            .expect("StepActive always has a sequence number");
        match self.mode {
            Mode::Write => {
                let payloads = std::mem::take(&mut self.pending);
                self.stream
                    .end_write_step(self.comm.rank(), seq, payloads);
                self.comm.barrier();
            }
            Mode::Read => {
                self.stream.retire(self.comm.rank(), seq);
                self.current_step = None;
            }
        }
        self.current_seq = None;
        self.state = HandleState::Idle;
        Ok(())
    }

    /// Close this process's side of the stream. Closing the last writer rank
    /// unblocks parked readers with `EndOfStream` once they drain the
    /// remaining sealed steps. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            HandleState::Closed => return Ok(()),
            HandleState::StepActive if self.mode == Mode::Write => {
                return Err(Error::InvalidState("close during an active write step"));
            }
            // A reader may close mid-step; close releases its admission.
            HandleState::StepActive => {
                self.stream.retire(
                    self.comm.rank(),
                    self.current_seq
                        .expect("StepActive always has a sequence number"),
                );
                self.current_step = None;
                self.current_seq = None;
            }
            HandleState::Idle => {}
        }
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        match self.mode {
            Mode::Write => {
                self.stream.close_writer();
                self.hub.close_write(self.stream.name());
            }
            Mode::Read => {
                self.hub.close_read(self.stream.name());
            }
        }
        tracing::debug!(
            stream = self.stream.name(),
            mode = ?self.mode,
            rank = self.comm.rank(),
            "engine closed"
        );
        self.state = HandleState::Closed;
    }
}

impl Drop for Engine {
    /// Abnormal-exit cleanup: a dropped writer must still count toward the
    /// group close, or parked readers would never see `EndOfStream`.
    fn drop(&mut self) {
        if self.state != HandleState::Closed {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer_pair(hub: &Arc<StagingHub>) -> (Engine, Engine) {
        let peers = crate::comm::LocalWorld::new(1);
        let comm: Arc<dyn GroupComm> = Arc::new(peers.into_iter().next().unwrap());
        let writer = Engine::open(hub, "t", Mode::Write, comm, EngineConfig::default()).unwrap();

        let peers = crate::comm::LocalWorld::new(1);
        let comm: Arc<dyn GroupComm> = Arc::new(peers.into_iter().next().unwrap());
        let reader = Engine::open(hub, "t", Mode::Read, comm, EngineConfig::default()).unwrap();
        (writer, reader)
    }

    #[test]
    fn writer_roundtrip_to_reader() {
        let hub = StagingHub::new();
        let (mut writer, mut reader) = writer_pair(&hub);

        let var = writer
            .define_variable("grid", DType::F32, vec![4, 4], None)
            .unwrap();
        let sel = Selection::new(vec![0, 0], vec![4, 4]).unwrap();
        let data: Vec<f32> = (0..16).map(|i| i as f32).collect();

        writer.begin_step(StepMode::Append, Duration::ZERO).unwrap();
        writer.put(&var, Some(sel.clone()), &data).unwrap();
        writer.end_step().unwrap();

        let status = reader
            .begin_step(StepMode::NextAvailable, Duration::from_secs(5))
            .unwrap();
        assert_eq!(status, StepStatus::Ok);
        assert_eq!(reader.current_step_seq(), Some(0));

        let rvar = reader.inquire_variable("grid").expect("discovered from step");
        assert_eq!(rvar.shape(), &[4, 4]);
        let mut out = vec![0f32; 16];
        reader.get(&rvar, Some(sel), &mut out).unwrap();
        assert_eq!(out, data);
        reader.end_step().unwrap();
    }

    #[test]
    fn state_machine_misuse_is_rejected() {
        let hub = StagingHub::new();
        let (mut writer, mut reader) = writer_pair(&hub);

        assert!(matches!(
            writer.end_step(),
            Err(Error::InvalidState(_))
        ));
        writer.begin_step(StepMode::Append, Duration::ZERO).unwrap();
        assert!(matches!(
            writer.begin_step(StepMode::Append, Duration::ZERO),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            writer.begin_step(StepMode::NextAvailable, Duration::ZERO),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(writer.close(), Err(Error::InvalidState(_))));
        writer.end_step().unwrap();
        writer.close().unwrap();
        // Idempotent.
        writer.close().unwrap();
        assert!(matches!(
            writer.begin_step(StepMode::Append, Duration::ZERO),
            Err(Error::InvalidState(_))
        ));

        assert!(matches!(
            reader.begin_step(StepMode::Append, Duration::ZERO),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn put_validates_variable_dtype_selection_and_buffer() {
        let hub = StagingHub::new();
        let (mut writer, _reader) = writer_pair(&hub);

        let var = writer
            .define_variable("grid", DType::F32, vec![4, 4], None)
            .unwrap();
        writer.begin_step(StepMode::Append, Duration::ZERO).unwrap();

        // Wrong element type.
        let sel = Selection::new(vec![0, 0], vec![2, 2]).unwrap();
        let err = writer.put(&var, Some(sel.clone()), &[0f64; 4]).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));

        // Out-of-bounds selection.
        let oob = Selection::new(vec![3, 3], vec![2, 2]).unwrap();
        let err = writer.put(&var, Some(oob), &[0f32; 4]).unwrap_err();
        assert!(matches!(err, Error::InvalidSelection { .. }));

        // Buffer length mismatch.
        let err = writer.put(&var, Some(sel.clone()), &[0f32; 3]).unwrap_err();
        assert!(matches!(err, Error::BufferSize { expected: 4, actual: 3 }));

        // No selection anywhere.
        let err = writer.put(&var, None, &[0f32; 4]).unwrap_err();
        assert!(matches!(err, Error::InvalidSelection { .. }));

        writer.end_step().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn unknown_variable_is_rejected() {
        let hub = StagingHub::new();
        let (mut writer, _reader) = writer_pair(&hub);

        // A handle defined on some other engine is unknown here.
        let mut other_reg = VariableRegistry::new();
        let foreign = other_reg
            .define("elsewhere", DType::F32, vec![4], None)
            .unwrap();

        writer.begin_step(StepMode::Append, Duration::ZERO).unwrap();
        let sel = Selection::new(vec![0], vec![4]).unwrap();
        let err = writer.put(&foreign, Some(sel), &[0f32; 4]).unwrap_err();
        assert!(matches!(err, Error::UnknownVariable(_)));
        writer.end_step().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn default_local_selection_applies() {
        let hub = StagingHub::new();
        let (mut writer, mut reader) = writer_pair(&hub);

        let local = Selection::new(vec![2], vec![2]).unwrap();
        let var = writer
            .define_variable("v", DType::U32, vec![8], Some(local))
            .unwrap();
        writer.begin_step(StepMode::Append, Duration::ZERO).unwrap();
        writer.put(&var, None, &[7u32, 9]).unwrap();
        writer.end_step().unwrap();
        writer.close().unwrap();

        reader
            .begin_step(StepMode::NextAvailable, Duration::from_secs(5))
            .unwrap();
        let rvar = reader.inquire_variable("v").unwrap();
        let mut out = vec![0u32; 8];
        let all = Selection::new(vec![0], vec![8]).unwrap();
        reader.get(&rvar, Some(all), &mut out).unwrap();
        assert_eq!(out, vec![0, 0, 7, 9, 0, 0, 0, 0]);
        reader.end_step().unwrap();
        reader.close().unwrap();
    }

    #[test]
    fn dropped_writer_unblocks_reader_with_end_of_stream() {
        let hub = StagingHub::new();
        let (writer, mut reader) = writer_pair(&hub);
        drop(writer);

        let status = reader
            .begin_step(StepMode::NextAvailable, Duration::from_secs(5))
            .unwrap();
        assert_eq!(status, StepStatus::EndOfStream);
    }
}
