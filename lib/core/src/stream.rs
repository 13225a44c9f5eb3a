// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stagecast Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared per-stream state.
//!
//! One `StreamCore` binds a writer process group and a reader process group
//! to an ordered step sequence. Writers accumulate payloads into open steps;
//! the last writer rank to end a step seals it and wakes parked readers.
//! Readers admit sealed steps (next-available or latest), retire them, and
//! park with a timeout when nothing is sealed yet. Closing the last writer
//! unblocks every parked reader with end-of-stream.
//!
//! Payloads publish only at seal, so a reader can never observe a partially
//! contributed step.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::step::{SealedStep, StepPayload, StepSeq, StepState, StepStatus};

#[derive(Debug)]
pub(crate) struct StreamCore {
    name: String,
    max_buffered_steps: usize,
    state: Mutex<StreamState>,
    step_cv: Condvar,
}

#[derive(Debug, Default)]
struct StreamState {
    writer_size: usize,
    /// Per writer rank: the sequence number its next `begin_step` targets.
    rounds: Vec<StepSeq>,
    open: BTreeMap<StepSeq, OpenStep>,
    sealed: BTreeMap<StepSeq, Arc<SealedStep>>,
    /// Per reader rank: the lowest sequence number not yet retired or passed.
    progress: Vec<StepSeq>,
    writers_closed: usize,
    closed: bool,
    highest_allocated: Option<StepSeq>,
}

#[derive(Debug, Default)]
struct OpenStep {
    payloads: Vec<StepPayload>,
    ended: usize,
}

impl StreamCore {
    pub(crate) fn new(name: &str, writer_size: usize, max_buffered_steps: usize) -> Self {
        Self {
            name: name.into(),
            max_buffered_steps,
            state: Mutex::new(StreamState {
                writer_size,
                rounds: vec![0; writer_size],
                ..StreamState::default()
            }),
            step_cv: Condvar::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Record the reader group size on first reader attach.
    pub(crate) fn attach_reader_group(&self, size: usize) {
        let mut st = self.state.lock();
        if st.progress.is_empty() {
            st.progress = vec![0; size];
        }
    }

    /// Allocate (or join) this writer rank's next step. Never blocks.
    pub(crate) fn begin_write_step(&self, rank: usize) -> StepSeq {
        let mut st = self.state.lock();
        let seq = st.rounds[rank];
        st.open.entry(seq).or_default();
        st.highest_allocated = Some(st.highest_allocated.map_or(seq, |h| h.max(seq)));
        seq
    }

    /// Record this rank's contributions and completion for `seq`. The last
    /// rank to arrive seals the step and signals readers.
    pub(crate) fn end_write_step(&self, rank: usize, seq: StepSeq, payloads: Vec<StepPayload>) {
        let mut st = self.state.lock();
        let ended = {
            let open = st
                .open
                .get_mut(&seq)
                .expect("end_write_step: step not open");
            open.payloads.extend(payloads);
            open.ended += 1;
            open.ended
        };
        st.rounds[rank] = seq + 1;

        if ended == st.writer_size {
            let open = st.open.remove(&seq).expect("open step present");
            tracing::debug!(
                stream = %self.name,
                seq,
                payloads = open.payloads.len(),
                "step sealed"
            );
            st.sealed.insert(seq, SealedStep::new(seq, open.payloads));
            self.enforce_depth(&mut st);
            self.step_cv.notify_all();
        }
    }

    fn enforce_depth(&self, st: &mut StreamState) {
        let watermark = st.progress.iter().copied().min().unwrap_or(0);
        while st.sealed.len() > self.max_buffered_steps {
            if let Some((seq, _)) = st.sealed.pop_first() {
                if seq >= watermark {
                    tracing::warn!(
                        stream = %self.name,
                        seq,
                        "buffering depth exceeded, evicting unretired step"
                    );
                } else {
                    tracing::debug!(stream = %self.name, seq, "evicted retired step");
                }
            }
        }
    }

    /// One writer rank is done with the stream. When the whole group has
    /// closed, parked readers drain the remaining sealed steps and then see
    /// end-of-stream.
    pub(crate) fn close_writer(&self) {
        let mut st = self.state.lock();
        st.writers_closed += 1;
        if st.writers_closed == st.writer_size {
            st.closed = true;
            tracing::debug!(stream = %self.name, "writer group closed");
            self.step_cv.notify_all();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Admit the next sealed step at or past `from` (or the latest one, when
    /// `latest` is set), parking up to `timeout`.
    ///
    /// A zero timeout polls. The park is condvar-based; there is no spinning.
    pub(crate) fn next_step(
        &self,
        from: StepSeq,
        latest: bool,
        timeout: Duration,
    ) -> (StepStatus, Option<Arc<SealedStep>>) {
        let deadline = Instant::now().checked_add(timeout);
        let mut st = self.state.lock();
        loop {
            let candidate = if latest {
                st.sealed.range(from..).next_back()
            } else {
                st.sealed.range(from..).next()
            };
            if let Some((&seq, step)) = candidate {
                tracing::debug!(stream = %self.name, seq, latest, "step admitted");
                return (StepStatus::Ok, Some(step.clone()));
            }
            if st.closed {
                return (StepStatus::EndOfStream, None);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return (StepStatus::NotReady, None);
                    }
                    self.step_cv.wait_until(&mut st, deadline);
                }
                // Effectively unbounded timeout.
                None => self.step_cv.wait(&mut st),
            }
        }
    }

    /// Retire reader `rank`'s admission of `seq`. Steps below every reader's
    /// progress are dropped from the sealed window.
    pub(crate) fn retire(&self, rank: usize, seq: StepSeq) {
        let mut st = self.state.lock();
        st.progress[rank] = st.progress[rank].max(seq + 1);
        let watermark = st.progress.iter().copied().min().unwrap_or(0);
        while let Some((&oldest, _)) = st.sealed.first_key_value() {
            if oldest >= watermark {
                break;
            }
            st.sealed.remove(&oldest);
            tracing::debug!(stream = %self.name, seq = oldest, "step retired");
        }
    }

    /// Lifecycle state of `seq`, if the stream has ever allocated it.
    pub(crate) fn step_state(&self, seq: StepSeq) -> Option<StepState> {
        let st = self.state.lock();
        if st.open.contains_key(&seq) {
            return Some(StepState::Open);
        }
        if st.sealed.contains_key(&seq) {
            return Some(StepState::Sealed);
        }
        match st.highest_allocated {
            Some(h) if seq <= h => Some(StepState::Retired),
            _ => None,
        }
    }
}
