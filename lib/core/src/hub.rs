// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stagecast Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stream rendezvous.
//!
//! The hub maps stream names to shared stream state for one deployment of
//! the engine. Writers create or join a stream; readers park until a writer
//! has opened it, bounded by the configured open timeout. A stream is
//! dropped from the hub once both sides have opened and later fully closed,
//! which frees the name for reuse.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::stream::StreamCore;

/// Name -> stream state rendezvous point, shared by every engine handle of a
/// deployment.
pub struct StagingHub {
    lock: Mutex<HashMap<String, StreamEntry>>,
    cv: Condvar,
}

struct StreamEntry {
    core: Arc<StreamCore>,
    writers_active: usize,
    readers_active: usize,
    readers_seen: bool,
}

impl StagingHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
        })
    }

    /// Create the stream on first writer open; join it on subsequent ones.
    pub(crate) fn open_write(
        &self,
        name: &str,
        writer_size: usize,
        max_buffered_steps: usize,
    ) -> Arc<StreamCore> {
        let mut streams = self.lock.lock();
        let entry = streams.entry(name.into()).or_insert_with(|| {
            tracing::debug!(stream = name, writer_size, "stream created");
            StreamEntry {
                core: Arc::new(StreamCore::new(name, writer_size, max_buffered_steps)),
                writers_active: 0,
                readers_active: 0,
                readers_seen: false,
            }
        });
        entry.writers_active += 1;
        let core = entry.core.clone();
        self.cv.notify_all();
        core
    }

    /// Join a stream as a reader, parking up to `timeout` for a writer to
    /// open it first.
    pub(crate) fn open_read(
        &self,
        name: &str,
        reader_size: usize,
        timeout: Duration,
    ) -> Result<Arc<StreamCore>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut streams = self.lock.lock();
        loop {
            if let Some(entry) = streams.get_mut(name) {
                entry.readers_active += 1;
                entry.readers_seen = true;
                let core = entry.core.clone();
                core.attach_reader_group(reader_size);
                return Ok(core);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(Error::StreamUnavailable(name.into()));
                    }
                    self.cv.wait_until(&mut streams, deadline);
                }
                None => self.cv.wait(&mut streams),
            }
        }
    }

    pub(crate) fn close_write(&self, name: &str) {
        let mut streams = self.lock.lock();
        if let Some(entry) = streams.get_mut(name) {
            entry.writers_active = entry.writers_active.saturating_sub(1);
            Self::maybe_remove(&mut streams, name);
        }
    }

    pub(crate) fn close_read(&self, name: &str) {
        let mut streams = self.lock.lock();
        if let Some(entry) = streams.get_mut(name) {
            entry.readers_active = entry.readers_active.saturating_sub(1);
            Self::maybe_remove(&mut streams, name);
        }
    }

    /// Drop the stream once both sides have come and gone. A stream whose
    /// writers closed but that no reader has visited yet stays available, so
    /// a late reader can still drain its sealed steps.
    fn maybe_remove(streams: &mut HashMap<String, StreamEntry>, name: &str) {
        let remove = streams
            .get(name)
            .is_some_and(|e| e.writers_active == 0 && e.readers_active == 0 && e.readers_seen);
        if remove {
            streams.remove(name);
            tracing::debug!(stream = name, "stream destroyed");
        }
    }
}
