// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stagecast Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process-group communication substrate.
//!
//! The protocol logic only sees the capability trait [`GroupComm`]: rank,
//! size, and a group-wide barrier. [`LocalWorld`] is the in-process
//! implementation used for testing — one thread per simulated process,
//! generation-counted condvar barriers, and a collective `split` that orders
//! subgroup ranks by (key, world rank) like an MPI communicator split.
//! Production transports implement the same trait elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Capability interface onto one process group.
pub trait GroupComm: Send + Sync {
    /// This process's rank within the group, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Block until every process in the group has entered the barrier.
    fn barrier(&self);
}

/// Generation-counted rendezvous barrier.
#[derive(Debug)]
struct BarrierState {
    lock: Mutex<BarrierGen>,
    cv: Condvar,
}

#[derive(Debug, Default)]
struct BarrierGen {
    arrived: usize,
    generation: u64,
}

impl BarrierState {
    fn new() -> Self {
        Self {
            lock: Mutex::new(BarrierGen::default()),
            cv: Condvar::new(),
        }
    }

    fn wait(&self, size: usize) {
        let mut state = self.lock.lock();
        state.arrived += 1;
        if state.arrived == size {
            state.arrived = 0;
            state.generation += 1;
            self.cv.notify_all();
        } else {
            let current = state.generation;
            while state.generation == current {
                self.cv.wait(&mut state);
            }
        }
    }
}

/// Shared state of an in-process world of simulated processes.
#[derive(Debug)]
struct WorldShared {
    size: usize,
    barrier: BarrierState,
    split_lock: Mutex<SplitState>,
    split_cv: Condvar,
}

/// Collective split bookkeeping. One split round is in flight at a time; a
/// completed round must fully drain before the next may begin.
#[derive(Debug, Default)]
struct SplitState {
    entries: Vec<(usize, usize, usize)>, // (color, key, world rank)
    groups: Option<HashMap<usize, Arc<SubgroupShared>>>,
    departed: usize,
}

#[derive(Debug)]
struct SubgroupShared {
    members: Vec<usize>, // world ranks, in subgroup rank order
    barrier: BarrierState,
}

/// Factory for the participant handles of an in-process world.
pub struct LocalWorld;

impl LocalWorld {
    /// Create a world of `size` participants, one handle per simulated
    /// process. Hand each handle to its own thread.
    pub fn new(size: usize) -> Vec<LocalPeer> {
        assert!(size > 0, "world must have at least one process");
        let shared = Arc::new(WorldShared {
            size,
            barrier: BarrierState::new(),
            split_lock: Mutex::new(SplitState::default()),
            split_cv: Condvar::new(),
        });
        (0..size)
            .map(|rank| LocalPeer {
                shared: shared.clone(),
                rank,
            })
            .collect()
    }
}

/// One participant's handle onto the world group.
pub struct LocalPeer {
    shared: Arc<WorldShared>,
    rank: usize,
}

impl LocalPeer {
    /// Collective split: every participant in the world must call this.
    /// Participants passing the same `color` form a subgroup; subgroup ranks
    /// are assigned by ascending (`key`, world rank).
    pub fn split(&self, color: usize, key: usize) -> LocalGroup {
        let shared = &self.shared;
        let mut st = shared.split_lock.lock();
        // Late arrivals for the next round park until the previous one drains.
        while st.groups.is_some() {
            shared.split_cv.wait(&mut st);
        }
        st.entries.push((color, key, self.rank));

        if st.entries.len() == shared.size {
            // Last arrival builds every subgroup and wakes the others.
            let mut by_color: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
            for &(c, k, r) in &st.entries {
                by_color.entry(c).or_default().push((k, r));
            }
            let groups = by_color
                .into_iter()
                .map(|(c, mut members)| {
                    members.sort_unstable();
                    let members: Vec<usize> = members.into_iter().map(|(_, r)| r).collect();
                    (
                        c,
                        Arc::new(SubgroupShared {
                            members,
                            barrier: BarrierState::new(),
                        }),
                    )
                })
                .collect();
            st.groups = Some(groups);
            shared.split_cv.notify_all();
        } else {
            // A reset cannot happen until this participant departs, so waking
            // on `groups` becoming Some is unambiguous.
            while st.groups.is_none() {
                shared.split_cv.wait(&mut st);
            }
        }

        let subgroup = st
            .groups
            .as_ref()
            .and_then(|g| g.get(&color))
            .expect("split: own color missing from computed groups")
            .clone();
        let rank = subgroup
            .members
            .iter()
            .position(|&r| r == self.rank)
            .expect("split: own rank missing from subgroup");

        // Last participant out resets the round and admits the next one.
        st.departed += 1;
        if st.departed == shared.size {
            st.entries.clear();
            st.groups = None;
            st.departed = 0;
            shared.split_cv.notify_all();
        }

        LocalGroup { subgroup, rank }
    }
}

impl GroupComm for LocalPeer {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.shared.barrier.wait(self.shared.size);
    }
}

/// A subgroup produced by [`LocalPeer::split`].
pub struct LocalGroup {
    subgroup: Arc<SubgroupShared>,
    rank: usize,
}

impl GroupComm for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.subgroup.members.len()
    }

    fn barrier(&self) {
        self.subgroup.barrier.wait(self.subgroup.members.len());
    }
}
