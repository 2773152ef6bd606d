//! Per-worker scratch memory.
//!
//! Processors that need temporary buffers borrow a [`Workspace`] through
//! their [`ProcessContext`](crate::ProcessContext). The pool holds one
//! workspace per planner worker plus one for the calling thread, and is
//! owned by its simulation.

use parking_lot::{Mutex, MutexGuard};

/// Reusable temporary buffers.
#[derive(Debug, Default)]
pub struct Workspace {
    buffers: Vec<Vec<f32>>,
}

impl Workspace {
    /// Zeroed buffer `index` of `len` samples. Grows on first use and keeps
    /// its allocation afterwards.
    pub fn buffer(&mut self, index: usize, len: usize) -> &mut [f32] {
        if self.buffers.len() <= index {
            self.buffers.resize_with(index + 1, Vec::new);
        }
        let buf = &mut self.buffers[index];
        buf.clear();
        buf.resize(len, 0.0);
        buf
    }

    /// `count` zeroed buffers of `len` samples.
    pub fn buffers(&mut self, count: usize, len: usize) -> &mut [Vec<f32>] {
        if self.buffers.len() < count {
            self.buffers.resize_with(count, Vec::new);
        }
        for buf in &mut self.buffers[..count] {
            buf.clear();
            buf.resize(len, 0.0);
        }
        &mut self.buffers[..count]
    }
}

/// One [`Workspace`] per thread that may run jobs.
#[derive(Debug)]
pub struct ScratchPool {
    slots: Vec<Mutex<Workspace>>,
}

impl ScratchPool {
    /// Pool sized for `threads` workers plus the caller.
    pub fn new(threads: usize) -> Self {
        let mut pool = Self { slots: Vec::new() };
        pool.ensure(threads);
        pool
    }

    /// Grows the pool to cover `threads` workers.
    pub fn ensure(&mut self, threads: usize) {
        let wanted = threads + 1;
        if self.slots.len() < wanted {
            self.slots.resize_with(wanted, Mutex::default);
        }
    }

    /// Number of workspaces.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pool is empty. Never true after construction.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Locks the current thread's workspace.
    ///
    /// Slot 0 belongs to threads outside the worker pool; worker `i` uses
    /// slot `i + 1`.
    pub fn acquire(&self) -> MutexGuard<'_, Workspace> {
        let index = rayon::current_thread_index().map_or(0, |i| i + 1);
        self.slots[index % self.slots.len()].lock()
    }
}
