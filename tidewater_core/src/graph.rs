// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Arena owning every task of a scheduler.

use alloc::boxed::Box;
use alloc::vec::Vec;

use tracing::trace;

use crate::error::SchedulerError;
use crate::model::{Payload, SeriesId};
use crate::task::{PerformArgs, Task, TaskId, TaskRoutine};

#[derive(Debug)]
struct Slot<E> {
    generation: u32,
    task: Option<Task<E>>,
}

/// Generational arena of [`Task`]s.
///
/// Disposed slots are recycled with a bumped generation, so stale [`TaskId`]s never alias a
/// newer task.
#[derive(Debug)]
pub struct TaskGraph<E> {
    slots: Vec<Slot<E>>,
    free: Vec<u32>,
}

impl<E> Default for TaskGraph<E> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<E> TaskGraph<E> {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a task.
    pub fn insert(&mut self, task: Task<E>) -> TaskId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.task = Some(task);
            TaskId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Slot {
                generation: 0,
                task: Some(task),
            });
            TaskId {
                index,
                generation: 0,
            }
        }
    }

    /// Inserts a task around `routine`.
    pub fn spawn(&mut self, routine: impl TaskRoutine<E> + 'static) -> TaskId {
        self.insert(Task::new(routine))
    }

    /// Returns the number of live tasks.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Returns whether the graph has no live tasks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether `id` refers to a live task.
    pub fn contains(&self, id: TaskId) -> bool {
        self.get(id).is_some()
    }

    /// Returns a task.
    pub fn get(&self, id: TaskId) -> Option<&Task<E>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.task.as_ref()
    }

    /// Returns a task mutably.
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task<E>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.task.as_mut()
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task<E>, SchedulerError> {
        self.get_mut(id).ok_or(SchedulerError::UnknownTask(id))
    }

    /// Removes a task and unlinks its neighbours. Unknown ids are ignored.
    pub fn dispose(&mut self, id: TaskId) {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return;
        };
        if slot.generation != id.generation {
            return;
        }
        let Some(task) = slot.task.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        if let Some(up) = task.upstream.and_then(|up| self.get_mut(up)) {
            if up.downstream == Some(id) {
                up.downstream = None;
            }
        }
        if let Some(down) = task.downstream.and_then(|down| self.get_mut(down)) {
            if down.upstream == Some(id) {
                down.upstream = None;
            }
        }
    }

    /// Links `up → down`.
    ///
    /// When the link is new, or `up` is dirty, `down` is marked dirty.
    pub fn pipe(&mut self, up: TaskId, down: TaskId) -> Result<(), SchedulerError> {
        let up_task = self.task_mut(up)?;
        if up_task.downstream == Some(down) && !up_task.is_dirty() {
            return Ok(());
        }
        let previous = up_task.downstream.replace(down);
        if let Some(prev) = previous.filter(|prev| *prev != down) {
            if let Some(prev) = self.get_mut(prev) {
                if prev.upstream == Some(up) {
                    prev.upstream = None;
                }
            }
        }
        let down_task = self.task_mut(down)?;
        let stale = down_task.upstream.replace(up).filter(|stale| *stale != up);
        if let Some(stale) = stale.and_then(|stale| self.get_mut(stale)) {
            if stale.downstream == Some(down) {
                stale.downstream = None;
            }
        }
        self.dirty(down)
    }

    /// Marks a task dirty, and its agent when it has one.
    pub fn dirty(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        let task = self.task_mut(id)?;
        task.mark_dirty();
        if let Some(agent) = task.agent {
            if let Some(agent) = self.get_mut(agent) {
                agent.mark_dirty();
            }
        }
        Ok(())
    }

    /// Performs a task and applies the side effects its routine requested.
    ///
    /// Returns whether the task has unfinished work.
    pub fn perform(
        &mut self,
        id: TaskId,
        args: &PerformArgs,
        env: &mut E,
    ) -> Result<bool, SchedulerError> {
        let upstream = self.task_mut(id)?.upstream;
        let upstream_end = upstream
            .and_then(|up| self.get(up))
            .map(Task::raw_output_due_end);

        let task = self.task_mut(id)?;
        let report = task.perform(args, upstream_end, env)?;
        let agent = task.agent;
        let downstream = task.downstream;
        trace!(
            ?id,
            due_index = task.due_index(),
            unfinished = report.unfinished,
            reset = report.reset,
            "performed task"
        );

        if report.agent_dirty {
            if let Some(agent) = agent {
                self.dirty(agent)?;
            }
        }
        if report.reset || report.downstream_dirty {
            if let Some(down) = downstream {
                self.dirty(down)?;
            }
        }
        Ok(report.unfinished)
    }

    /// Returns the upstream of a task.
    pub fn upstream(&self, id: TaskId) -> Option<TaskId> {
        self.get(id)?.upstream
    }

    /// Returns the downstream of a task.
    pub fn downstream(&self, id: TaskId) -> Option<TaskId> {
        self.get(id)?.downstream
    }

    /// Makes `id` a stub reporting to `agent`.
    pub fn set_agent(&mut self, id: TaskId, agent: Option<TaskId>) -> Result<(), SchedulerError> {
        self.task_mut(id)?.agent = agent;
        Ok(())
    }

    /// Marks a task as blocking (not steppable).
    pub fn set_block(&mut self, id: TaskId, block: bool) -> Result<(), SchedulerError> {
        self.task_mut(id)?.block = block;
        Ok(())
    }

    /// Sets the payload handed to the routine.
    pub fn set_payload(&mut self, id: TaskId, payload: Option<Payload>) -> Result<(), SchedulerError> {
        self.task_mut(id)?.payload = payload;
        Ok(())
    }

    /// Replaces the routine of a task, keeping its identity and state.
    pub fn set_routine(
        &mut self,
        id: TaskId,
        routine: Box<dyn TaskRoutine<E>>,
    ) -> Result<(), SchedulerError> {
        self.task_mut(id)?.set_routine(routine);
        Ok(())
    }

    pub(crate) fn set_pipeline_position(
        &mut self,
        id: TaskId,
        pipeline: SeriesId,
        idx: usize,
    ) -> Result<(), SchedulerError> {
        let task = self.task_mut(id)?;
        task.pipeline = Some(pipeline);
        task.idx_in_pipeline = idx;
        Ok(())
    }
}
