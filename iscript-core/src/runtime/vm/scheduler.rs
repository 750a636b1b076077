//! Cooperative time slicing across loaded contexts

use super::execution::{Budget, Outcome};
use super::{ContextSlot, Vm};
use crate::compiler::instruction::REG_RETURN;
use crate::runtime::context::ExecutionContext;
use crate::runtime::error::RuntimeError;
use crate::runtime::value::ContextId;
use iscript_log::{debug, trace};
use serde::Serialize;
use std::time::{Duration, Instant};

/// What one or more scheduler rounds did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub instructions: u64,
    /// Contexts given a slice
    pub contexts: usize,
    /// Contexts left idle at the end of their slice
    pub completed: usize,
    /// Contexts with frames left when their slice ran out
    pub suspended: usize,
    /// Contexts terminated by a runtime error
    pub errors: usize,
    pub collections: u64,
}

impl RunStats {
    pub fn merge(&mut self, other: RunStats) {
        self.instructions += other.instructions;
        self.contexts += other.contexts;
        self.completed += other.completed;
        self.suspended += other.suspended;
        self.errors += other.errors;
        self.collections += other.collections;
    }
}

enum SliceEnd {
    Idle,
    Suspended,
}

impl Vm {
    /// Gives every runnable context a share of `timeslice`. Each share is
    /// also capped at `slice_instructions` instructions.
    pub fn run(&mut self, timeslice: Duration) -> RunStats {
        self.run_round(Some(timeslice))
    }

    /// Runs rounds without a time limit until no context has work left or
    /// `max_rounds` rounds have run
    pub fn run_until_idle(&mut self, max_rounds: usize) -> RunStats {
        let mut total = RunStats::default();
        for _ in 0..max_rounds {
            let round = self.run_round(None);
            if round.contexts == 0 {
                break;
            }
            total.merge(round);
        }
        total
    }

    /// Some loaded context has frames or queued events
    pub fn has_work(&self) -> bool {
        self.contexts
            .iter()
            .any(|slot| matches!(slot, ContextSlot::Loaded(ctx) if ctx.is_runnable()))
    }

    fn run_round(&mut self, timeslice: Option<Duration>) -> RunStats {
        let _span = self.logger.enter_span("run");
        let runnable: Vec<ContextId> = self
            .contexts
            .iter()
            .filter_map(|slot| match slot {
                ContextSlot::Loaded(ctx) if ctx.is_runnable() => Some(ctx.id),
                _ => None,
            })
            .collect();

        let mut stats = RunStats {
            contexts: runnable.len(),
            ..RunStats::default()
        };
        if runnable.is_empty() {
            return stats;
        }

        let share = timeslice.map(|t| t / runnable.len() as u32);
        let ticks = self.ticks;
        let collections = self.heap.collections();

        for id in runnable {
            let Ok(mut ctx) = self.take_context(id, "run") else {
                continue;
            };
            let deadline = share.map(|share| Instant::now() + share);
            let mut budget = Budget::new(
                self.config.slice_instructions,
                deadline,
                self.config.time_check_interval,
            );
            match self.run_slice(&mut ctx, &mut budget) {
                Ok(SliceEnd::Idle) => {
                    ctx.settle();
                    stats.completed += 1;
                }
                Ok(SliceEnd::Suspended) => {
                    ctx.settle();
                    stats.suspended += 1;
                }
                Err(err) => {
                    self.fail(&mut ctx, err);
                    stats.errors += 1;
                }
            }
            trace!(self.logger, "{} slice ended {:?}", id, ctx.status);
            self.put_context(ctx);
        }

        stats.instructions = self.ticks - ticks;
        stats.collections = self.heap.collections() - collections;
        debug!(
            self.logger,
            "round: {} contexts, {} instructions, {} suspended, {} errors",
            stats.contexts,
            stats.instructions,
            stats.suspended,
            stats.errors
        );
        stats
    }

    /// Runs `ctx` until it has no frames and no queued events, or the budget
    /// runs out. Queued events start once the frames are done.
    fn run_slice(
        &mut self,
        ctx: &mut ExecutionContext,
        budget: &mut Budget,
    ) -> Result<SliceEnd, RuntimeError> {
        loop {
            if ctx.frames.is_empty() {
                let Some(event) = ctx.events.pop_front() else {
                    return Ok(SliceEnd::Idle);
                };
                match ctx.event_handler(&event.name) {
                    Some(index) => {
                        debug!(self.logger, "{} dispatching event '{}'", ctx.id, event.name);
                        self.enter(ctx, index, event.args, REG_RETURN as usize)?;
                    }
                    None => debug!(self.logger, "{} has no handler for '{}'", ctx.id, event.name),
                }
                continue;
            }
            if let Outcome::OutOfBudget = self.execute(ctx, 0, Some(&mut *budget))? {
                return Ok(SliceEnd::Suspended);
            }
        }
    }
}
