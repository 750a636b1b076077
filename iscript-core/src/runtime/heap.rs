//! Generational mark/sweep heap
//!
//! Objects live in a slab of slots recycled through a free list. Each slot
//! carries its generation and a mark bit. New objects start in generation 0.
//!
//! Marking is always complete: every object reachable from the roots is
//! marked, whatever its generation. The sweep is partial: collecting
//! generation `g` only frees unmarked objects of generation `<= g`, and
//! promotes the marked ones one generation up. Unreachable objects that
//! were already promoted are therefore reclaimed by the next collection of
//! their generation.

use super::object::Object;
use super::value::{ContextId, ObjRef, Value};
use iscript_log::{debug, Logger};
use serde::Serialize;
use std::sync::Arc;

/// Result of one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectStats {
    pub generation: u8,
    pub freed: usize,
    pub promoted: usize,
    pub live: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub live: usize,
    /// Live objects per generation, youngest first
    pub per_generation: Vec<usize>,
    pub slots: usize,
    pub collections: u64,
}

#[derive(Debug)]
struct Slot {
    object: Option<Object>,
    generation: u8,
    marked: bool,
}

pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    generations: u8,
    collections: u64,
    logger: Arc<Logger>,
}

impl Heap {
    pub fn new(generations: u8) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            generations: generations.max(1),
            collections: 0,
            logger: Logger::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn generations(&self) -> u8 {
        self.generations
    }

    pub fn alloc(&mut self, object: Object) -> ObjRef {
        let slot = Slot {
            object: Some(object),
            generation: 0,
            marked: false,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = slot;
                ObjRef(index)
            }
            None => {
                self.slots.push(slot);
                ObjRef(self.slots.len() as u32 - 1)
            }
        }
    }

    pub fn get(&self, r: ObjRef) -> Option<&Object> {
        self.slots.get(r.index()).and_then(|s| s.object.as_ref())
    }

    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut Object> {
        self.slots.get_mut(r.index()).and_then(|s| s.object.as_mut())
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        self.get(r).is_some()
    }

    pub fn generation_of(&self, r: ObjRef) -> Option<u8> {
        self.slots
            .get(r.index())
            .filter(|s| s.object.is_some())
            .map(|s| s.generation)
    }

    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Collections run so far, of any generation
    pub fn collections(&self) -> u64 {
        self.collections
    }

    pub fn stats(&self) -> HeapStats {
        let mut per_generation = vec![0; self.generations as usize];
        for slot in self.slots.iter().filter(|s| s.object.is_some()) {
            per_generation[slot.generation as usize] += 1;
        }
        HeapStats {
            live: self.live(),
            per_generation,
            slots: self.slots.len(),
            collections: self.collections,
        }
    }

    /// Marks everything reachable from `roots`, sweeps generation
    /// `generation` and younger, and returns the contexts of swept
    /// instance objects so the caller can unload them.
    ///
    /// `expand` is called once per context reached through an instance
    /// object or a function reference and must push that context's roots.
    pub fn collect<F>(
        &mut self,
        generation: u8,
        roots: Vec<Value>,
        expand: F,
    ) -> (CollectStats, Vec<ContextId>)
    where
        F: FnMut(ContextId, &mut Vec<Value>),
    {
        let generation = generation.min(self.generations - 1);
        for slot in &mut self.slots {
            slot.marked = false;
        }
        self.mark(roots, expand);
        let result = self.sweep(generation);
        self.collections += 1;
        debug!(
            self.logger,
            "gen{} collection: freed {}, promoted {}, live {}",
            generation,
            result.0.freed,
            result.0.promoted,
            result.0.live
        );
        result
    }

    fn mark<F>(&mut self, mut pending: Vec<Value>, mut expand: F)
    where
        F: FnMut(ContextId, &mut Vec<Value>),
    {
        let mut children = Vec::new();
        while let Some(value) = pending.pop() {
            let r = match value {
                Value::Object(r) => r,
                Value::Function(function) => {
                    expand(function.context, &mut pending);
                    continue;
                }
                _ => continue,
            };
            let Some(slot) = self.slots.get_mut(r.index()) else {
                continue;
            };
            if slot.marked || slot.object.is_none() {
                continue;
            }
            slot.marked = true;

            match &slot.object {
                Some(Object::Instance(context)) => expand(*context, &mut pending),
                Some(object) => object.trace(&mut children),
                None => {}
            }
            pending.append(&mut children);
        }
    }

    fn sweep(&mut self, generation: u8) -> (CollectStats, Vec<ContextId>) {
        let oldest = self.generations - 1;
        let mut stats = CollectStats {
            generation,
            ..CollectStats::default()
        };
        let mut instances = Vec::new();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_none() || slot.generation > generation {
                continue;
            }
            if slot.marked {
                if slot.generation < oldest {
                    slot.generation += 1;
                    stats.promoted += 1;
                }
            } else {
                if let Some(Object::Instance(context)) = slot.object.take() {
                    instances.push(context);
                }
                self.free.push(index as u32);
                stats.freed += 1;
            }
        }
        stats.live = self.live();
        (stats, instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::FunctionRef;

    fn string(heap: &mut Heap, text: &str) -> ObjRef {
        heap.alloc(Object::String(text.into()))
    }

    fn no_contexts(_: ContextId, _: &mut Vec<Value>) {}

    #[test]
    fn test_unreachable_objects_freed() {
        let mut heap = Heap::new(3);
        let kept = string(&mut heap, "kept");
        let dropped = string(&mut heap, "dropped");

        let (stats, _) = heap.collect(0, vec![Value::Object(kept)], no_contexts);
        assert_eq!(stats.freed, 1);
        assert!(heap.contains(kept));
        assert!(!heap.contains(dropped));
    }

    #[test]
    fn test_free_slots_reused() {
        let mut heap = Heap::new(3);
        let a = string(&mut heap, "a");
        heap.collect(0, Vec::new(), no_contexts);
        let b = string(&mut heap, "b");
        assert_eq!(a, b);
        assert_eq!(heap.live(), 1);
    }

    #[test]
    fn test_survivors_promoted_up_to_oldest() {
        let mut heap = Heap::new(3);
        let r = string(&mut heap, "x");
        let roots = || vec![Value::Object(r)];

        heap.collect(0, roots(), no_contexts);
        assert_eq!(heap.generation_of(r), Some(1));
        // generation 1 is untouched by a generation-0 collection
        heap.collect(0, roots(), no_contexts);
        assert_eq!(heap.generation_of(r), Some(1));
        heap.collect(1, roots(), no_contexts);
        heap.collect(2, roots(), no_contexts);
        heap.collect(2, roots(), no_contexts);
        assert_eq!(heap.generation_of(r), Some(2));
    }

    #[test]
    fn test_old_garbage_waits_for_its_generation() {
        let mut heap = Heap::new(3);
        let r = string(&mut heap, "old");
        heap.collect(0, vec![Value::Object(r)], no_contexts);

        let (stats, _) = heap.collect(0, Vec::new(), no_contexts);
        assert_eq!(stats.freed, 0);
        let (stats, _) = heap.collect(1, Vec::new(), no_contexts);
        assert_eq!(stats.freed, 1);
    }

    #[test]
    fn test_cycles_collected() {
        let mut heap = Heap::new(3);
        let a = heap.alloc(Object::List(Vec::new()));
        let b = heap.alloc(Object::List(vec![Value::Object(a)]));
        if let Some(Object::List(items)) = heap.get_mut(a) {
            items.push(Value::Object(b));
        }

        let (stats, _) = heap.collect(0, vec![Value::Object(a)], no_contexts);
        assert_eq!(stats.freed, 0);
        let (stats, _) = heap.collect(2, Vec::new(), no_contexts);
        assert_eq!(stats.freed, 2);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn test_instances_reported_and_expanded() {
        let mut heap = Heap::new(2);
        let held = string(&mut heap, "held by context");
        let instance = heap.alloc(Object::Instance(ContextId(7)));
        let orphan = heap.alloc(Object::Instance(ContextId(8)));

        let mut expanded = Vec::new();
        let (stats, swept) = heap.collect(
            0,
            vec![Value::Object(instance)],
            |context, pending| {
                expanded.push(context);
                if context == ContextId(7) {
                    pending.push(Value::Object(held));
                }
            },
        );
        assert_eq!(expanded, vec![ContextId(7)]);
        assert_eq!(swept, vec![ContextId(8)]);
        assert_eq!(stats.freed, 1);
        assert!(heap.contains(held));
        assert!(!heap.contains(orphan));
    }

    #[test]
    fn test_function_refs_expand_their_context() {
        let mut heap = Heap::new(1);
        let mut seen = Vec::new();
        heap.collect(
            0,
            vec![Value::Function(FunctionRef {
                context: ContextId(3),
                index: 0,
            })],
            |context, _| seen.push(context),
        );
        assert_eq!(seen, vec![ContextId(3)]);
    }

    #[test]
    fn test_stats_by_generation() {
        let mut heap = Heap::new(3);
        let a = string(&mut heap, "a");
        string(&mut heap, "b");
        heap.collect(0, vec![Value::Object(a)], no_contexts);
        string(&mut heap, "c");
        let stats = heap.stats();
        assert_eq!(stats.live, 2);
        assert_eq!(stats.per_generation, vec![1, 1, 0]);
        assert_eq!(stats.collections, 1);
    }
}
