//! Nested interrupt delivery.
//!
//! The dispatcher owns a static priority table (one level per source), a
//! pending slot per level, and a bounded stack of previous "current
//! priority" values. `raise` runs handlers in priority order; because a
//! handler may call `raise` again, a strictly-more-urgent source preempts
//! the running handler exactly as re-enabled hardware interrupts would,
//! while less-urgent sources are parked in their pending slot and drained
//! once the handler chain unwinds.

use kcore::sync::Arc;

/// Registered handler for one interrupt source.
///
/// Handlers run with delivery re-armed: they may raise further interrupts
/// through the dispatcher they are handed.
pub type IrqHandler = Arc<dyn Fn(&mut IrqDispatcher, u32) + Send + Sync>;

/// Bounded stack of priority levels.
///
/// Capacity equals the level count; nesting deeper than that would mean
/// the LIFO restore discipline was already broken, so overflow is fatal.
pub struct PriorityStack {
    slots: Vec<usize>,
    top: usize,
}

impl PriorityStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![0; capacity],
            top: 0,
        }
    }

    pub fn push(&mut self, level: usize) {
        assert!(self.top < self.slots.len(), "priority stack overflow");
        self.slots[self.top] = level;
        self.top += 1;
    }

    pub fn pop(&mut self) -> usize {
        assert!(self.top > 0, "priority stack underflow");
        self.top -= 1;
        self.slots[self.top]
    }

    pub fn depth(&self) -> usize {
        self.top
    }

    pub fn is_empty(&self) -> bool {
        self.top == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Pending {
    waiting: bool,
    source: u32,
}

/// Priority-ceiling interrupt dispatcher.
pub struct IrqDispatcher {
    levels: usize,
    priorities: Vec<usize>,
    handlers: Vec<Option<IrqHandler>>,
    pending: Vec<Pending>,
    /// Current priority; `levels` means no interrupt active.
    current: usize,
    restore: PriorityStack,
    dispatched: u64,
}

impl IrqDispatcher {
    /// Creates a dispatcher for `priorities.len()` sources.
    ///
    /// `priorities[irq]` is the static level of that source and must be
    /// below `levels` (configuration error otherwise, caught here).
    pub fn new(levels: usize, priorities: &[usize]) -> Self {
        assert!(levels > 0, "dispatcher needs at least one priority level");
        for (irq, prio) in priorities.iter().enumerate() {
            assert!(
                *prio < levels,
                "interrupt {irq} assigned level {prio}, valid range 0..{levels}"
            );
        }
        let sources = priorities.len();
        Self {
            levels,
            priorities: priorities.to_vec(),
            handlers: vec![None; sources],
            pending: vec![Pending::default(); levels],
            current: levels,
            restore: PriorityStack::new(levels),
            dispatched: 0,
        }
    }

    pub fn source_count(&self) -> usize {
        self.priorities.len()
    }

    pub fn level_count(&self) -> usize {
        self.levels
    }

    /// Level of the handler currently executing, or None when idle.
    pub fn current_level(&self) -> Option<usize> {
        (self.current < self.levels).then_some(self.current)
    }

    /// Static priority of a source.
    pub fn source_level(&self, irq: u32) -> usize {
        self.priorities[irq as usize]
    }

    /// Handlers invoked since construction (diagnostics).
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Registers a handler, returning the previous one.
    ///
    /// # Panics
    ///
    /// An out-of-range source is a configuration error caught at init
    /// time, not a runtime condition.
    pub fn register_handler(&mut self, irq: u32, handler: IrqHandler) -> Option<IrqHandler> {
        let index = irq as usize;
        if index >= self.handlers.len() {
            log::error!("interrupt {irq} can't be used");
            panic!("interrupt {irq} out of range 0..{}", self.handlers.len());
        }
        self.handlers[index].replace(handler)
    }

    /// Removes the handler for a source, returning it.
    pub fn unregister_handler(&mut self, irq: u32) -> Option<IrqHandler> {
        let index = irq as usize;
        assert!(index < self.handlers.len(), "interrupt {irq} out of range");
        self.handlers[index].take()
    }

    /// Delivers an interrupt.
    ///
    /// Marks the source pending at its static level, then runs every
    /// pending level strictly more urgent than the current priority, most
    /// urgent first. Each handler executes with the dispatcher set to its
    /// level and may itself raise: a strictly-more-urgent nested source
    /// runs to completion before the handler resumes (re-entering here),
    /// anything else waits in its pending slot. On return the previous
    /// priority is restored from the stack, strict LIFO.
    ///
    /// # Panics
    ///
    /// An unregistered or out-of-range source is fatal; the configuration
    /// is broken and the system state can no longer be trusted.
    pub fn raise(&mut self, irq: u32) {
        let index = irq as usize;
        if index >= self.handlers.len() || self.handlers[index].is_none() {
            log::error!("unregistered interrupt: {irq}");
            panic!("unregistered interrupt {irq}");
        }

        let prio = self.priorities[index];
        self.pending[prio] = Pending {
            waiting: true,
            source: irq,
        };

        let mut i = prio;
        while i < self.levels && i < self.current {
            self.pending[i].waiting = false;
            let source = self.pending[i].source;

            self.restore.push(self.current);
            self.current = i;
            self.dispatched += 1;
            log::trace!("irq {source} dispatched at level {i}");

            let handler = self.handlers[source as usize]
                .clone()
                .expect("handler unregistered while pending");
            handler(self, source);

            self.current = self.restore.pop();

            // Fall through empty levels to the next pending one still more
            // urgent than the restored priority.
            while i < self.levels && i < self.current && !self.pending[i].waiting {
                i += 1;
            }
        }
    }
}
