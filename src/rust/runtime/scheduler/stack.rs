// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::fail::AllocErr;
use ::std::{
    fmt,
    sync::atomic::{
        AtomicUsize,
        Ordering,
    },
};

//==============================================================================
// Traits
//==============================================================================

/// Memory collaborator that backs task stacks.
pub trait StackAllocator: Send + Sync {
    fn alloc_stack(&self, size: usize) -> Result<Stack, AllocErr>;
    fn free_stack(&self, stack: Stack);
}

//==============================================================================
// Structures
//==============================================================================

/// Execution stack of a task.
pub struct Stack {
    memory: Box<[u8]>,
}

/// Stack allocator backed by the heap, bounded by a byte budget.
pub struct HeapStacks {
    budget: usize,
    in_use: AtomicUsize,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Stack {
    pub fn new(memory: Vec<u8>) -> Self {
        Self {
            memory: memory.into_boxed_slice(),
        }
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }
}

impl HeapStacks {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Bytes currently handed out.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    fn reserve(&self, size: usize) -> Result<(), AllocErr> {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_use| {
                in_use.checked_add(size).filter(|total| *total <= self.budget)
            })
            .map(|_| ())
            .map_err(|_| AllocErr::OutOfStackMemory)
    }

    fn unreserve(&self, size: usize) {
        self.in_use.fetch_sub(size, Ordering::AcqRel);
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl StackAllocator for HeapStacks {
    fn alloc_stack(&self, size: usize) -> Result<Stack, AllocErr> {
        if let Err(e) = self.reserve(size) {
            warn!("alloc_stack(): {} (size={}, in_use={})", e, size, self.in_use());
            return Err(e);
        }
        let mut memory: Vec<u8> = Vec::new();
        if memory.try_reserve_exact(size).is_err() {
            self.unreserve(size);
            error!("alloc_stack(): {} (size={})", AllocErr::OutOfMemory, size);
            return Err(AllocErr::OutOfMemory);
        }
        memory.resize(size, 0);
        Ok(Stack::new(memory))
    }

    fn free_stack(&self, stack: Stack) {
        self.unreserve(stack.size());
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack").field("size", &self.size()).finish()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
