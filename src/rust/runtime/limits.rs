// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Number of cores (executors) when the configuration does not say otherwise.
pub const DEFAULT_CORES: usize = 1;

/// Upper bound on the number of cores a scheduler drives.
pub const MAX_CORES: usize = 64;

/// Size of a task stack: ten 4 KiB pages.
pub const DEFAULT_STACK_SIZE: usize = 10 * 0x1000;

/// Total bytes the default stack allocator hands out before failing.
pub const DEFAULT_STACK_BUDGET: usize = 256 * 1024 * 1024;

/// Maximum number of live tasks in one scheduler.
pub const DEFAULT_MAX_TASKS: usize = 4096;

/// Capacity of a byte pipe, in bytes.
pub const DEFAULT_PIPE_CAPACITY: usize = 0x1000;
