// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod collections;
pub mod ipc;
pub mod runtime;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    ipc::{
        Closed,
        TryRecvError,
        TrySendError,
    },
    runtime::{
        config::Config,
        fail::{
            AllocErr,
            Fail,
            FreeErr,
        },
        // `interval`, `sleep` and `sleep_until` bind to the calling task's scheduler and panic outside a task.
        scheduler::{
            interval,
            sleep,
            sleep_until,
            yield_now,
            AddressSpace,
            Cleanup,
            Executor,
            Exit,
            ExitReason,
            HeapStacks,
            JoinHandle,
            Pid,
            Process,
            ProcessImage,
            ResourceTable,
            Scheduler,
            Stack,
            StackAllocator,
            TaskInfo,
            TaskState,
            Tid,
        },
        timer::{
            with_timeout,
            Interval,
            SharedTimer,
            Sleep,
            SleepUntil,
            Ticks,
        },
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Fails the enclosing `anyhow` function if `left != right`.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        "ensure failed: `(left == right)` left: `{:?}`, right: `{:?}` at {}:{}",
                        left_val,
                        right_val,
                        file!(),
                        line!()
                    );
                }
            },
        }
    }};
}

/// Fails the enclosing `anyhow` function if `left == right`.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        "ensure failed: `(left != right)` left: `{:?}`, right: `{:?}` at {}:{}",
                        left_val,
                        right_val,
                        file!(),
                        line!()
                    );
                }
            },
        }
    }};
}
