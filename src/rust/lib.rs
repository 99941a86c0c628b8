// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod runtime;

pub mod taskmesh;

pub use crate::{
    runtime::{
        fail::Fail,
        network::GlobalAddress,
        scheduler::{
            HandlerContext,
            TaskContext,
        },
        sync::SharedFullEmpty,
        tasks::{
            steal_queue::WireCopy,
            Task,
        },
        types::CoreId,
    },
    taskmesh::{
        cluster::{
            Cluster,
            CoreReport,
            RunReport,
        },
        config::Config,
        delegate,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equivalent or bails out with an error.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    anyhow::bail!(r#"ensure failed: `(left == right)`
  left: `{:?}`,
 right: `{:?}`"#, left_val, right_val)
                }
            }
        }
    });
}

/// Ensures that two expressions are not equivalent or bails out with an error.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    anyhow::bail!(r#"ensure failed: `(left != right)`
  left: `{:?}`,
 right: `{:?}`"#, left_val, right_val)
                }
            }
        }
    });
}
