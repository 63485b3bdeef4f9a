// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod config;
pub mod inetstack;
pub mod runtime;

pub use self::{
    config::Config,
    inetstack::protocols::tcp::{
        peer::TcpPeer,
        table::{
            ConnectionHandle,
            MAX_TCP_CONNECTIONS,
        },
        AcceptFuture,
        ConnectFuture,
        ConnectionInfo,
        ConnectionStats,
        PopFuture,
        PushFuture,
        SeqNumber,
        State,
        TcpStats,
    },
    runtime::{
        fail::Fail,
        memory::{
            BufferPool,
            HeapBufferPool,
            NetBuffer,
        },
        network::{
            config::TcpConfig,
            IpProtocol,
            NetworkRuntime,
        },
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal; otherwise, bails out of the enclosing function with an [anyhow::Error].
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    anyhow::bail!(r#"ensure failed: `(left == right)` left: `{:?}`, right: `{:?}`"#, left_val, right_val)
                }
            }
        }
    });
    ($left:expr, $right:expr,) => ({
        $crate::ensure_eq!($left, $right)
    });
}

/// Ensures that two expressions are not equal; otherwise, bails out of the enclosing function with an [anyhow::Error].
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    anyhow::bail!(r#"ensure failed: `(left != right)` left: `{:?}`, right: `{:?}`"#, left_val, right_val)
                }
            }
        }
    });
    ($left:expr, $right:expr,) => ({
        $crate::ensure_neq!($left, $right)
    });
}
