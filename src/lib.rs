// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Serverless runtime provisioning on top of OpenNebula.
//!
//! This package re-exports the workspace crates under one roof; the
//! `pe-daemon` binary is the deployable artifact.

pub use pe_client as client;
pub use pe_config as config;
pub use pe_core as core;
pub use pe_daemon as daemon;
pub use pe_error as error;
pub use pe_platform as platform;
pub use pe_runtime as runtime;
pub use pe_store as store;
