// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Runtime provisioning: template resolution, synchronization with the
//! platform and the create/get/delete use cases built on top of them.

mod orchestrator;
mod sync;
mod template;

pub use orchestrator::RuntimeOrchestrator;
pub use sync::Synchronizer;
pub use template::resolve_template;
