// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker fabric: namespaced handle registries and supervision with
//! per-child restart budgets and blast-radius domains.
//!
//! Every live sensor and room is one tokio task with its own mailbox. The
//! registry maps stable logical names to handles; supervisors restart
//! crashed workers within a budget and escalate past it.

pub mod registry;
pub mod supervisor;

pub use registry::{MailboxProbe, Registry};
pub use supervisor::{ChildSpec, Domain, RestartBudget, RestartPolicy};
