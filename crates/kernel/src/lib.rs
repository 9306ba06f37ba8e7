// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! qd-kernel: the atomic job-broker kernel.
//!
//! One [`KernelState`] coordinates job lifecycles across named queues:
//! dependencies, throttles, leases and stall detection, recurring templates,
//! tag/failure indices, and the pub/sub chatter that accompanies every
//! transition. The [`Kernel`] handle provides the atomic `(command, now,
//! args…)` invocation surface.

pub mod dispatch;
pub mod failure;
pub mod job;
pub mod kernel;
pub mod patterns;
pub mod queue;
pub mod recurring;
pub mod scored;
pub mod state;
pub mod tag;
pub mod throttle;
pub mod worker;

pub use dispatch::{Command, Reply};
pub use failure::FailedPage;
pub use job::{CompleteNext, TrackedReport};
pub use kernel::{Kernel, Outcome};
pub use patterns::PriorityPattern;
pub use queue::{PutOptions, QueueCounts};
pub use recurring::{RecurOptions, RecurringUpdate};
pub use state::KernelState;
pub use tag::TaggedPage;
pub use throttle::{ThrottleSnapshot, TTL_MISSING, TTL_NONE};
pub use worker::{WorkerCounts, WorkerJobsReport};
