//! FIFO task pacing for time-spaced command sequences.
//!
//! This crate exposes the pieces callers compose to serialize "do this now"
//! and "wait this long" instructions without manual timer bookkeeping:
//! * [`Scheduler`] – ordered lanes of RUN/WAIT tasks with start/stop/clear control.
//! * [`Pacer`] – shared handle that drives the drain loop without holding a
//!   lock across a callback, so tasks may re-enter the queue.
//! * [`Clock`] – injected millisecond time source ([`SystemClock`] for real
//!   time, [`ManualClock`] for deterministic tests).

mod clock;
mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use scheduler::{Pacer, RunFn, Scheduler, Task, DEFAULT_LANE};
