//! Generic concurrency primitives shared by the worker, pool, and session
//! crates (spec §4.8, §5): a bounded mailbox, a deferred stream, a
//! multi-input merge, a cancellable task, and a keyed connection pool.
//!
//! None of these know anything about audio, jobs, or speech — they are the
//! plumbing everything above is built from, generalized from the teacher's
//! narrower, single-purpose versions of the same ideas (see each module's
//! doc comment for its grounding).

mod connpool;
mod deferred;
mod mailbox;
mod merge;
mod task;

pub use connpool::{ConnectionPool, ConnectionPoolError, PoolConfig};
pub use deferred::{DeferredError, DeferredStream};
pub use mailbox::{Mailbox, MailboxError, MailboxReceiver};
pub use merge::MergeStream;
pub use task::CancellableTask;
