//! Asynchronous PDF rendering of resumes.
//!
//! Submissions are recorded as jobs and answered immediately; a bounded pool
//! of workers renders them in FIFO order while clients poll for status and
//! then fetch the finished file.

pub mod artifacts;
pub mod handlers;
pub mod janitor;
pub mod job;
pub mod pg_store;
pub mod poller;
pub mod renderer;
pub mod service;
pub mod source;
pub mod store;
pub mod worker;

#[cfg(test)]
pub mod testing;
