//! Error types and the policy that decides what each failure does to the pipeline.
//!
//! - `types`: one error enum per stage, all implementing [`Classified`].
//! - `policy`: the [`ErrorKind`] taxonomy, the kind → [`ErrorPolicy`] table and
//!   the retry [`Backoff`] schedule.

pub mod policy;
pub mod types;

pub use policy::{policy_for, Backoff, Classified, ErrorKind, ErrorPolicy};
