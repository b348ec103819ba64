//! # Pulseboard report caching
//!
//! Derived analytics reports (sentiment and heat scores) are expensive to
//! recompute but have to be served with low latency to many concurrent
//! readers. This module implements the stale-while-revalidate cache that
//! makes that possible, and contains an explanation of how it all fits
//! together.
//!
//! ## Read path
//!
//! A read goes through [`ReportStore::get`], which is a single round-trip to
//! the backing key-value store. The stored payload's age is classified
//! against the [`CachePolicy`] windows on every read:
//!
//! - `fresh`: age is within the freshness window, the report is returned
//!   as-is.
//! - `stale`: age is past the freshness window but within the stale window.
//!   The report is still returned, and the caller is expected to trigger a
//!   background refresh.
//! - `miss`: the entry is absent, undecodable, or too old to serve. The
//!   caller gets a synthesized `building` placeholder so it always has a
//!   well-formed shape to render.
//!
//! Classification is never stored. It is a pure function of `generated_at`,
//! the policy, and the current time (see [`classify`]), so policy changes
//! take effect immediately and no invalidation sweep exists anywhere.
//!
//! ## Refresh path
//!
//! The [`RefreshOrchestrator`] enforces the single-flight contract: at most
//! one in-flight recomputation per key, across every process sharing the
//! backing store. `trigger_refresh` takes an atomic try-lock in the store
//! (set-if-absent with a TTL) and only on success spawns a build task onto a
//! bounded worker pool. Concurrent triggers for the same hot key lose the
//! lock race and return immediately; this is the expected common case, not
//! an error.
//!
//! Builds run entirely off the request path. A finished build stamps
//! `generated_at` and persists through [`ReportStore::set`] with a storage
//! TTL of freshness window plus stale window, so the store self-evicts an
//! entry exactly when classification would call it a miss anyway. A failed
//! build persists nothing and leaves the previous (possibly stale) entry in
//! place; the lock is released either way. The lock TTL is the backstop for
//! a worker that dies without releasing: the key becomes refreshable again
//! after at most [`CachePolicy::lock_duration`].
//!
//! There is no retry inside the orchestrator. The next reader that observes
//! a stale or missing entry triggers the next attempt, so retry cadence is
//! governed by read traffic.
//!
//! ## In-process coalescing
//!
//! [`SingleFlight`] is a smaller, self-contained companion: an in-memory
//! memoizer that deduplicates concurrent invocations of an async computation
//! per key. It is independent of the store-backed cache and useful wherever
//! many tasks would otherwise race to compute the same short-lived value.

mod freshness;
mod refresh;
mod singleflight;
mod store;
#[cfg(test)]
mod tests;

pub use crate::config::CachePolicy;
pub use freshness::{classify, effective_fresh_window};
pub use refresh::RefreshOrchestrator;
pub use singleflight::SingleFlight;
pub use store::ReportStore;
