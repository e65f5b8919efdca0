//! # hivesync-election
//!
//! Leader election over the shared store's atomic conditional set.
//!
//! At most one process instance holds the lock for a named election project
//! at a time. The holder renews the lock's TTL at half the TTL cadence; a
//! crashed holder simply stops renewing and the record lapses, at which point
//! any waiting candidate's next attempt wins. There is no coordination beyond
//! the single `SET key value NX PX ttl` arbiter.
//!
//! State machine per elector:
//!
//! ```text
//!            elect() wins                      renewal finds
//!   Idle ──────────────────► Leader ─────────► another holder
//!    ▲   elect() loses          │                    │
//!    │  ┌───────────────────┐   │ stop()             ▼
//!    │  ▼                   │   │               Candidate ◄─┐
//!    │ Candidate ───────────┘   │                    │      │ retry after
//!    │      retry after `wait`  │                    └──────┘ fixed `wait`
//!    └──────────────────────────┘
//! ```
//!
//! Every store failure is reported through the [`ElectionEvent`] channel and
//! swallowed; an elector never crashes its process.

mod elector;

pub use elector::{ElectionEvent, ElectorState, LeaderElector};
