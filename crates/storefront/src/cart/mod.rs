//! Cart reconciliation.
//!
//! [`CartEngine`] owns a session's cart and reconciles it between the local
//! slot and the remote store. [`backfill_carts`] is the maintenance job that
//! makes sure signed-in users have a remote document to sync against.

mod backfill;
mod engine;
mod notice;

pub use backfill::{BackfillReport, backfill_carts};
pub use engine::{CartEngine, CartPhase, CartSnapshot, LoadOutcome};
pub use notice::{CartNotice, NoticeInbox};
