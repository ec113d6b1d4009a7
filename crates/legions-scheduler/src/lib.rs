//! # Legions Scheduler
//!
//! Follow-up scheduling and the rate-governed send loop.
//!
//! ## Architecture
//! ```text
//! legions run (cron)
//!   ├── RunLease (one run at a time)
//!   ├── pipeline::run
//!   │     ├── eligibility::evaluate  (history + suppression → next action)
//!   │     ├── gate::plan             (daily cap, business hours, ordering)
//!   │     └── SendExecutor           (content → transport → send log)
//!   ├── OutreachDb / JsonSendLog     (state between runs)
//!   └── Notification → dispatch      (Telegram, webhook)
//! ```
//!
//! Stage is never stored: it is replayed from each lead's send events on
//! every run, so a run that crashes half-way leaves nothing to repair.

pub mod dispatch;
pub mod eligibility;
pub mod executor;
pub mod gate;
pub mod lease;
pub mod notify;
pub mod persistence;
pub mod pipeline;
pub mod roster;
pub mod store;
pub mod summary;

pub use eligibility::{Decision, HoldReason};
pub use executor::{Pacing, SendExecutor};
pub use gate::{Candidate, SendPlan, WindowCheck};
pub use lease::RunLease;
pub use notify::{Notification, NotifyPriority};
pub use persistence::{OutreachDb, RunRecord};
pub use pipeline::{Collaborators, RunOptions};
pub use store::JsonSendLog;
pub use summary::{DispatchError, RunSummary};
