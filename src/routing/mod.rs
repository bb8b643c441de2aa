//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → table.rs (ordered prefix rules, first match wins)
//!     → Return: matched RouteRule (service, auth policy, rate class) or NoMatch
//!
//! Table Compilation (at startup):
//!     RouteConfig[]
//!     → parse method filters
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Table compiled at startup, immutable at runtime
//! - No regex in the hot path (prefix matching only)
//! - First match wins, so specific rules are listed before catch-alls

pub mod table;

pub use table::{RateClass, RouteAuth, RouteRule, RouteTable};
