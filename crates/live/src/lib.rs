//! Live, per-session reconstruction.
//!
//! A [`SessionRegistry`] owns one [`LiveSession`] per session id. Each session
//! de-duplicates inbound events in its [`SessionCache`], keeps the turn list
//! current incrementally, tracks the [`Viewport`] and publishes immutable
//! [`SessionSnapshot`]s on a watch channel.

pub mod cache;
pub mod error;
pub mod registry;
pub mod session;
pub mod transport;
pub mod viewport;

pub use cache::{CacheChange, SessionCache};
pub use error::LiveError;
pub use registry::SessionRegistry;
pub use session::{
    BackfillStatus, BackfillTicket, Connectivity, LiveSession, SessionOptions, SessionSnapshot,
};
pub use transport::{
    apply_inbound, fetch_backfill, inbound_channel, load_earlier, pump_inbound, BackfillCursor,
    BackfillRequest, BackfillSource, InboundMessage, TransportError,
};
pub use viewport::{Navigation, ScrollAction, Viewport, ViewportInput, ViewportState};
