//! Live session registry
//!
//! The registry is the only place that knows who is online and which room
//! they are in. It is shared (`Arc<SessionRegistry>`) by the connection
//! supervisors, the dispatcher and the broadcast engine.
//!
//! ```text
//!                    Arc<SessionRegistry>
//!             ┌──────────────────────────────────┐
//!             │ Mutex<                           │
//!             │   by_connection: Id → Session {  │
//!             │     username, current_room,      │
//!             │     handle,                      │
//!             │   }                              │
//!             │   by_username:   name → Id       │
//!             │ >                                │
//!             └────────────────┬─────────────────┘
//!                              │ targets(room) snapshot
//!                              ▼
//!                      BroadcastEngine ──► handle.send_line()
//! ```

pub mod error;
pub mod store;

pub use error::RegistryError;
pub use store::{Session, SessionRegistry};
