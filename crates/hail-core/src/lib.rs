//! # hail-core
//!
//! The call-session coordinator: session registry, call state machine,
//! signaling router and presence broadcaster, wired together by the
//! [`Coordinator`].
//!
//! All state is held in explicitly owned, lock-guarded collections passed
//! by `Arc` to the components that need them.  Each call session is
//! linearized under its own lock; the endpoint table and the subscriber
//! sets have independent locks so a slow session never blocks registry
//! lookups or unrelated calls.

pub mod call;
pub mod coordinator;
pub mod mailbox;
pub mod presence;
pub mod registry;
pub mod router;

pub use call::{CallConfig, CallManager, CallSession};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use mailbox::PushMailbox;
pub use presence::{PresenceBroadcaster, PresenceRecord};
pub use registry::{RegisteredEndpoint, RegistryConfig, SessionRegistry};
pub use router::SignalingRouter;
