mod config;
mod coordinator;
mod diagram;
mod error;
mod store;

#[cfg(feature = "client")]
mod client;
#[cfg(feature = "http")]
pub mod http;

pub use config::ServerConfig;
pub use coordinator::{
    DiagramCache, DiagramSource, KeyedQueue, MutationCoordinator, OwnerIndex, QueueSlot,
    ReadTicket,
};
pub use diagram::{
    entity_id, is_touch_only, merge_patch, normalize_payload, now_timestamp, parse_payload,
    Diagram, DiagramMeta, EntityKind, Payload,
};
pub use error::StoreError;
pub use store::{DiagramStore, VersionAction, VersionSummary};

#[cfg(feature = "client")]
pub use client::HttpDiagramClient;
