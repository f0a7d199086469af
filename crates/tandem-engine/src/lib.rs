//! tandem-engine — event-driven role transitions for a replicated
//! application (one master, an optional slave) across a fleet of nodes.
//!
//! Every node receives every event and independently decides, from the
//! shared site records and the event payload, which part of the transition
//! it plays.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher
//!   ├── EventLedger (skip already-handled IDs)
//!   └── TransitionEngine
//!       ├── RoleResolver   (OLD role from the store, NEW role from the payload)
//!       ├── plan           (pure (OLD, NEW) -> [Step] tables)
//!       ├── VolumeSet      (managed volumes from the checkout or the store)
//!       ├── TransferHandshake (success/failure rendezvous over the store)
//!       └── Collaborators  (compose engine, fetcher, volumes, registry, membership)
//! ```

pub mod application;
pub mod capability;
pub mod compose;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod plan;
pub mod roles;
pub mod transition;
pub mod volumes;

pub use application::{Application, Checkout};
pub use capability::{
    ClusterMembership, Collaborators, DeploymentEngine, ServiceRegistry, SourceFetcher,
    VolumeManager,
};
pub use compose::ComposeFile;
pub use dispatcher::{BatchReport, Dispatcher, manual_event};
pub use error::{EngineError, EngineResult};
pub use handshake::TransferHandshake;
pub use plan::{MigratePlan, Step, deploy_plan, destroy_plan};
pub use roles::{RoleAssignment, RoleResolver};
pub use transition::{EngineSettings, TransitionEngine};
pub use volumes::{Volume, VolumeSet};
