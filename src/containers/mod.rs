//! Docker containers backing the `container` provider of each service.
//!
//! Containers are long-lived developer resources: they are named
//! deterministically from the image and the application id, so a second run
//! for the same application finds and reuses the container the first run
//! started instead of creating another one.
//!
//! ```text
//!   ensure(request)
//!         │
//!         ▼
//!   ┌──────────────┐  found   ┌──────────────┐
//!   │ Inspect name │─────────▶│ Reuse        │──┐
//!   └──────────────┘          └──────────────┘  │
//!         │ missing                              │
//!         ▼                                      ▼
//!   ┌──────────────┐  absent  ┌──────────────┐  ┌──────────────────────┐
//!   │ Image local? │─────────▶│ ImageRequired│  │ Start if stopped     │
//!   └──────────────┘          └──────────────┘  └──────────────────────┘
//!         │ present                              │
//!         ▼                                      ▼
//!   ┌──────────────┐                          ┌──────────────────────┐
//!   │ Create       │─────────────────────────▶│ Wait for port        │
//!   │ (+cache dir) │                          │ (destroy if created) │
//!   └──────────────┘                          └──────────────────────┘
//! ```
//!
//! Two concurrent runs racing to create the same container name are not
//! guarded against.

pub mod detect;
pub mod error;
pub mod manager;
pub mod runtime;

pub use error::{ContainerError, Result};
pub use manager::{
    ContainerManager, ContainerRecord, ContainerRequest, container_name_for, default_cache_root,
    port_open,
};
pub use runtime::{ContainerRuntime, ContainerSpec, ContainerStatus, DockerRuntime};
