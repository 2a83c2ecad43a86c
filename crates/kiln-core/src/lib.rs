//! Core types and collaborator interfaces for kiln.
//!
//! This crate provides the foundational types shared between callers of the
//! build-environment orchestrator and the orchestrator itself:
//!
//! - **Connectors**: typed references to clusters, registries and git remotes
//! - **Descriptors**: the declarative pod/container input consumed as-is
//! - **Secrets**: encrypted references, decrypted material, and the
//!   [`SecretDecryptor`] capability
//! - **Results**: terminal task and exec outcomes plus request shapes
//! - **Events**: the [`LogSink`] capability and the events pushed to it
//!
//! # Example
//!
//! ```
//! use kiln_core::{ContainerDescriptor, ImageDetails, PodDescriptor};
//!
//! let pod = PodDescriptor::new("build-1234", "ci")
//!     .with_container(ContainerDescriptor::step("step-1", ImageDetails::parse("alpine:3.19")));
//!
//! assert_eq!(pod.containers.len(), 1);
//! assert_eq!(pod.containers[0].image.image.tag, "3.19");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod connector;
pub mod descriptor;
pub mod error;
pub mod secret;
pub mod sink;
pub mod task;

pub use connector::{
    AwsCredentialSource, ClusterAuth, ClusterConnector, GitAuth, GitConnector, PublishConnector,
    RegistryConnector,
};
pub use descriptor::{
    ContainerDescriptor, ContainerPortSpec, ContainerRole, ImageDetails, ImageDetailsWithConnector,
    PodDescriptor, ServicePodDescriptor, VolumeClaimRequest, VolumeMountSpec,
};
pub use error::{DecryptError, Result};
pub use secret::{
    AuthContext, EncryptedRef, Plaintext, SecretDecryptor, SecretKind, SecretMaterial,
    SecretVariable,
};
pub use sink::{LogSink, PodEvent};
pub use task::{
    BuildEnvironmentRequest, CleanupRequest, ExecRequest, ExecResult, ExecStatus, TaskResult,
    TaskStatus,
};
