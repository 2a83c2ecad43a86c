//! Ephemeral Kubernetes build environments for kiln CI workloads.
//!
//! This crate turns a declarative [`PodDescriptor`](kiln_core::PodDescriptor)
//! into a running build pod and tears it down again. It handles:
//!
//! - Cluster client resolution from a [`ClusterConnector`](kiln_core::ClusterConnector)
//! - Git, registry, custom-variable and connector secrets
//! - PVCs, service pods and their Services, then the primary pod
//! - Readiness polling and pod event relay to a [`LogSink`](kiln_core::LogSink)
//! - Script execution inside running containers
//! - Idempotent cleanup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     CI pipeline executor                        │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  BuildEnvironmentOrchestrator   CleanupOrchestrator   Executor  │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────────┐    │
//! │  │  Secret     │ │  Readiness  │ │    Pod event            │    │
//! │  │  builders   │ │  polling    │ │    watcher              │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────────┘    │
//! │                         │                                       │
//! │                         ▼                                       │
//! │                  ClusterGateway trait                           │
//! │               ┌─────────┴─────────┐                             │
//! │               ▼                   ▼                             │
//! │        ┌─────────────┐     ┌─────────────┐                      │
//! │        │ KubeGateway │     │ MockGateway │                      │
//! │        └─────────────┘     └─────────────┘                      │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Kubernetes API Server                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kiln_orchestrator::{
//!     BuildEnvironmentOrchestrator, HttpCredentialBroker, KubeClientFactory,
//!     OrchestratorConfig, TracingLogSink,
//! };
//!
//! # async fn example(request: kiln_core::BuildEnvironmentRequest) -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrchestratorConfig::from_env();
//! let broker = Arc::new(HttpCredentialBroker::new("http://credential-broker:8080")?);
//! let factory = Arc::new(KubeClientFactory::new(broker.clone(), config.clone()));
//!
//! let orchestrator = BuildEnvironmentOrchestrator::new(factory, broker.clone(), broker, config);
//! let result = orchestrator.initialize(&request, Arc::new(TracingLogSink)).await;
//! println!("Build environment: {:?}", result.status);
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without a real Kubernetes cluster, enable the `test-utils` feature
//! and use the in-memory gateway:
//!
//! ```ignore
//! use std::sync::Arc;
//! use kiln_orchestrator::{CleanupOrchestrator, MockFactory, MockGateway};
//!
//! # async fn example(request: kiln_core::CleanupRequest) {
//! let gateway = Arc::new(MockGateway::new());
//! let cleanup = CleanupOrchestrator::new(Arc::new(MockFactory::new(gateway.clone())));
//!
//! assert!(cleanup.cleanup(&request).await.is_success());
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod broker;
pub mod cleanup;
pub mod client;
pub mod clock;
pub mod error;
pub mod exec;
pub mod gateway;
pub mod kube_gateway;
pub mod lifecycle;
pub mod orchestrator;
pub mod pod;
pub mod readiness;
pub mod secrets;
pub mod sink;
pub mod types;
pub mod watcher;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use broker::HttpCredentialBroker;
pub use cleanup::{CleanupOrchestrator, CleanupReport};
pub use client::{ClusterClientFactory, KubeClientFactory};
pub use clock::{Clock, TokioClock};
pub use error::{OrchestratorError, Result, Stage, StageError};
pub use exec::{execute_command, CommandExecutor};
pub use gateway::{ClusterGateway, ExecStream, PodEventStream};
pub use kube_gateway::KubeGateway;
pub use lifecycle::{BuildProgress, BuildState};
pub use orchestrator::BuildEnvironmentOrchestrator;
pub use readiness::wait_until_pod_is_ready;
pub use secrets::{AwsCredentials, CredentialSecretBuilder, EcrAuthorization, RegistryTokenExchange};
pub use sink::{HttpLogSink, TracingLogSink};
pub use types::{DeleteResult, OrchestratorConfig, PodPhase, PodReadiness, PodStatus, ReadinessState};
pub use watcher::{PodEventWatcher, WatchHandle};

#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockDecryptor, MockFactory, MockGateway, MockTokenExchange, RecordingSink};
