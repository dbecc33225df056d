//! GraphQL interception proxy with schema reconstruction
//!
//! `graphtap` is a man-in-the-middle proxy for GraphQL reconnaissance. It
//! answers HTTP CONNECT with a leaf certificate minted by a local CA,
//! decrypts the tunnel, forwards requests upstream, and records every
//! exchange it recognizes as a GraphQL operation: durably through a
//! [`TrafficStore`] and live through a broadcast [`EventBus`]. Captured
//! response bodies feed [`build_from_traffic`], which reconstructs a typed
//! schema of the target application from the JSON shapes it observed.
//!
//! # Features
//!
//! - Automatic CA generation with per-host leaf certificate caching
//! - CONNECT-tunnel TLS interception using the rustls backend
//! - GraphQL classification and payload extraction for GET, POST, and
//!   batched requests
//! - Bounded fan-out to live subscribers with a drop-on-slow policy
//! - Schema inference: introspection auto-detection first, JSON shape
//!   inference second
//!
//! # Example
//!
//! ```no_run
//! use graphtap::{InterceptionProxy, MemoryTrafficStore, ProxyConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryTrafficStore::new());
//!     let proxy = InterceptionProxy::new(ProxyConfig::default(), store.clone()).await?;
//!     proxy.start().await?;
//!     println!("trust anchor: {}", proxy.ca_cert_path().display());
//!
//!     let mut events = proxy.subscribe().await;
//!     while let Some(event) = events.recv().await {
//!         println!("captured: {}", String::from_utf8_lossy(&event));
//!     }
//!     Ok(())
//! }
//! ```

mod bus;
mod ca;
mod capture;
mod error;
mod fingerprint;
mod http1;
mod inference;
mod introspection;
mod proxy;
mod recognize;
mod schema;
mod server;
mod store;

pub use bus::{EventBus, Subscription, SUBSCRIBER_BUFFER};
pub use ca::{CertificateAuthority, CertifiedChain};
pub use capture::{new_traffic_id, CapturedExchange};
pub use error::{Error, Result};
pub use fingerprint::fingerprint;
pub use inference::build_from_traffic;
pub use introspection::parse_introspection;
pub use proxy::{InterceptionProxy, ProxyConfig};
pub use recognize::{
  extract_operation_name, extract_payload, is_graphql_request, looks_like_graphql_response,
  GraphQLPayload, ProxiedRequest,
};
pub use schema::{
  Argument, Directive, EnumValue, Field, Schema, SchemaSource, Type, TypeKind, TypeRef,
};
pub use store::{
  MemorySchemaStore, MemoryTrafficStore, SchemaStore, TrafficStore,
};
