//! # manifold-auth — credential lifecycle for connectors and ingress
//!
//! Outbound: [`TokenService`] resolves an [`AuthAdapter`] into a live
//! credential, caching through the storage gateway with optimistic-locked
//! refresh (at most one refresh in flight per cache key, waiters observe the
//! refreshed value).
//!
//! Inbound: [`PolicyEngine`] matches requests against
//! [`InboundAuthPolicy`] rows and validates extracted credentials (JWT
//! signature + claims, OAuth2 introspection, API key or session
//! comparison).
//!
//! [`AuthAdapter`]: manifold_core::model::adapter::AuthAdapter
//! [`InboundAuthPolicy`]: manifold_core::model::adapter::InboundAuthPolicy

pub mod cache;
pub mod error;
pub mod inbound;
pub mod jwt;
pub mod oauth;

pub use cache::{TokenService, TokenServiceConfig};
pub use error::AuthError;
pub use inbound::{InboundDecision, PolicyEngine, Principal, RequestContext};
