//! A client for OCI/Docker v2 image registries.
//!
//! This crate implements reference parsing and normalization, the OCI
//! Distribution Specification protocol (authentication, manifests, blobs,
//! chunked uploads, referrers), content-addressed verification, and a
//! uniform image view over a remote registry, a `docker-save` tarball, or an
//! on-disk OCI layout.
//!
//! It does not implement a CLI, logging setup, credential-helper binaries,
//! overlay-filesystem assembly, vulnerability scanning, or compression
//! codecs; those are left to consumers.

#[macro_use]
extern crate log;

pub mod auth;
pub mod cache;
pub mod credstore;
pub mod digest;
pub mod distribution;
pub mod error;
pub mod manifest;
pub mod mediatype;
pub mod probe;
pub mod reference;
pub mod route;
pub mod storage;
pub mod transport;
pub mod verify;

pub use crate::digest::Digest;
pub use crate::error::{Error, ErrorKind};
pub use crate::reference::{Reference, Registry as RegistryRef, Repository};
pub use crate::transport::{ClientConfig, HttpEngine};
