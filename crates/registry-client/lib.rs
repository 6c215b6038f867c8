//! Repository Client (spec §4B): signed registry fetch, envelope
//! verification, tarball retrieval, and the protobuf wire types they
//! share with the server.

mod client;
mod error;
mod key;

pub mod wire {
    include!(concat!(env!("OUT_DIR"), "/hexcore.wire.rs"));
}

pub use client::{
    decode_package, get_package, get_public_key, get_tarball, verify, Dependency, PackageFetch,
    Release, RepoConfig, RetirementStatus,
};
pub use error::ClientError;
pub use key::rsa_pkcs1_der_from_pem;
