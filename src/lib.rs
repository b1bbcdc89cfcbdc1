#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]
#[cfg(doctest)]
pub struct ReadmeDoctests;

mod client;
mod edb;
mod error;
mod keyword_store;
mod request;
mod serde;

#[doc(inline)]
pub use {
    client::Client,
    edb::{Edb, ReadTransaction, StoreFull, WriteTransaction},
    error::Error,
    keyword_store::{KeywordEntry, KeywordStore, MemoryKeywordStore},
    request::{SearchRequest, UpdateRequest},
    server::{PipelineWidths, Server},
};

pub mod prf;
pub mod server;
pub mod tdp;
pub mod token;

#[doc(inline)]
pub use {
    prf::Prf,
    tdp::{Tdp, TdpInverse},
    token::{
        SearchToken, UpdateToken, DERIVATION_KEY_SIZE, SEARCH_TOKEN_SIZE, UPDATE_TOKEN_SIZE,
    },
};

#[cfg(test)]
#[macro_use]
extern crate quickcheck;

// Tells unused_crate_dependencies to STFU about the "unused dev dependency"
#[cfg(test)]
use criterion as _;
