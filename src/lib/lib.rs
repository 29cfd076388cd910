#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    missing_docs,
    rustdoc::broken_intra_doc_links,
    rustdoc::missing_crate_level_docs
)]

//! Mail merge library: personalizes one template for every row of a recipient
//! table and hands each message to a [`domain::communication::mailer::Mailer`].

pub mod domain;
pub mod infrastructure;
