//! # Table Model
//!
//! Plain data shared by the pipeline and the network LOS: typed columnar
//! tables and the scalar `Value` used to read cells out of them.
//!
//! Design rule: no skim buffers, no stores, no I/O beyond CSV ingestion.

pub mod table;
pub mod value;

pub use table::{Column, Table};
pub use value::Value;
