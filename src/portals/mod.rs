//! Portal clients.
//!
//! Each client owns the endpoint paths and page shapes of one portal and
//! speaks to the remote exclusively through the session core. They share an
//! [`Identity`](crate::session::Identity) when the caller wants single
//! sign-on behavior across them.

pub mod builder;
pub mod catalog;
pub mod records;

pub use builder::{BuilderQuery, ScheduleBuilder};
pub use catalog::{Catalog, CatalogQuery, Day, GeArea, Level};
pub use records::StudentRecords;
