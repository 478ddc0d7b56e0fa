//! Logging destinations and readers.
//!
//! [`SaveGroup`] writes acquisitions to the daily CSV files; [`Loader`] reads
//! them back into a [`DataTable`].

pub mod loader;
pub mod save_group;
pub mod storage;
pub mod table;

pub use loader::{Loader, Watermark};
pub use save_group::{PrimaryOutcome, SaveGroup, SaveGroupBuilder, SaveReport};
pub use table::{DataTable, Row};
