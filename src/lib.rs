//! Page layout and page selection for PDF documents.
//!
//! [`layout`] and [`pages`] are pure: no I/O, no logging, no shared state.
//! [`images`], [`document`] and [`split`] apply their results to real files with lopdf.

pub mod document;
pub mod error;
pub mod images;
pub mod layout;
pub mod pages;
pub mod split;

pub use error::{Error, Result};
pub use layout::{compute_layout, compute_margin_fit, FitMode, LayoutResult, PageSize};
pub use pages::{move_item, parse_page_range, PageOrder};
