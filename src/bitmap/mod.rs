//! Bitmap engine
//!
//! A `BitmapHolder` plays the role of an engine index (one per database
//! and table) and owns named `Field`s. A field is a set of rows, each row a
//! compressed set of columnIDs. Three operations matter to the driver:
//! create a field, import bits into it, read a row back.

mod errors;
mod field;
mod holder;

pub use errors::{BitmapError, BitmapResult};
pub use field::Field;
pub use holder::BitmapHolder;
