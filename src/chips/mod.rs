//! Chip variants of the BM31x family.
//!
//! Everything here is data: register base addresses, signal routing tables
//! and the macro invocations that stamp out pins and peripheral singletons.
//! The behaviour lives in the generic peripheral modules; supporting a new
//! family member is a matter of writing another module like these, typically
//! generated from the vendor's pin-function sheet.

pub mod bm310;
pub mod bm318;
