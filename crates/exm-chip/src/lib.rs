//! Silicon model for a multi-way exact-match SRAM unit.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the match RAM: array geometry, register-word layouts, and
//! the bit positions the lookup engine slices hash outputs and entries by.
//!
//! The layouts were taken from golden register fixtures of a match-action
//! pipeline model (whole 32-bit word writes, low word first).
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`geometry`] | Rows × banks array, stash depth, version width, match-address packing |
//! | [`layout`] | Register-word layouts: `unitram_config`, `ram_address_mux`, match/stash mask words, parity half-words, address defaults |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod geometry;
pub mod layout;

pub use geometry::RamGeometry;
