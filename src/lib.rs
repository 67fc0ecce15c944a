//! vcdelta: VCDIFF (RFC 3284) delta encoding and decoding.
//!
//! The crate provides:
//! - The VCDIFF format layer: varints, code tables, address caches,
//!   headers and a streaming decoder (`vcdiff`)
//! - Rolling-hash block matching (`hash`)
//! - Windowed encode/decode APIs (`compress`)
//! - File-oriented helpers (`io`)
//! - A command-line front end (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use vcdelta::compress::encoder::{self, CompressOptions};
//! use vcdelta::compress::decoder;
//!
//! let source = b"hello old world";
//! let target = b"hello new world";
//!
//! let delta = encoder::encode_all(Vec::new(), source, target, CompressOptions::default()).unwrap();
//! let decoded = decoder::decode_all(source, &delta).unwrap();
//! assert_eq!(decoded, target);
//! ```

pub mod compress;
pub mod hash;
pub mod io;
pub mod vcdiff;

#[cfg(feature = "cli")]
pub mod cli;
