//! Recipient address extraction.
//!
//! Pulls email-shaped tokens out of arbitrary pasted text (lists, chat
//! exports, social posts), deduplicates them case-insensitively and splits
//! them into valid and invalid addresses.
//!
//! ## Processing Flow
//!
//! ```text
//! raw text → candidates → dedup (first casing wins) → validate → Extraction
//! ```

pub mod parser;
pub mod validate;

pub use parser::{extract, format_address_list, Extraction, ValidatedAddress};
pub use validate::is_valid_address;
