//! Signature engine.
//!
//! Computes perceptual signatures for image bytes, cheap structural
//! signatures for media metadata, and compares signatures position by
//! position.
//!
//! # Components
//!
//! - **perceptual**: phash, dhash and blockhash signatures, plus structural
//!   signatures for metadata-only ingestion.
//! - **distance**: Hamming-style distance and the single normalization used for
//!   both threshold decisions and reported percentages.
//! - **grouping**: greedy, order-dependent clustering of signed items.

pub mod distance;
pub mod grouping;
pub mod perceptual;

pub use distance::{are_similar, dissimilarity_percent, distance, similarity_percent};
pub use grouping::{group_by_similarity, Signed};
pub use perceptual::{
    compute_signature, signature_hex_len, signature_of_image,
    structural_signature, HashMethod,
};
