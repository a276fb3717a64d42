#![forbid(unsafe_code)]

pub mod hash;
pub mod random;

pub mod identity;
pub mod aead;
pub mod pairwise;

#[cfg(test)]
mod proptests;
