//! Randomness helpers backed by the OS RNG.

#[derive(Debug, thiserror::Error)]
#[error("OS random number generator failed")]
pub struct RngError;

/// Fill a fixed-size array from the OS RNG.
pub fn random_array<const N: usize>() -> Result<[u8; N], RngError> {
    let mut b = [0u8; N];
    getrandom::getrandom(&mut b).map_err(|_| RngError)?;
    Ok(b)
}

/// Generate a fresh sender-key epoch id: 16 random bytes as lowercase hex.
pub fn epoch_id() -> Result<String, RngError> {
    Ok(hex::encode(random_array::<16>()?))
}
