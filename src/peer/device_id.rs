//! Device identifiers.

use rand::Rng;

const DEVICE_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of generated device ids.
pub const DEVICE_ID_LEN: usize = 8;

/// Generates a random device id of [`DEVICE_ID_LEN`] characters from `[A-Z0-9]`.
///
/// # Examples
///
/// ```
/// use saferoute_core::peer::generate_device_id;
///
/// let id = generate_device_id();
/// assert_eq!(id.len(), 8);
/// ```
#[must_use]
pub fn generate_device_id() -> String {
    let mut rng = rand::thread_rng();
    (0..DEVICE_ID_LEN)
        .map(|_| char::from(DEVICE_ID_ALPHABET[rng.gen_range(0..DEVICE_ID_ALPHABET.len())]))
        .collect()
}
