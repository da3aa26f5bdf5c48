//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::distributions::Alphanumeric;
use rand::Rng;
use syncvault_core::{Resource, ResourceId};

/// Generate random payload bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate payload bytes that compress like a real database page mix.
///
/// Half of every 64-byte block is random, half is zeros.
pub fn compressible_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size)
        .map(|i| if i % 64 < 32 { rng.gen() } else { 0 })
        .collect()
}

/// Generate `count` user resources with random display names.
pub fn generate_resources(count: usize) -> Vec<Resource> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let name: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(16)
                .map(char::from)
                .collect();
            Resource::new(ResourceId::new("user", format!("user-{i}")), name)
        })
        .collect()
}
