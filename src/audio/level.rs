//! Loudness extraction
//!
//! A fragment's loudness is the magnitude of its first sample. Every other
//! sample in the fragment is ignored.

const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// Magnitude of the first little-endian f32 sample in `bytes`.
///
/// Returns `None` when the fragment is too short to hold a sample, so an
/// empty fragment never produces a reading.
pub fn first_sample_magnitude(bytes: &[u8]) -> Option<f32> {
    let first: [u8; SAMPLE_SIZE] = bytes.get(..SAMPLE_SIZE)?.try_into().ok()?;
    Some(f32::from_le_bytes(first).abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_first_sample_is_exact() {
        for value in [0.0f32, 0.15, 0.0123456, 1.0, 3.5e-7] {
            assert_eq!(first_sample_magnitude(&fragment(&[value])), Some(value));
            assert_eq!(first_sample_magnitude(&fragment(&[-value])), Some(value));
        }
    }

    #[test]
    fn test_only_first_sample_counts() {
        let bytes = fragment(&[0.01, 0.9, -0.9, 0.5]);
        assert_eq!(first_sample_magnitude(&bytes), Some(0.01));
    }

    #[test]
    fn test_short_fragment_yields_nothing() {
        assert_eq!(first_sample_magnitude(&[]), None);
        assert_eq!(first_sample_magnitude(&[0, 0, 128]), None);
    }

    #[test]
    fn test_negative_zero_is_silence() {
        assert_eq!(first_sample_magnitude(&fragment(&[-0.0])), Some(0.0));
    }
}
