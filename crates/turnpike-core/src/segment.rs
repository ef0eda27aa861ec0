//! Message segmentation.

/// Position of a segment within its application message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BodyType {
    /// Whole message in one segment
    Complete = 0,
    /// First segment of a split message
    PartialStart = 1,
    /// Interior segment
    PartialMiddle = 2,
    /// Final segment
    PartialEnd = 3,
}

impl BodyType {
    /// Wire value
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Build from the two low bits; higher bits are ignored.
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Complete,
            1 => Self::PartialStart,
            2 => Self::PartialMiddle,
            _ => Self::PartialEnd,
        }
    }

    /// Whether this segment finishes a message
    #[must_use]
    pub fn ends_message(self) -> bool {
        matches!(self, Self::Complete | Self::PartialEnd)
    }
}

/// Split `payload` into chunks of at most `mss` bytes tagged for reassembly.
///
/// An empty payload still produces one `Complete` segment so that empty
/// messages are delivered.
///
/// # Examples
///
/// ```
/// use turnpike_core::segment::{split, BodyType};
///
/// let segments = split(&[0u8; 25], 10);
/// let types: Vec<_> = segments.iter().map(|(t, _)| *t).collect();
/// assert_eq!(
///     types,
///     [BodyType::PartialStart, BodyType::PartialMiddle, BodyType::PartialEnd]
/// );
/// ```
#[must_use]
pub fn split(payload: &[u8], mss: usize) -> Vec<(BodyType, Vec<u8>)> {
    let mss = mss.max(1);
    if payload.len() <= mss {
        return vec![(BodyType::Complete, payload.to_vec())];
    }

    let count = payload.len().div_ceil(mss);
    payload
        .chunks(mss)
        .enumerate()
        .map(|(i, chunk)| {
            let body_type = match i {
                0 => BodyType::PartialStart,
                i if i + 1 == count => BodyType::PartialEnd,
                _ => BodyType::PartialMiddle,
            };
            (body_type, chunk.to_vec())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_small_payload() {
        let segments = split(b"hello", 1300);
        assert_eq!(segments, vec![(BodyType::Complete, b"hello".to_vec())]);
    }

    #[test]
    fn test_split_empty_payload() {
        assert_eq!(split(&[], 1300), vec![(BodyType::Complete, Vec::new())]);
    }

    #[test]
    fn test_split_exact_boundary() {
        assert_eq!(split(&[7u8; 10], 10).len(), 1);

        let segments = split(&[7u8; 20], 10);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].0, BodyType::PartialStart);
        assert_eq!(segments[1].0, BodyType::PartialEnd);
    }

    #[test]
    fn test_split_preserves_bytes() {
        let payload: Vec<u8> = (0..=255).cycle().take(3000).collect();
        let segments = split(&payload, 1300);

        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|(_, s)| s.len() <= 1300));
        let joined: Vec<u8> = segments.into_iter().flat_map(|(_, s)| s).collect();
        assert_eq!(joined, payload);
    }

    #[test]
    fn test_body_type_bits() {
        for body_type in [
            BodyType::Complete,
            BodyType::PartialStart,
            BodyType::PartialMiddle,
            BodyType::PartialEnd,
        ] {
            assert_eq!(BodyType::from_bits(body_type.as_u8()), body_type);
        }
        assert!(BodyType::Complete.ends_message());
        assert!(BodyType::PartialEnd.ends_message());
        assert!(!BodyType::PartialMiddle.ends_message());
    }
}
