//! Binary asset chain.

use super::{Payload, StepError, TransformMeta, TransformStep};

/// Copies content unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl TransformStep for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn apply(&self, input: Payload, _meta: &mut TransformMeta) -> Result<Payload, StepError> {
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ContentKind;
    use crate::config::Mode;

    #[test]
    fn test_bytes_unchanged() {
        let mut meta = TransformMeta::new("a.png", "a.png", ContentKind::BinaryAsset, Mode::Production);
        let bytes = vec![0x89, b'P', b'N', b'G', 0, 0xff];
        let out = Passthrough.apply(Payload::Bytes(bytes.clone()), &mut meta).unwrap();
        assert_eq!(out, Payload::Bytes(bytes));
    }
}
