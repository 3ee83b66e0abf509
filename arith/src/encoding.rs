/// Two's-complement bit-vector encoding, most significant bit first.
use crate::error::ErrorKind;

/// Whether `value` is representable in `width` bits of two's complement.
pub fn fits(value: i64, width: u32) -> bool {
    if width == 0 {
        return false;
    }
    if width >= 64 {
        return true;
    }
    let lo = -(1i64 << (width - 1));
    let hi = (1i64 << (width - 1)) - 1;
    (lo..=hi).contains(&value)
}

/// The minimal width that represents `value`, always at least 1.
pub fn width_for(value: i64) -> u32 {
    let mut width = 1;
    while !fits(value, width) {
        width += 1;
    }
    width
}

/// Encode `value` into `width` bits, MSB first, bit 0 the sign.
pub fn encode(value: i64, width: u32) -> Result<Vec<bool>, ErrorKind> {
    if !fits(value, width) {
        return Err(ErrorKind::UnrepresentableConstant { value, width });
    }
    // Arithmetic shift on i64 reads two's-complement bits directly.
    Ok((0..width)
        .rev()
        .map(|i| (value >> i) & 1 == 1)
        .collect())
}

/// Decode an MSB-first two's-complement bit vector. Empty input decodes
/// to zero.
pub fn decode(bits: &[bool]) -> i64 {
    let mut value: i64 = 0;
    for &bit in bits {
        value = (value << 1) | bit as i64;
    }
    if !bits.is_empty() && bits[0] {
        value -= 1i64 << bits.len();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn widths_cover_expected_ranges() {
        assert_eq!(width_for(0), 1);
        assert_eq!(width_for(-1), 1);
        assert_eq!(width_for(1), 2);
        assert_eq!(width_for(-2), 2);
        assert_eq!(width_for(7), 4);
        assert_eq!(width_for(8), 5);
        assert_eq!(width_for(-8), 4);
        assert_eq!(width_for(-9), 5);
        assert_eq!(width_for(100), 8);
    }

    #[test]
    fn encode_width_four_examples() {
        assert_eq!(encode(7, 4).unwrap(), vec![false, true, true, true]);
        assert_eq!(encode(-8, 4).unwrap(), vec![true, false, false, false]);
        assert_eq!(encode(-1, 4).unwrap(), vec![true, true, true, true]);
        assert_eq!(encode(0, 4).unwrap(), vec![false, false, false, false]);
    }

    #[test]
    fn encode_rejects_out_of_range() {
        assert!(encode(8, 4).is_err());
        assert!(encode(-9, 4).is_err());
        assert!(encode(2, 2).is_err());
    }

    #[test]
    fn small_widths_are_exhaustive() {
        for width in 1..=4u32 {
            let lo = -(1i64 << (width - 1));
            let hi = (1i64 << (width - 1)) - 1;
            for value in lo..=hi {
                let bits = encode(value, width).unwrap();
                assert_eq!(bits.len(), width as usize);
                assert_eq!(decode(&bits), value);
                assert_eq!(bits[0], value < 0);
            }
        }
    }

    #[test]
    fn sign_extension_preserves_value() {
        for value in -8i64..=7 {
            let narrow = encode(value, 4).unwrap();
            let wide = encode(value, 7).unwrap();
            assert_eq!(decode(&narrow), decode(&wide));
            assert!(wide[..4].iter().all(|&b| b == narrow[0]));
        }
    }

    proptest! {
        #[test]
        fn round_trip(value in -(1i64 << 31)..(1i64 << 31)) {
            let width = width_for(value);
            let bits = encode(value, width).unwrap();
            prop_assert_eq!(decode(&bits), value);
            // minimality: one bit fewer no longer fits
            if width > 1 {
                prop_assert!(encode(value, width - 1).is_err());
            }
        }
    }
}
