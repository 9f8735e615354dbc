use num_traits::PrimInt;

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;
pub const GB: u64 = 1024 * MB;
pub const PAGE_SIZE: u64 = 4 * KB;
pub const PAGE_SIZE_64K: u64 = 64 * KB;
pub const CACHE_LINE_SIZE: usize = 64;

/// Rounds `value` up to a multiple of `alignment`.
///
/// `alignment` must be a power of two.
pub fn align_up<T: PrimInt>(value: T, alignment: T) -> T {
    debug_assert!(is_pow2(alignment));
    let mask = alignment - T::one();
    (value + mask) & !mask
}

/// Rounds `value` down to a multiple of `alignment`.
pub fn align_down<T: PrimInt>(value: T, alignment: T) -> T {
    debug_assert!(is_pow2(alignment));
    value & !(alignment - T::one())
}

pub fn is_aligned<T: PrimInt>(value: T, alignment: T) -> bool {
    value & (alignment - T::one()) == T::zero()
}

pub fn is_pow2<T: PrimInt>(value: T) -> bool {
    value != T::zero() && value.count_ones() == 1
}

/// Mask with the lowest `n` bits set.
pub fn max_n_bit_value(n: u32) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

pub fn divide_and_round_up<T: PrimInt>(dividend: T, divisor: T) -> T {
    (dividend + divisor - T::one()) / divisor
}

pub fn next_pow2(value: u32) -> u32 {
    value.max(1).next_power_of_two()
}

pub fn prev_pow2(value: u32) -> u32 {
    if value == 0 {
        0
    } else {
        1 << (31 - value.leading_zeros())
    }
}

/// Writes `value` as little endian bytes at `offset` if the range fits.
///
/// Returns false, leaving `dst` untouched, when it does not.
pub fn patch_bytes(dst: &mut [u8], offset: usize, value: &[u8]) -> bool {
    match dst.get_mut(offset..offset + value.len()) {
        Some(slot) => {
            slot.copy_from_slice(value);
            true
        }
        None => false,
    }
}

pub fn read_u32(src: &[u8], offset: usize) -> Option<u32> {
    let bytes = src.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn read_u64(src: &[u8], offset: usize) -> Option<u64> {
    let bytes = src.get(offset..offset + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers() {
        assert_eq!(align_up(0u32, 64), 0);
        assert_eq!(align_up(1u32, 64), 64);
        assert_eq!(align_up(64u64, 64), 64);
        assert_eq!(align_down(127usize, 64), 64);
        assert!(is_aligned(128u32, 64));
        assert!(!is_aligned(130u32, 64));
        assert!(is_pow2(32u32));
        assert!(!is_pow2(0u32));
        assert!(!is_pow2(12u32));
    }

    #[test]
    fn bit_helpers() {
        assert_eq!(max_n_bit_value(0), 0);
        assert_eq!(max_n_bit_value(5), 0x1F);
        assert_eq!(max_n_bit_value(32), 0xFFFF_FFFF);
        assert_eq!(max_n_bit_value(64), u64::MAX);
        assert_eq!(prev_pow2(1000), 512);
        assert_eq!(next_pow2(1000), 1024);
        assert_eq!(divide_and_round_up(17u32, 8), 3);
    }

    #[test]
    fn patching_out_of_range_is_rejected() {
        let mut bytes = [0u8; 8];
        assert!(patch_bytes(&mut bytes, 4, &7u32.to_le_bytes()));
        assert_eq!(read_u32(&bytes, 4), Some(7));
        assert!(!patch_bytes(&mut bytes, 6, &7u32.to_le_bytes()));
        assert_eq!(read_u64(&bytes, 1), None);
    }
}
