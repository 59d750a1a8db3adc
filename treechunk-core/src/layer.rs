/*!
Hash-tree layer geometry: how a logical byte offset maps to an entry
position within a chunk at a given layer.

Layer 0 holds raw data, one byte per logical byte. Layers 1.. hold
32-byte SHA-256 entries, each entry addressing `S * E^(l-1)` logical
bytes, where `E = S / 32` is the number of entries an upper chunk holds.
*/

/// Size in bytes of a hash-tree entry above layer 0.
pub const ENTRY_HASH_LEN: u64 = 32;

/// `(shift, mask, entry_size)` for one layer of the hash tree: the byte
/// offset of the entry covering logical offset `x` within a layer chunk
/// is `((x >> shift) & mask) * entry_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerShape {
    pub shift: u32,
    pub mask: u64,
    pub entry_size: u64,
}

impl LayerShape {
    /// Number of logical bytes a single entry at this layer addresses.
    /// Saturates at `u64::MAX` once `shift >= 64`, which only happens for
    /// layer slots above the one actually needed to cover a 64-bit offset
    /// space; the saturated value is never used as anything but an upper
    /// bound on a virtual all-zero source's length.
    pub fn entry_cover_size(&self) -> u64 {
        if self.shift >= 64 {
            u64::MAX
        } else {
            1u64 << self.shift
        }
    }

    /// Byte offset, within a chunk at this layer, of the entry covering
    /// logical offset `x`.
    pub fn entry_offset(&self, offset: u64) -> u64 {
        let shifted = if self.shift >= 64 { 0 } else { offset >> self.shift };
        (shifted & self.mask) * self.entry_size
    }
}

/// Builds `num_layers` layer shapes for a tree parameterised by `size_2`
/// (`S = 2^size_2`). Layer 0 is always `(shift=0, mask=S-1, entry_size=1)`;
/// layer `l >= 1` covers `S * E^(l-1)` bytes per entry, `E = S / 32`.
pub fn layer_shape(size_2: u32, num_layers: usize) -> Vec<LayerShape> {
    debug_assert!(size_2 >= 5, "chunk size must hold at least one hash entry");
    let chunk_size: u64 = 1u64 << size_2;
    let upper_chunk_entries = chunk_size / ENTRY_HASH_LEN;
    // `upper_chunk_entries` is a power of two, so this is its log2.
    let upper_chunk_numbits = (upper_chunk_entries - 1).count_ones();

    let mut shapes = Vec::with_capacity(num_layers);
    shapes.push(LayerShape {
        shift: 0,
        mask: chunk_size - 1,
        entry_size: 1,
    });

    let mut bit_start = size_2;
    for _ in 1..num_layers {
        shapes.push(LayerShape {
            shift: bit_start,
            mask: upper_chunk_entries - 1,
            entry_size: ENTRY_HASH_LEN,
        });
        bit_start += upper_chunk_numbits;
    }
    shapes
}

/// The fixed number of layer slots the writer reasons about when checking
/// that a single top chunk can address any 64-bit offset. Only as many of
/// these as are actually written end up in a finished repository's
/// `num_layers`.
pub const MAX_LAYER_SLOTS: usize = 16;

/// `size_2` values below this cannot reach a top-layer shift beyond 64
/// within `MAX_LAYER_SLOTS` slots, and are rejected at construction.
///
/// Note this works out to 9, not the 7 a naive reading of "a single top
/// chunk covers any 64-bit offset" might suggest -- with `log2(E) =
/// size_2 - 5`, the top slot's shift is `15 * size_2 - 70`, which only
/// clears 64 once `size_2 >= 9`.
pub fn min_supported_size_2() -> u32 {
    (5..=64)
        .find(|&size_2| layer_shape(size_2, MAX_LAYER_SLOTS)[MAX_LAYER_SLOTS - 1].shift > 64)
        .expect("some size_2 in range must satisfy the top-layer shift requirement")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer0_is_identity_addressing() {
        let shapes = layer_shape(12, 3);
        assert_eq!(shapes[0].shift, 0);
        assert_eq!(shapes[0].mask, 4095);
        assert_eq!(shapes[0].entry_size, 1);
        assert_eq!(shapes[0].entry_offset(10), 10);
        assert_eq!(shapes[0].entry_offset(4096 + 10), 10);
    }

    #[test]
    fn upper_layer_entry_math_matches_spec_example() {
        // size_2 = 12 => S = 4096, E = 4096/32 = 128, log2(E) = 7.
        let shapes = layer_shape(12, 3);
        assert_eq!(shapes[1].shift, 12);
        assert_eq!(shapes[1].mask, 127);
        assert_eq!(shapes[1].entry_size, 32);
        assert_eq!(shapes[1].entry_cover_size(), 4096);

        assert_eq!(shapes[2].shift, 19);
        assert_eq!(shapes[2].mask, 127);
        assert_eq!(shapes[2].entry_cover_size(), 1 << 19);
    }

    #[test]
    fn top_slot_shift_exceeds_64_for_size_2_12() {
        let shapes = layer_shape(12, MAX_LAYER_SLOTS);
        assert!(shapes[MAX_LAYER_SLOTS - 1].shift > 64);
    }

    #[test]
    fn min_supported_size_2_is_9() {
        let supported = min_supported_size_2();
        assert_eq!(supported, 9);
        assert!(layer_shape(supported, MAX_LAYER_SLOTS)[MAX_LAYER_SLOTS - 1].shift > 64);
        assert!(layer_shape(supported - 1, MAX_LAYER_SLOTS)[MAX_LAYER_SLOTS - 1].shift <= 64);
    }

    #[test]
    fn entry_cover_size_saturates_past_64_bit_shift() {
        let shapes = layer_shape(12, MAX_LAYER_SLOTS);
        let top = &shapes[MAX_LAYER_SLOTS - 1];
        assert!(top.shift > 64);
        assert_eq!(top.entry_cover_size(), u64::MAX);
        assert_eq!(top.entry_offset(0), 0);
    }
}
