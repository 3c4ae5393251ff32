//! Property-based tests for the wire format and the missing-range computer.

use blast_transfer::protocol::{DataFrame, FileHdr, Frame, Segment};
use blast_transfer::RecordBitmap;
use proptest::prelude::*;

fn record_size() -> impl Strategy<Value = u16> {
    prop_oneof![Just(256u16), Just(512), Just(1024)]
}

fn segment() -> impl Strategy<Value = Segment> {
    (1u32..=1_000_000, 0u32..=100).prop_map(|(start, span)| Segment::new(start, start + span))
}

/// A populated bitmap plus a query range inside it.
fn bitmap_and_range() -> impl Strategy<Value = (Vec<bool>, u32, u32)> {
    prop::collection::vec(any::<bool>(), 1..300).prop_flat_map(|received| {
        let total = received.len() as u32;
        (Just(received), 1..=total, 1..=total)
    })
}

proptest! {
    #[test]
    fn file_hdr_roundtrip(
        file_size in any::<u64>(),
        record_size in record_size(),
        blast_size in 200u32..=10_000,
        filename in "[a-zA-Z0-9._-]{0,64}",
    ) {
        let frame = Frame::FileHdr(FileHdr { file_size, record_size, blast_size, filename });
        prop_assert_eq!(Frame::decode(&frame.encode(), record_size).unwrap(), frame);
    }

    #[test]
    fn is_blast_over_roundtrip(start in any::<u32>(), end in any::<u32>()) {
        let frame = Frame::IsBlastOver { start, end };
        prop_assert_eq!(Frame::decode(&frame.encode(), 512).unwrap(), frame);
    }

    #[test]
    fn rec_miss_roundtrip(missing in prop::collection::vec(segment(), 0..50)) {
        let frame = Frame::RecMiss(missing);
        prop_assert_eq!(Frame::decode(&frame.encode(), 512).unwrap(), frame);
    }

    #[test]
    fn data_roundtrip(
        record_size in record_size(),
        start in 1u32..=100_000,
        records in 1u32..=16,
        fill in any::<u8>(),
    ) {
        let payload = vec![fill; records as usize * record_size as usize];
        let frame = Frame::Data(DataFrame {
            segments: vec![Segment::new(start, start + records - 1)],
            payload,
        });
        prop_assert_eq!(Frame::decode(&frame.encode(), record_size).unwrap(), frame);
    }

    #[test]
    fn decode_never_panics(
        bytes in prop::collection::vec(any::<u8>(), 0..600),
        record_size in record_size(),
    ) {
        let _ = Frame::decode(&bytes, record_size);
    }

    #[test]
    fn decode_rejects_any_truncation(missing in prop::collection::vec(segment(), 1..20)) {
        let bytes = Frame::RecMiss(missing).encode();
        for cut in 1..bytes.len() {
            prop_assert!(Frame::decode(&bytes[..cut], 512).is_err());
        }
    }

    #[test]
    fn missing_ranges_match_reference((received, a, b) in bitmap_and_range()) {
        let total = received.len() as u32;
        let (start, end) = if a <= b { (a, b) } else { (b, a) };

        let mut bm = RecordBitmap::new(total);
        for (i, &r) in received.iter().enumerate() {
            if r {
                bm.set(i as u32 + 1);
            }
        }

        let segments = bm.missing_in(start, end);

        // exact cover of the missing indices inside the range
        let mut covered = Vec::new();
        for seg in &segments {
            for i in seg.start..=seg.end {
                covered.push(i);
            }
        }
        let expected: Vec<u32> =
            (start..=end).filter(|&i| !received[i as usize - 1]).collect();
        prop_assert_eq!(&covered, &expected);

        // sorted, disjoint, and maximal (flanked by received or a boundary)
        for pair in segments.windows(2) {
            prop_assert!(pair[0].end + 1 < pair[1].start);
        }
        for seg in &segments {
            prop_assert!(seg.start == start || bm.get(seg.start - 1));
            prop_assert!(seg.end == end || bm.get(seg.end + 1));
        }
    }
}
