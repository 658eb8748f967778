//! Property tests for bulk transfer segmentation
//!
//! Verifies that for any payload length the spans count, sizing, and
//! ordering follow the segmentation rule, and that reassembling the spans
//! reconstructs the original payload.

use proptest::prelude::*;
use protocol::{TRANSFER_CAPACITY, chunk_spans};

proptest! {
    #[test]
    fn span_count_and_sizes_follow_capacity(len in 0usize..200_000) {
        let spans: Vec<_> = chunk_spans(0, len, TRANSFER_CAPACITY).collect();

        prop_assert_eq!(spans.len(), len.div_ceil(TRANSFER_CAPACITY));

        if let Some((last, full)) = spans.split_last() {
            for span in full {
                prop_assert_eq!(span.len(), TRANSFER_CAPACITY);
            }

            let expected_tail = match len % TRANSFER_CAPACITY {
                0 => TRANSFER_CAPACITY,
                tail => tail,
            };
            prop_assert_eq!(last.len(), expected_tail);
        }
    }

    #[test]
    fn spans_are_contiguous_and_ordered(
        offset in 0usize..1024,
        len in 0usize..100_000,
        capacity in 1usize..4096,
    ) {
        let spans: Vec<_> = chunk_spans(offset, len, capacity).collect();

        let mut expected_start = offset;
        for span in &spans {
            prop_assert_eq!(span.start, expected_start);
            prop_assert!(span.len() <= capacity);
            prop_assert!(!span.is_empty());
            expected_start = span.end;
        }
        prop_assert_eq!(expected_start, offset + len);
    }

    #[test]
    fn reassembled_spans_reconstruct_payload(payload in proptest::collection::vec(any::<u8>(), 0..50_000)) {
        let capacity = 4096;
        let mut reassembled = Vec::with_capacity(payload.len());

        for span in chunk_spans(0, payload.len(), capacity) {
            reassembled.extend_from_slice(&payload[span]);
        }

        prop_assert_eq!(reassembled, payload);
    }
}
