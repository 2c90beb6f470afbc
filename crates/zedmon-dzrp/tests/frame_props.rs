//! Property tests for the frame layer: arbitrary bodies survive an
//! encode/decode cycle, and split delivery never loses or duplicates frames.

use proptest::prelude::*;

use zedmon_dzrp::frame::{encode_frame, try_decode_frames};

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

    #[test]
    fn bodies_round_trip(body in proptest::collection::vec(any::<u8>(), 1..512)) {
        let wire = encode_frame(&body);
        let (views, consumed) = try_decode_frames(&wire).unwrap();
        prop_assert_eq!(consumed, wire.len());
        prop_assert_eq!(views.len(), 1);
        prop_assert_eq!(views[0].body, &body[..]);
    }

    #[test]
    fn split_point_never_corrupts(
        body_a in proptest::collection::vec(any::<u8>(), 1..64),
        body_b in proptest::collection::vec(any::<u8>(), 1..64),
        cut_seed in any::<usize>(),
    ) {
        let mut wire = encode_frame(&body_a);
        wire.extend_from_slice(&encode_frame(&body_b));
        let cut = cut_seed % wire.len();

        // First half: decodes zero or one frame, consumes only whole frames.
        let (first, consumed) = try_decode_frames(&wire[..cut]).unwrap();
        prop_assert!(first.len() <= 1);

        // Stitch the remainder on, as the transport's buffer would.
        let mut rest = wire[consumed..cut].to_vec();
        rest.extend_from_slice(&wire[cut..]);
        let (second, _) = try_decode_frames(&rest).unwrap();
        prop_assert_eq!(first.len() + second.len(), 2);

        let mut bodies: Vec<Vec<u8>> = Vec::new();
        bodies.extend(first.iter().map(|f| f.body.to_vec()));
        bodies.extend(second.iter().map(|f| f.body.to_vec()));
        prop_assert_eq!(bodies, vec![body_a, body_b]);
    }
}
