#![no_main]

use hll_union::{Histogram, PairwiseEstimates};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(estimates) = serde_json::from_slice::<PairwiseEstimates>(data) {
        assert_eq!(estimates.iter().count(), estimates.len());
    }
    if let Ok(histogram) = serde_json::from_slice::<Histogram>(data) {
        let serialized = serde_json::to_vec(&histogram).unwrap();
        let deserialized: Histogram = serde_json::from_slice(&serialized).unwrap();
        assert_eq!(histogram, deserialized);
    }
});
