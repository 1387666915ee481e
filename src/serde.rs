//! # Serde support for batch results
//!
//! `Precision` derives its serde implementation.
//! `Histogram` is implemented here by hand since serde does not cover arrays
//! of 64 elements: it is serialized as a sequence of its 64 bin counts, and
//! deserialization rejects sequences of any other length.
//! `PairwiseEstimates` serializes as `{"sketch_count": N, "values": [...]}` and
//! rejects inputs without exactly one value per pair. `UnionHistograms` rejects
//! inputs whose `width` does not match the precision or whose `data` does not
//! hold exactly `N * N` blocks.
//!
//! Refer to the serde documentation for more details on custom serialization and deserialization:
//! - [Serialization](https://serde.rs/impl-serialize.html)
//! - [Deserialization](https://serde.rs/impl-deserialize.html)
use serde::de::Error;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize};

use crate::histogram::{Histogram, BINS};
use crate::cpu::UnionHistograms;
use crate::pairs::PairwiseEstimates;
use crate::sketch::Precision;

impl Serialize for Histogram {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut tup = serializer.serialize_tuple(BINS)?;
        for count in self.counts() {
            tup.serialize_element(count)?;
        }
        tup.end()
    }
}

impl<'de> Deserialize<'de> for Histogram {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let counts: Vec<u32> = Deserialize::deserialize(deserializer)?;
        let counts: [u32; BINS] = counts
            .try_into()
            .map_err(|v: Vec<u32>| Error::invalid_length(v.len(), &"64 histogram bins"))?;
        Ok(Histogram::from_counts(counts))
    }
}

#[derive(Deserialize)]
struct PackedEstimates {
    sketch_count: usize,
    values: Vec<f64>,
}

impl<'de> Deserialize<'de> for PairwiseEstimates {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let packed = PackedEstimates::deserialize(deserializer)?;
        PairwiseEstimates::try_new(packed.sketch_count, packed.values).map_err(Error::custom)
    }
}

#[derive(Deserialize)]
struct DenseHistograms {
    precision: Precision,
    sketch_count: usize,
    width: usize,
    data: Vec<u32>,
}

impl<'de> Deserialize<'de> for UnionHistograms {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let dense = DenseHistograms::deserialize(deserializer)?;
        UnionHistograms::try_from_parts(dense.precision, dense.sketch_count, dense.width, dense.data)
            .map_err(Error::custom)
    }
}
