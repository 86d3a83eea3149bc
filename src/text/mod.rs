/*! Text layer: normalization, shingling and document fingerprints.

Everything here is pure and deterministic. The same [normalize] is used
at index time and at query time; any asymmetry between the two paths is
a correctness bug.
!*/
mod minhash;
mod normalizer;
mod shingles;
mod simhash;

pub use minhash::band_key;
pub use minhash::LshBuckets;
pub use minhash::MinHasher;
pub use minhash::EMPTY_SLOT;
pub use normalizer::normalize;
pub use shingles::position_map;
pub use shingles::shingle_set;
pub use shingles::shingles;
pub use simhash::simhash128;
pub use simhash::SimHash128;
