pub mod normalizer;

pub use normalizer::{NormalizeReport, Normalizer, RawRecord, RecordWarning};
