pub mod result;

pub use result::StoredResult;
