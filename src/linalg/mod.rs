pub mod faer_ndarray;
pub(crate) mod utils;
