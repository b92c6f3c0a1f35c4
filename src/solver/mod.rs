//! GLMNet solver: likelihood adapter, inner coordinate-descent sweep and the
//! outer iteration driver.

pub mod driver;
pub mod fisher;
pub mod sweep;
