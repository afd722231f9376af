pub mod lbfgs;
pub mod nelder_mead;
pub mod newton;
pub mod trust_region;
