//! Sparse matrix storage for tabularized features.

pub mod csr;

pub use csr::CsrMatrix;
