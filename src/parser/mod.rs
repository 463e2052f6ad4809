//! Mail decomposition: MIME part walking, HTML body classification and
//! reference chain resolution.

pub mod classify;
pub mod mime;
pub mod references;
