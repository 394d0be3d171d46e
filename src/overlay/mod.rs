pub(crate) mod bitmap;
pub(crate) mod provider;
pub(crate) mod vector;
