pub(crate) mod blend;
pub(crate) mod compositor;
pub(crate) mod context;
pub(crate) mod surface;
