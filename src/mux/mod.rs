pub(crate) mod multiplexer;
