pub(crate) mod bitstream;
pub(crate) mod driver;
pub(crate) mod ffmpeg;
pub(crate) mod soft;
pub(crate) mod stage;
