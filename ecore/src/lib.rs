pub mod buf;
pub mod codec;
pub mod descriptor;
