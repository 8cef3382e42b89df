pub mod flush;
pub mod muxer;
pub mod naming;
pub mod retime;
