/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate-transport
//!
//! The TCP edge of the gateway:
//! - [`ChannelSupplier`]: pluggable connector so tests can delay or fail
//!   outbound connects
//! - [`FixFrameCodec`] / [`IlinkFrameCodec`]: tokio-util codecs that cut
//!   complete frames out of the byte stream without interpreting them

pub mod codec;
pub mod supplier;

pub use codec::{FixFrameCodec, IlinkFrameCodec};
pub use supplier::{ChannelSupplier, DebugChannelSupplier, TcpChannelSupplier};
