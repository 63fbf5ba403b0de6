pub mod c_resource;
pub mod client;
pub mod error;
pub mod frame;
pub mod libav;
pub mod net;
pub mod pipeline;
pub mod server;
pub mod stop;

pub use client::{FrameSink, GrowingSpace};
pub use error::CastError;
pub use frame::{Frame, FrameHeader, PixelFormat};
pub use server::SERVER_PORT;
pub use stop::Stop;
