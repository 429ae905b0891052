// Frame module — wire framing for radio messages

pub mod codec;

pub use codec::{
    decode, encode, Frame, FrameError, FRAME_HEADER_LEN, MAX_FRAME_LEN, MAX_PAYLOAD,
};
