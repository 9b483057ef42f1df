// The internal layers of the surveillance engine, from raw pixel data up
// to the consensus motion verdict. `pipeline` composes these; external
// consumers normally only need `frame::Frame` and the detector types it
// re-exports.

pub mod background_model;
pub mod buffers;
pub mod frame;
pub mod motion_detector;
pub mod region;
pub mod trajectory;
pub mod transforms;
