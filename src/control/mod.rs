//! Remote control surfaces
//!
//! Two outbound channels exist: the fire-and-forget UDP parameter link to
//! the decoding pipeline, and the synchronous TCP control link to the SDR
//! front-end. Parameter families and bounds live here too — they are part
//! of the control contract.

pub mod params;
pub mod pipeline;
pub mod sdr;

pub use params::{ParamFamily, ParamSpec, TuneMode, ValueFormat};
pub use pipeline::PipelineLink;
pub use sdr::{SdrError, SdrLink, SdrResponse};
