pub mod buffered;
pub mod flight;
pub mod handler;
pub mod markup;
pub mod mode;
pub mod orchestrator;
pub mod prepass;
pub mod sink;
pub mod writer;

pub use flight::FlightMultiplexer;
pub use handler::{RenderOutput, ServerHandler};
pub use mode::{select_render_mode, RenderMode};
pub use orchestrator::{RenderPhase, RenderState, StreamOrchestrator};
pub use sink::{ResponseParts, ResponseSink};
pub use writer::DrainGatedWriter;
