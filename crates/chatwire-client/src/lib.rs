//! Streaming chat client for two backend protocols.
//!
//! Bytes from the network go through [`decoder::FrameDecoder`], become
//! [`chatwire_core::ProtocolFrame`]s in a [`adapters::ProviderAdapter`], and are
//! merged into the timeline by [`dispatch::EventDispatcher`] under the control
//! of a [`ChatSession`].

pub mod accumulator;
pub mod adapters;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod history;
pub mod session;
pub mod stream;

pub use accumulator::MessageAccumulator;
pub use adapters::{build_adapter, ChatRequest, PredictAdapter, ProviderAdapter, UiStreamAdapter};
pub use config::{ChatConfig, FlowSettings, PredictConfig, ProviderConfig, SessionConfig, UiStreamConfig};
pub use decoder::FrameDecoder;
pub use dispatch::{Effect, EventDispatcher};
pub use history::HistoryWindow;
pub use session::{ChatSession, SendOutcome, SessionSnapshot, SessionStatus};
pub use stream::FrameStream;
