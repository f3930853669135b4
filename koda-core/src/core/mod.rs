//! The agent core: turn engine, tool scheduler, stream orchestrator, session
//! state and their collaborators.

pub mod checkpoint;
pub mod compression;
pub mod events;
pub mod loop_detect;
pub mod orchestrator;
pub mod scheduler;
pub mod session;
pub mod turn;

pub use checkpoint::{
    CheckpointBundle, CheckpointStore, CheckpointToolCall, SessionCheckpointHook,
};
pub use compression::{CompressionConfig, Compressor};
pub use events::{ThoughtSummary, ToolCallRequestInfo, ToolCallResponseInfo, TurnEvent};
pub use orchestrator::{
    CancelHandle, CollectingSink, HistoryItem, HistorySink, InputProcessor, Orchestrator,
    OrchestratorError, OrchestratorOptions, ProcessedInput, StreamingState, SubmitOutcome,
};
pub use scheduler::{
    CheckpointHook, SchedulerEvent, ToolCallStatus, ToolScheduler, TrackedToolCall,
};
pub use session::{HistoryAccessor, Session};
pub use turn::Turn;
