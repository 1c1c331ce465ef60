pub mod condition;
pub mod engine;
pub mod events;
pub mod executor;
pub mod instance;
pub mod registry;
pub mod state;
pub mod step;

pub use condition::{Condition, Decision};
pub use engine::{Engine, EventReport};
pub use events::{EventKind, EventState};
pub use executor::{Collaborators, StepExecutor, StepOutcome};
pub use instance::{Attachment, InstanceSnapshot, SenderIdentity, WaitingOn, WorkflowId, WorkflowInstance};
pub use registry::{InstanceHandle, Registry};
pub use state::ExecutionState;
pub use step::{parse_steps, parse_workflow_payload, Step, STEP_TYPES};
