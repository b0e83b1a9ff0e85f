pub mod gate;
pub mod types;

pub use gate::{ConfirmationGate, ConfirmationHandler, HandlerError};
pub use types::{
    ConfirmationRequest, ConfirmationResponse, ConfirmationStatus, GateConfig, GateStatus,
};
