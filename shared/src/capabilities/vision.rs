use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vision::AnalysisRequest;
use crate::{AppError, ErrorKind};

/// The external vision model, as one request/response exchange.
///
/// The shell holds the credential and performs the network call; the core
/// only sees the request it built and the payload text that came back.
pub struct Vision<Ev> {
    context: CapabilityContext<VisionOperation, Ev>,
}

impl<Ev> Capability<Ev> for Vision<Ev> {
    type Operation = VisionOperation;
    type MappedSelf<MappedEv> = Vision<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Vision::new(self.context.map_event(f))
    }
}

impl<Ev> Vision<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<VisionOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn analyze<F>(&self, request: AnalysisRequest, make_event: F)
    where
        F: FnOnce(VisionResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(VisionOperation::Analyze(request))
                .await;
            context.update_app(make_event(result));
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum VisionOperation {
    Analyze(AnalysisRequest),
}

impl Operation for VisionOperation {
    type Output = VisionResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisionResponse {
    /// Text of the model's answer, `None` when the provider sent none.
    pub text: Option<String>,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum VisionError {
    #[error("vision service unreachable: {message}")]
    Transport { message: String },

    #[error("vision service rejected the credential")]
    Unauthorized,

    #[error("vision service rate limit reached")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("vision service rejected the request: {message}")]
    Rejected { message: String },
}

impl From<VisionError> for AppError {
    fn from(e: VisionError) -> Self {
        match &e {
            VisionError::Transport { .. } => AppError::new(ErrorKind::Network, e.to_string()),
            VisionError::Unauthorized => AppError::new(ErrorKind::Authentication, e.to_string()),
            VisionError::RateLimited { retry_after_ms } => {
                let err = AppError::new(ErrorKind::RateLimited, e.to_string());
                match retry_after_ms {
                    Some(ms) => err.with_retry_after(*ms),
                    None => err,
                }
            }
            VisionError::Rejected { .. } => {
                AppError::new(ErrorKind::AnalysisRejected, e.to_string())
            }
        }
    }
}

pub type VisionResult = Result<VisionResponse, VisionError>;
