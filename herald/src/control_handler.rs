//! Control handler for a running herald instance
//!
//! Implements [`CommandHandler`] over a [`DispatchService`]. Failures are
//! answered as error responses carrying the dispatcher's error code, so the
//! connection stays usable.

use std::{str::FromStr, sync::Arc, time::Instant};

use async_trait::async_trait;
use herald_common::{BatchId, EmailId};
use herald_control::{
    AuditCommand, AuditEntry, JobCommand, JobStatus, RecoveryCommand, Request, RequestCommand,
    Response, ResponseData, SystemCommand, SystemStatus, server::CommandHandler,
};
use herald_dispatch::{DispatchError, DispatchService};
use herald_store::AuditFilter;

/// Handler for control commands
pub struct HeraldControlHandler {
    dispatch: Arc<dyn DispatchService>,
    /// For uptime
    start_time: Instant,
}

impl HeraldControlHandler {
    #[must_use]
    pub fn new(dispatch: Arc<dyn DispatchService>) -> Self {
        Self {
            dispatch,
            start_time: Instant::now(),
        }
    }

    fn system(&self, command: &SystemCommand) -> Response {
        match command {
            SystemCommand::Ping => Response::data(ResponseData::Message("pong".to_string())),
            SystemCommand::Status => Response::data(ResponseData::SystemStatus(SystemStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: self.start_time.elapsed().as_secs(),
                dispatch: self.dispatch.status(),
            })),
        }
    }

    async fn job(
        &self,
        command: JobCommand,
        actor: Option<String>,
    ) -> Result<ResponseData, Response> {
        match command {
            JobCommand::Submit(mut submission) => {
                if submission.owner.is_none() {
                    submission.owner = actor;
                }
                let submitted = self.dispatch.submit(submission).await.map_err(refuse)?;
                Ok(ResponseData::Submitted(Box::new(submitted)))
            }
            JobCommand::Enqueue { email_id } => {
                let id = parse_id::<EmailId>(&email_id)?;
                self.dispatch.enqueue(id).await.map_err(refuse)?;
                Ok(ResponseData::Message(format!("Email {id} queued")))
            }
            JobCommand::Process { email_id } => {
                let id = parse_id::<EmailId>(&email_id)?;
                let status = self.dispatch.process(id).await.map_err(refuse)?;
                Ok(ResponseData::JobStatus(JobStatus {
                    email_id: id,
                    status: status.to_string(),
                }))
            }
            JobCommand::Retry { email_id } => {
                let id = parse_id::<EmailId>(&email_id)?;
                let report = self.dispatch.retry(id, actor).await.map_err(refuse)?;
                Ok(ResponseData::Retry(report))
            }
            JobCommand::View { email_id } => {
                let id = parse_id::<EmailId>(&email_id)?;
                let view = self.dispatch.view(id).await.map_err(refuse)?;
                Ok(ResponseData::Job(Box::new(view)))
            }
        }
    }

    async fn audit(&self, command: AuditCommand) -> Result<ResponseData, Response> {
        let filter = match command {
            AuditCommand::Email { email_id } => AuditFilter::Email(parse_id(&email_id)?),
            AuditCommand::Batch { batch_id } => AuditFilter::Batch(parse_id::<BatchId>(&batch_id)?),
        };

        let events = self.dispatch.audit(filter).await.map_err(refuse)?;
        Ok(ResponseData::Audit(
            events.iter().map(AuditEntry::from).collect(),
        ))
    }
}

#[async_trait]
impl CommandHandler for HeraldControlHandler {
    async fn handle_request(&self, request: Request) -> herald_control::Result<Response> {
        let Request { actor, command, .. } = request;

        let result = match command {
            RequestCommand::System(command) => Ok(self.system(&command)),
            RequestCommand::Job(command) => self.job(command, actor).await.map(Response::data),
            RequestCommand::Audit(command) => self.audit(command).await.map(Response::data),
            RequestCommand::Recovery(RecoveryCommand::Run) => Ok(Response::data(
                ResponseData::Recovery(self.dispatch.recover().await),
            )),
        };

        Ok(result.unwrap_or_else(|refusal| refusal))
    }
}

fn refuse(error: DispatchError) -> Response {
    tracing::debug!(error = %error, code = error.code(), "Control command refused");
    Response::error_with_code(error.code(), error.to_string())
}

fn parse_id<T>(value: &str) -> Result<T, Response>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| Response::error_with_code("INVALID_ID", e.to_string()))
}
