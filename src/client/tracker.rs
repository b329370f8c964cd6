use chrono::Utc;
use uuid::Uuid;

use crate::client::{ClientError, JobGateway};
use crate::domain::request::{RequestStatus, ServiceRequest, TransitionError};

/// Tracks one job from a worker's point of view.
///
/// Status changes are shown immediately and confirmed by the server afterwards.
/// A failed write puts the last confirmed document back; a conflict re-reads the
/// job so the view matches whatever the server now holds.
pub struct JobTracker<G: JobGateway> {
    gateway: G,
    worker_id: Uuid,
    confirmed: ServiceRequest,
    shown: ServiceRequest,
}

impl<G: JobGateway> JobTracker<G> {
    pub fn new(gateway: G, worker_id: Uuid, job: ServiceRequest) -> Self {
        Self {
            gateway,
            worker_id,
            shown: job.clone(),
            confirmed: job,
        }
    }

    /// What the UI should display right now, including any unconfirmed change.
    pub fn current(&self) -> &ServiceRequest {
        &self.shown
    }

    pub fn confirmed(&self) -> &ServiceRequest {
        &self.confirmed
    }

    pub fn is_pending_confirmation(&self) -> bool {
        self.shown != self.confirmed
    }

    #[tracing::instrument(skip(self), fields(request_id = %self.confirmed.id, worker_id = %self.worker_id))]
    pub async fn accept(&mut self) -> Result<&ServiceRequest, ClientError> {
        self.confirmed.check_accept()?;

        let mut optimistic = self.confirmed.clone();
        optimistic.status = RequestStatus::Accepted;
        optimistic.assigned_to = Some(self.worker_id);
        optimistic.accepted_at = Some(Utc::now());
        optimistic.updated_at = Utc::now();
        self.shown = optimistic;

        let result = self.gateway.accept(self.confirmed.id).await;
        self.settle(result).await
    }

    /// Moves the job to its next status.
    #[tracing::instrument(skip(self), fields(request_id = %self.confirmed.id, worker_id = %self.worker_id))]
    pub async fn advance(&mut self) -> Result<&ServiceRequest, ClientError> {
        let from = self.confirmed.status;
        let next = from.next().ok_or(if from.is_terminal() {
            TransitionError::Terminal(from)
        } else {
            TransitionError::Invalid {
                from,
                to: RequestStatus::EnRoute,
            }
        })?;
        self.confirmed.check_advance(self.worker_id, next)?;

        let mut optimistic = self.confirmed.clone();
        optimistic.status = next;
        optimistic.updated_at = Utc::now();
        self.shown = optimistic;

        let result = self.gateway.advance(self.confirmed.id, next).await;
        self.settle(result).await
    }

    async fn settle(
        &mut self,
        result: Result<ServiceRequest, ClientError>,
    ) -> Result<&ServiceRequest, ClientError> {
        match result {
            Ok(server) => {
                self.confirmed = server.clone();
                self.shown = server;
                Ok(&self.shown)
            }
            Err(ClientError::Conflict(message)) => {
                tracing::info!(%message, "server rejected change, reconciling");
                match self.gateway.fetch(self.confirmed.id).await {
                    Ok(fresh) => {
                        self.confirmed = fresh.clone();
                        self.shown = fresh;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reconciliation fetch failed, rolling back");
                        self.shown = self.confirmed.clone();
                    }
                }
                Err(ClientError::Conflict(message))
            }
            Err(e) => {
                tracing::warn!(error = %e, "change failed, rolling back");
                self.shown = self.confirmed.clone();
                Err(e)
            }
        }
    }
}
