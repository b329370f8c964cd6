use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::domain::completed_job::CompletedJob;
use crate::domain::display::status_badge;
use crate::domain::geo::{PositionFix, RankedRequest, SortMode, rank_requests};
use crate::domain::notification::NotificationType;
use crate::domain::request::{Actor, NewServiceRequest, RequestStatus, ServiceRequest};
use crate::domain::user::Role;
use crate::usecase::contracts::{
    NotificationRepository, RequestRepository, ReverseGeocoder, UserRepository,
};
use crate::usecase::error::UsecaseError;
use crate::usecase::events::{EventPublisher, RequestEvent};
use crate::usecase::feed::{Feeds, Subscription};
use crate::usecase::notifications::NotificationsUseCase;

pub struct RequestsUseCase<R, N, U, G>
where
    R: RequestRepository,
    N: NotificationRepository,
    U: UserRepository,
    G: ReverseGeocoder,
{
    request_repository: R,
    notifications: NotificationsUseCase<N>,
    user_repository: U,
    geocoder: G,
    feeds: Arc<Feeds>,
    events: EventPublisher,
    max_fix_age: Duration,
}

impl<R, N, U, G> RequestsUseCase<R, N, U, G>
where
    R: RequestRepository,
    N: NotificationRepository,
    U: UserRepository,
    G: ReverseGeocoder,
{
    pub fn new(
        request_repository: R,
        notifications: NotificationsUseCase<N>,
        user_repository: U,
        geocoder: G,
        feeds: Arc<Feeds>,
        events: EventPublisher,
        max_fix_age: Duration,
    ) -> Self {
        Self {
            request_repository,
            notifications,
            user_repository,
            geocoder,
            feeds,
            events,
            max_fix_age,
        }
    }

    #[tracing::instrument(skip(self, input), fields(user_id = %user_id, service_type = %input.service_type))]
    pub async fn create_request(
        &self,
        user_id: Uuid,
        mut input: NewServiceRequest,
    ) -> Result<ServiceRequest, UsecaseError> {
        tracing::debug!("creating service request");

        if !input.location.point().is_valid() {
            tracing::warn!(lat = input.location.lat, lng = input.location.lng, "invalid coordinates");
            return Err(UsecaseError::Validation(
                "Location must be a valid latitude/longitude".to_string(),
            ));
        }

        let has_address = input
            .location
            .address
            .as_deref()
            .is_some_and(|a| !a.trim().is_empty());
        if !has_address {
            input.location.address = self
                .geocoder
                .reverse(input.location.lat, input.location.lng)
                .await;
        }

        let request = ServiceRequest::new(user_id, input);
        self.request_repository.create(&request).await?;

        metrics::counter!("requests_created_total", "service_type" => request.service_type.as_str()).increment(1);
        tracing::info!(request_id = %request.id, "service request created");

        self.refresh_pending().await;
        self.events.publish(&RequestEvent::new(&request, user_id)).await;
        Ok(request)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_my_requests(&self, user_id: Uuid) -> Result<Vec<ServiceRequest>, UsecaseError> {
        tracing::debug!("listing requests for user");

        let requests = self.request_repository.find_by_user_id(user_id).await?;

        tracing::debug!(%user_id, count = requests.len(), "retrieved user requests");
        Ok(requests)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id, request_id = %request_id, %role))]
    pub async fn get_request(
        &self,
        user_id: Uuid,
        role: Role,
        request_id: Uuid,
    ) -> Result<ServiceRequest, UsecaseError> {
        let request = self.load(request_id).await?;

        let visible = role == Role::Admin
            || request.is_participant(user_id)
            || (role == Role::Mechanic && request.status == RequestStatus::Pending);
        if !visible {
            tracing::warn!("unauthorized request access attempt");
            return Err(UsecaseError::NotFound("Request".to_string()));
        }

        Ok(request)
    }

    /// Applies the configured maximum fix age; stale or invalid fixes give no reference point.
    pub fn reference_point(&self, fix: Option<PositionFix>) -> Option<crate::domain::request::GeoPoint> {
        fix.and_then(|f| f.usable(Utc::now(), self.max_fix_age))
    }

    #[tracing::instrument(skip(self, fix), fields(?sort))]
    pub async fn list_pending(
        &self,
        sort: SortMode,
        fix: Option<PositionFix>,
    ) -> Result<Vec<RankedRequest>, UsecaseError> {
        let pending = self.request_repository.find_pending().await?;
        let reference = self.reference_point(fix);

        tracing::debug!(count = pending.len(), has_reference = reference.is_some(), "ranking pending requests");
        Ok(rank_requests(&pending, sort, reference))
    }

    pub async fn subscribe_pending(&self) -> Result<Subscription<ServiceRequest>, UsecaseError> {
        let subscription = self
            .feeds
            .pending
            .subscribe((), || self.request_repository.find_pending())
            .await?;
        Ok(subscription)
    }

    #[tracing::instrument(skip(self), fields(worker_id = %worker_id, request_id = %request_id))]
    pub async fn accept_request(
        &self,
        worker_id: Uuid,
        request_id: Uuid,
    ) -> Result<ServiceRequest, UsecaseError> {
        tracing::debug!("accepting request");

        let request = self.load(request_id).await?;
        request.check_accept()?;

        let Some(accepted) = self
            .request_repository
            .accept_pending(request_id, worker_id, Utc::now())
            .await?
        else {
            metrics::counter!("request_conflicts_total", "transition" => "accept").increment(1);
            tracing::info!("request was claimed by another worker");
            return Err(self.conflict(request_id).await);
        };

        metrics::counter!("request_transitions_total", "to" => "accepted").increment(1);
        tracing::info!(%request_id, %worker_id, "request accepted");

        self.refresh_pending().await;

        let worker_name = self.display_name(worker_id, "A mechanic").await;
        self.notify(
            accepted.user_id,
            NotificationType::Assignment,
            "Request accepted".to_string(),
            format!("{worker_name} accepted your {} request.", accepted.service_type),
            &accepted,
        )
        .await;
        self.events.publish(&RequestEvent::new(&accepted, worker_id)).await;

        Ok(accepted)
    }

    /// Moves an accepted request one step along `accepted → en_route → arrived → started → completed`.
    #[tracing::instrument(skip(self), fields(worker_id = %worker_id, request_id = %request_id, %to))]
    pub async fn advance_status(
        &self,
        worker_id: Uuid,
        request_id: Uuid,
        to: RequestStatus,
    ) -> Result<ServiceRequest, UsecaseError> {
        tracing::debug!("advancing request status");

        let request = self.load(request_id).await?;
        request.check_advance(worker_id, to)?;

        let updated = if to == RequestStatus::Completed {
            self.complete(&request, worker_id).await?
        } else {
            self.request_repository
                .advance_status(request_id, worker_id, request.status, to, Utc::now())
                .await?
        };

        let Some(updated) = updated else {
            metrics::counter!("request_conflicts_total", "transition" => to.as_str()).increment(1);
            return Err(self.conflict(request_id).await);
        };

        metrics::counter!("request_transitions_total", "to" => to.as_str()).increment(1);
        tracing::info!(%request_id, from = %request.status, %to, "request status advanced");

        let (title, body) = match to {
            RequestStatus::EnRoute => ("Mechanic on the way", "Your mechanic is heading to your location."),
            RequestStatus::Arrived => ("Mechanic arrived", "Your mechanic has arrived at your location."),
            RequestStatus::Started => ("Service started", "Work on your vehicle has started."),
            _ => ("Job completed", "Your service request has been completed."),
        };
        self.notify(
            updated.user_id,
            NotificationType::RequestUpdate,
            title.to_string(),
            body.to_string(),
            &updated,
        )
        .await;
        self.events.publish(&RequestEvent::new(&updated, worker_id)).await;

        Ok(updated)
    }

    async fn complete(
        &self,
        request: &ServiceRequest,
        worker_id: Uuid,
    ) -> Result<Option<ServiceRequest>, UsecaseError> {
        let (customer_name, customer_phone) = match self.user_repository.find_by_id(request.user_id).await {
            Ok(Some(user)) => (user.name, user.phone),
            Ok(None) => ("Customer".to_string(), None),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load customer profile for archive");
                ("Customer".to_string(), None)
            }
        };

        let job = CompletedJob::from_request(request, worker_id, customer_name, customer_phone, Utc::now());
        let completed = self
            .request_repository
            .complete(request.id, worker_id, &job)
            .await
            .inspect_err(|e| {
                tracing::error!(request_id = %request.id, error = %e, "failed to complete and archive request");
            })?;

        if completed.is_some() {
            tracing::info!(request_id = %request.id, job_id = %job.id, "completed job archived");
        }
        Ok(completed)
    }

    #[tracing::instrument(skip(self, reason), fields(actor_id = %actor_id, request_id = %request_id))]
    pub async fn cancel_request(
        &self,
        actor_id: Uuid,
        request_id: Uuid,
        reason: Option<String>,
    ) -> Result<ServiceRequest, UsecaseError> {
        tracing::debug!("cancelling request");

        let request = self.load(request_id).await?;
        let actor = if request.user_id == actor_id {
            Actor::Requester(actor_id)
        } else {
            Actor::Worker(actor_id)
        };
        request.check_cancel(actor)?;

        let Some(cancelled) = self
            .request_repository
            .cancel(request_id, request.status, Utc::now())
            .await?
        else {
            metrics::counter!("request_conflicts_total", "transition" => "cancelled").increment(1);
            return Err(self.conflict(request_id).await);
        };

        metrics::counter!("request_transitions_total", "to" => "cancelled").increment(1);
        tracing::info!(%request_id, from = %request.status, "request cancelled");

        if request.status == RequestStatus::Pending {
            self.refresh_pending().await;
        }

        if let Some(other) = request.counterparty(actor_id) {
            let who = match actor {
                Actor::Requester(_) => "The customer",
                Actor::Worker(_) => "Your mechanic",
            };
            let body = match reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
                Some(reason) => format!("{who} cancelled the request: {reason}"),
                None => format!("{who} cancelled the request."),
            };
            self.notify(
                other,
                NotificationType::RequestUpdate,
                "Request cancelled".to_string(),
                body,
                &cancelled,
            )
            .await;
        }
        self.events.publish(&RequestEvent::new(&cancelled, actor_id)).await;

        Ok(cancelled)
    }

    async fn load(&self, request_id: Uuid) -> Result<ServiceRequest, UsecaseError> {
        self.request_repository
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| UsecaseError::NotFound("Request".to_string()))
    }

    /// Re-reads a request whose conditional write matched nothing and explains why.
    async fn conflict(&self, request_id: Uuid) -> UsecaseError {
        match self.request_repository.find_by_id(request_id).await {
            Ok(Some(current)) => UsecaseError::Conflict(format!(
                "Request was updated concurrently and is now {}",
                current.status
            )),
            Ok(None) => UsecaseError::NotFound("Request".to_string()),
            Err(e) => e.into(),
        }
    }

    async fn refresh_pending(&self) {
        self.feeds
            .pending
            .refresh(&(), || self.request_repository.find_pending())
            .await;
    }

    async fn display_name(&self, user_id: Uuid, fallback: &str) -> String {
        match self.user_repository.find_by_id(user_id).await {
            Ok(Some(user)) => user.name,
            _ => fallback.to_string(),
        }
    }

    /// Side-effect notifications never fail the transition that caused them.
    async fn notify(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        title: String,
        body: String,
        request: &ServiceRequest,
    ) {
        let data = json!({
            "request_id": request.id,
            "status": request.status,
            "status_label": status_badge(request.status).label,
        });
        if let Err(e) = self
            .notifications
            .notify(user_id, notification_type, title, body, data)
            .await
        {
            tracing::error!(%user_id, request_id = %request.id, error = %e, "failed to send notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::domain::geo::SortMode;
    use crate::domain::request::{GeoPoint, Location, ServiceType, Urgency, VehicleType, sample_request};
    use crate::repository::errors::RepositoryError;
    use crate::usecase::contracts::{
        MockNotificationRepository, MockRequestRepository, MockReverseGeocoder, MockUserRepository,
    };
    use mockall::predicate::eq;

    type TestUseCase = RequestsUseCase<
        MockRequestRepository,
        MockNotificationRepository,
        MockUserRepository,
        MockReverseGeocoder,
    >;

    fn quiet_notifications() -> MockNotificationRepository {
        let mut repo = MockNotificationRepository::new();
        repo.expect_create().returning(|_| Ok(()));
        repo
    }

    fn anonymous_users() -> MockUserRepository {
        let mut repo = MockUserRepository::new();
        repo.expect_find_by_id().returning(|_| Ok(None));
        repo
    }

    fn build(
        requests: MockRequestRepository,
        notifications: MockNotificationRepository,
        users: MockUserRepository,
        geocoder: MockReverseGeocoder,
    ) -> TestUseCase {
        let feeds = Arc::new(Feeds::new(16));
        RequestsUseCase::new(
            requests,
            NotificationsUseCase::new(notifications, feeds.clone()),
            users,
            geocoder,
            feeds,
            EventPublisher::disabled(),
            Duration::seconds(60),
        )
    }

    fn new_input(address: Option<&str>) -> NewServiceRequest {
        NewServiceRequest {
            service_type: ServiceType::Tow,
            vehicle_type: VehicleType::Suv,
            description: None,
            urgency: Urgency::Emergency,
            location: Location {
                lat: 40.0,
                lng: -74.0,
                address: address.map(str::to_string),
            },
            photo_url: None,
        }
    }

    fn with(mut request: ServiceRequest, status: RequestStatus, assigned_to: Option<Uuid>) -> ServiceRequest {
        request.status = status;
        request.assigned_to = assigned_to;
        request
    }

    #[tokio::test]
    async fn test_create_request_rejects_invalid_location() {
        let mut requests = MockRequestRepository::new();
        requests.expect_create().times(0);
        let mut geocoder = MockReverseGeocoder::new();
        geocoder.expect_reverse().times(0);

        let usecase = build(requests, quiet_notifications(), anonymous_users(), geocoder);
        let mut input = new_input(None);
        input.location.lat = 123.0;

        let result = usecase.create_request(Uuid::new_v4(), input).await;
        assert!(matches!(result, Err(UsecaseError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_request_resolves_address() {
        let mut requests = MockRequestRepository::new();
        requests
            .expect_create()
            .withf(|r| r.status == RequestStatus::Pending && r.assigned_to.is_none())
            .times(1)
            .returning(|_| Ok(()));
        let mut geocoder = MockReverseGeocoder::new();
        geocoder
            .expect_reverse()
            .with(eq(40.0), eq(-74.0))
            .times(1)
            .returning(|_, _| Some("5 Main St, Springfield".to_string()));

        let usecase = build(requests, quiet_notifications(), anonymous_users(), geocoder);
        let user_id = Uuid::new_v4();

        let request = usecase.create_request(user_id, new_input(None)).await.unwrap();
        assert_eq!(request.user_id, user_id);
        assert_eq!(request.location.address.as_deref(), Some("5 Main St, Springfield"));
    }

    #[tokio::test]
    async fn test_create_request_keeps_given_address_and_degrades_without_one() {
        let mut requests = MockRequestRepository::new();
        requests.expect_create().times(2).returning(|_| Ok(()));
        let mut geocoder = MockReverseGeocoder::new();
        geocoder.expect_reverse().times(1).returning(|_, _| None);

        let usecase = build(requests, quiet_notifications(), anonymous_users(), geocoder);

        let given = usecase
            .create_request(Uuid::new_v4(), new_input(Some("Exit 12, I-95")))
            .await
            .unwrap();
        assert_eq!(given.location.address.as_deref(), Some("Exit 12, I-95"));

        let unresolved = usecase.create_request(Uuid::new_v4(), new_input(None)).await.unwrap();
        assert!(unresolved.location.address.is_none());
        assert_eq!(unresolved.location.display(), "40.00000, -74.00000");
    }

    #[tokio::test]
    async fn test_accept_request_notifies_requester() {
        let worker = Uuid::new_v4();
        let pending = sample_request(RequestStatus::Pending, None);
        let request_id = pending.id;
        let requester = pending.user_id;
        let accepted = with(pending.clone(), RequestStatus::Accepted, Some(worker));

        let mut requests = MockRequestRepository::new();
        requests
            .expect_find_by_id()
            .with(eq(request_id))
            .times(1)
            .returning(move |_| Ok(Some(pending.clone())));
        requests
            .expect_accept_pending()
            .withf(move |id, w, _| *id == request_id && *w == worker)
            .times(1)
            .returning(move |_, _, _| Ok(Some(accepted.clone())));

        let mut notifications = MockNotificationRepository::new();
        notifications
            .expect_create()
            .withf(move |n| n.user_id == requester && n.notification_type == NotificationType::Assignment)
            .times(1)
            .returning(|_| Ok(()));

        let usecase = build(requests, notifications, anonymous_users(), MockReverseGeocoder::new());
        let result = usecase.accept_request(worker, request_id).await.unwrap();

        assert_eq!(result.status, RequestStatus::Accepted);
        assert_eq!(result.assigned_to, Some(worker));
    }

    #[tokio::test]
    async fn test_concurrent_accepts_have_one_winner() {
        let pending = sample_request(RequestStatus::Pending, None);
        let request_id = pending.id;
        let winner: Arc<Mutex<Option<Uuid>>> = Arc::new(Mutex::new(None));
        let reads = Arc::new(Mutex::new(0usize));

        let mut requests = MockRequestRepository::new();
        {
            let winner = winner.clone();
            let pending = pending.clone();
            // both workers read the request while it is still pending
            requests.expect_find_by_id().returning(move |_| {
                let mut n = reads.lock().unwrap();
                *n += 1;
                match *winner.lock().unwrap() {
                    Some(w) if *n > 2 => Ok(Some(with(pending.clone(), RequestStatus::Accepted, Some(w)))),
                    _ => Ok(Some(pending.clone())),
                }
            });
        }
        {
            let winner = winner.clone();
            let pending = pending.clone();
            requests.expect_accept_pending().times(2).returning(move |_, worker, _| {
                let mut slot = winner.lock().unwrap();
                if slot.is_some() {
                    return Ok(None);
                }
                *slot = Some(worker);
                Ok(Some(with(pending.clone(), RequestStatus::Accepted, Some(worker))))
            });
        }

        let usecase = build(requests, quiet_notifications(), anonymous_users(), MockReverseGeocoder::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (ra, rb) = tokio::join!(usecase.accept_request(a, request_id), usecase.accept_request(b, request_id));

        let outcomes = [ra, rb];
        let successes: Vec<&ServiceRequest> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(successes.len(), 1);
        assert!(outcomes.iter().any(|r| matches!(r, Err(UsecaseError::Conflict(_)))));

        let assignee = winner.lock().unwrap().expect("one worker must win");
        assert_eq!(successes[0].assigned_to, Some(assignee));
    }

    #[tokio::test]
    async fn test_accept_missing_request() {
        let mut requests = MockRequestRepository::new();
        requests.expect_find_by_id().returning(|_| Ok(None));
        requests.expect_accept_pending().times(0);

        let usecase = build(requests, quiet_notifications(), anonymous_users(), MockReverseGeocoder::new());
        let result = usecase.accept_request(Uuid::new_v4(), Uuid::new_v4()).await;

        assert!(matches!(result, Err(UsecaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_advance_by_other_worker_is_forbidden() {
        let worker = Uuid::new_v4();
        let request = sample_request(RequestStatus::Accepted, Some(worker));
        let request_id = request.id;

        let mut requests = MockRequestRepository::new();
        requests.expect_find_by_id().returning(move |_| Ok(Some(request.clone())));
        requests.expect_advance_status().times(0);

        let usecase = build(requests, quiet_notifications(), anonymous_users(), MockReverseGeocoder::new());
        let result = usecase
            .advance_status(Uuid::new_v4(), request_id, RequestStatus::EnRoute)
            .await;

        assert!(matches!(result, Err(UsecaseError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_advance_cannot_skip_ahead() {
        let worker = Uuid::new_v4();
        let request = sample_request(RequestStatus::Accepted, Some(worker));
        let request_id = request.id;

        let mut requests = MockRequestRepository::new();
        requests.expect_find_by_id().returning(move |_| Ok(Some(request.clone())));
        requests.expect_complete().times(0);

        let usecase = build(requests, quiet_notifications(), anonymous_users(), MockReverseGeocoder::new());
        let result = usecase
            .advance_status(worker, request_id, RequestStatus::Completed)
            .await;

        assert!(matches!(result, Err(UsecaseError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_advance_en_route_notifies() {
        let worker = Uuid::new_v4();
        let request = sample_request(RequestStatus::Accepted, Some(worker));
        let request_id = request.id;
        let en_route = with(request.clone(), RequestStatus::EnRoute, Some(worker));

        let mut requests = MockRequestRepository::new();
        requests.expect_find_by_id().returning(move |_| Ok(Some(request.clone())));
        requests
            .expect_advance_status()
            .withf(move |id, w, from, to, _| {
                *id == request_id && *w == worker && *from == RequestStatus::Accepted && *to == RequestStatus::EnRoute
            })
            .times(1)
            .returning(move |_, _, _, _, _| Ok(Some(en_route.clone())));

        let mut notifications = MockNotificationRepository::new();
        notifications
            .expect_create()
            .withf(|n| n.title == "Mechanic on the way" && n.data["status"] == "en_route")
            .times(1)
            .returning(|_| Ok(()));

        let usecase = build(requests, notifications, anonymous_users(), MockReverseGeocoder::new());
        let result = usecase
            .advance_status(worker, request_id, RequestStatus::EnRoute)
            .await
            .unwrap();

        assert_eq!(result.status, RequestStatus::EnRoute);
    }

    #[tokio::test]
    async fn test_double_completion_archives_once() {
        let worker = Uuid::new_v4();
        let mut started = sample_request(RequestStatus::Started, Some(worker));
        started.accepted_at = Some(Utc::now());
        let request_id = started.id;
        let completed_flag = Arc::new(Mutex::new(false));

        let mut requests = MockRequestRepository::new();
        {
            let flag = completed_flag.clone();
            let started = started.clone();
            requests.expect_find_by_id().returning(move |_| {
                if *flag.lock().unwrap() {
                    Ok(Some(with(started.clone(), RequestStatus::Completed, Some(worker))))
                } else {
                    Ok(Some(started.clone()))
                }
            });
        }
        {
            let flag = completed_flag.clone();
            let started = started.clone();
            requests
                .expect_complete()
                .withf(move |id, w, job| *id == request_id && *w == worker && job.request_id == request_id)
                .times(1)
                .returning(move |_, _, _| {
                    *flag.lock().unwrap() = true;
                    Ok(Some(with(started.clone(), RequestStatus::Completed, Some(worker))))
                });
        }

        let mut users = MockUserRepository::new();
        users.expect_find_by_id().returning(|id| {
            Ok(Some(crate::domain::user::User {
                id,
                name: "Jane Doe".to_string(),
                email: "jane@example.com".to_string(),
                phone: Some("+1 555 123 4567".to_string()),
                role: Role::User,
                status: crate::domain::user::UserStatus::Active,
                created_at: Utc::now(),
            }))
        });

        let usecase = build(requests, quiet_notifications(), users, MockReverseGeocoder::new());

        let first = usecase
            .advance_status(worker, request_id, RequestStatus::Completed)
            .await;
        tokio_test::assert_ok!(&first);

        let second = usecase
            .advance_status(worker, request_id, RequestStatus::Completed)
            .await;
        assert!(matches!(second, Err(UsecaseError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_completion_failure_surfaces_error() {
        let worker = Uuid::new_v4();
        let started = sample_request(RequestStatus::Started, Some(worker));
        let request_id = started.id;

        let mut requests = MockRequestRepository::new();
        requests.expect_find_by_id().returning(move |_| Ok(Some(started.clone())));
        requests
            .expect_complete()
            .times(1)
            .returning(|_, _, _| Err(RepositoryError::DatabaseError("disk full".to_string())));

        let mut notifications = MockNotificationRepository::new();
        notifications.expect_create().times(0);

        let usecase = build(requests, notifications, anonymous_users(), MockReverseGeocoder::new());
        let result = usecase
            .advance_status(worker, request_id, RequestStatus::Completed)
            .await;

        assert!(matches!(result, Err(UsecaseError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_cancel_pending_by_requester_notifies_nobody() {
        let request = sample_request(RequestStatus::Pending, None);
        let request_id = request.id;
        let requester = request.user_id;
        let cancelled = with(request.clone(), RequestStatus::Cancelled, None);

        let mut requests = MockRequestRepository::new();
        requests.expect_find_by_id().returning(move |_| Ok(Some(request.clone())));
        requests
            .expect_cancel()
            .withf(move |id, from, _| *id == request_id && *from == RequestStatus::Pending)
            .times(1)
            .returning(move |_, _, _| Ok(Some(cancelled.clone())));

        let mut notifications = MockNotificationRepository::new();
        notifications.expect_create().times(0);

        let usecase = build(requests, notifications, anonymous_users(), MockReverseGeocoder::new());
        let result = usecase.cancel_request(requester, request_id, None).await.unwrap();

        assert_eq!(result.status, RequestStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_by_worker_notifies_requester() {
        let worker = Uuid::new_v4();
        let request = sample_request(RequestStatus::Arrived, Some(worker));
        let request_id = request.id;
        let requester = request.user_id;
        let cancelled = with(request.clone(), RequestStatus::Cancelled, None);

        let mut requests = MockRequestRepository::new();
        requests.expect_find_by_id().returning(move |_| Ok(Some(request.clone())));
        requests
            .expect_cancel()
            .times(1)
            .returning(move |_, _, _| Ok(Some(cancelled.clone())));

        let mut notifications = MockNotificationRepository::new();
        notifications
            .expect_create()
            .withf(move |n| n.user_id == requester && n.body.contains("flat tire on tow truck"))
            .times(1)
            .returning(|_| Ok(()));

        let usecase = build(requests, notifications, anonymous_users(), MockReverseGeocoder::new());
        let result = usecase
            .cancel_request(worker, request_id, Some("flat tire on tow truck".to_string()))
            .await;

        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_terminal_requests_are_immutable() {
        let worker = Uuid::new_v4();
        for status in [RequestStatus::Completed, RequestStatus::Cancelled] {
            let request = sample_request(status, Some(worker));
            let request_id = request.id;
            let requester = request.user_id;

            let mut requests = MockRequestRepository::new();
            requests.expect_find_by_id().returning(move |_| Ok(Some(request.clone())));
            requests.expect_accept_pending().times(0);
            requests.expect_advance_status().times(0);
            requests.expect_cancel().times(0);

            let usecase = build(requests, quiet_notifications(), anonymous_users(), MockReverseGeocoder::new());

            assert!(matches!(
                usecase.accept_request(Uuid::new_v4(), request_id).await,
                Err(UsecaseError::Conflict(_))
            ));
            assert!(matches!(
                usecase.advance_status(worker, request_id, RequestStatus::EnRoute).await,
                Err(UsecaseError::Conflict(_))
            ));
            assert!(matches!(
                usecase.cancel_request(requester, request_id, None).await,
                Err(UsecaseError::Conflict(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_get_request_visibility() {
        let worker = Uuid::new_v4();
        let request = sample_request(RequestStatus::Accepted, Some(worker));
        let request_id = request.id;
        let requester = request.user_id;

        let mut requests = MockRequestRepository::new();
        requests.expect_find_by_id().returning(move |_| Ok(Some(request.clone())));

        let usecase = build(requests, quiet_notifications(), anonymous_users(), MockReverseGeocoder::new());

        assert!(usecase.get_request(requester, Role::User, request_id).await.is_ok());
        assert!(usecase.get_request(worker, Role::Mechanic, request_id).await.is_ok());
        assert!(usecase.get_request(Uuid::new_v4(), Role::Admin, request_id).await.is_ok());
        assert!(matches!(
            usecase.get_request(Uuid::new_v4(), Role::Mechanic, request_id).await,
            Err(UsecaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_pending_ignores_stale_fix() {
        let mut near = sample_request(RequestStatus::Pending, None);
        near.location = Location { lat: 0.0, lng: 1.0, address: None };
        near.created_at = Utc::now() - Duration::minutes(10);
        let mut far = sample_request(RequestStatus::Pending, None);
        far.location = Location { lat: 0.0, lng: 2.0, address: None };
        let (near_id, far_id) = (near.id, far.id);

        let mut requests = MockRequestRepository::new();
        requests
            .expect_find_pending()
            .returning(move || Ok(vec![far.clone(), near.clone()]));

        let usecase = build(requests, quiet_notifications(), anonymous_users(), MockReverseGeocoder::new());

        let fresh = PositionFix { point: GeoPoint::new(0.0, 0.0), captured_at: Utc::now() };
        let ranked = usecase.list_pending(SortMode::Nearest, Some(fresh)).await.unwrap();
        assert_eq!(ranked[0].request.id, near_id);

        let stale = PositionFix { captured_at: Utc::now() - Duration::minutes(5), ..fresh };
        let ranked = usecase.list_pending(SortMode::Nearest, Some(stale)).await.unwrap();
        assert_eq!(ranked[0].request.id, far_id);
        assert!(ranked[0].distance_miles.is_none());
    }

    #[tokio::test]
    async fn test_pending_feed_sees_new_request() {
        let store: Arc<Mutex<Vec<ServiceRequest>>> = Arc::new(Mutex::new(Vec::new()));

        let mut requests = MockRequestRepository::new();
        {
            let store = store.clone();
            requests.expect_create().returning(move |r| {
                store.lock().unwrap().insert(0, r.clone());
                Ok(())
            });
        }
        {
            let store = store.clone();
            requests
                .expect_find_pending()
                .returning(move || Ok(store.lock().unwrap().clone()));
        }
        let mut geocoder = MockReverseGeocoder::new();
        geocoder.expect_reverse().returning(|_, _| None);

        let usecase = build(requests, quiet_notifications(), anonymous_users(), geocoder);

        let mut feed = usecase.subscribe_pending().await.unwrap();
        assert!(feed.recv().await.unwrap().is_empty());

        let created = usecase.create_request(Uuid::new_v4(), new_input(None)).await.unwrap();

        let snapshot = feed.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, created.id);
        feed.dispose();
    }
}
