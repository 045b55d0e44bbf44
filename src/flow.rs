use crate::{
    domain::{NotificationRecord, PushMessage, Receipt, RecordId, SkipReason, UserId, UserRecord},
    error::IsTransient,
};
use async_trait::async_trait;
use snafu::{ResultExt, Snafu};
use std::{error::Error as StdError, fmt};
use tracing::{error, info, info_span, warn, Instrument};

/// Read-only access to the user documents.
#[async_trait]
pub trait UserStore {
    type Error: StdError + IsTransient + Send + Sync + 'static;

    /// `Ok(None)` when no user with that id exists.
    async fn user(&self, user_id: &UserId) -> Result<Option<UserRecord>, Self::Error>;
}

#[async_trait]
pub trait PushGateway {
    type Error: StdError + IsTransient + Send + Sync + 'static;

    async fn send(&self, message: &PushMessage) -> Result<Receipt, Self::Error>;
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered(Receipt),
    Skipped(SkipReason),
    Failed(Error),
}

/// Relays one freshly created notification record to its recipient's
/// device. Holds nothing between calls besides the two clients.
#[derive(Debug, Clone)]
pub struct DispatchFlow<S, G> {
    store: S,
    gateway: G,
}

impl<S, G> DispatchFlow<S, G>
where
    S: UserStore + Sync,
    G: PushGateway + Sync,
{
    pub fn new(store: S, gateway: G) -> Self {
        Self { store, gateway }
    }

    /// Never fails: problems are logged and reported as
    /// [`DeliveryOutcome::Failed`] so the caller has no reason to
    /// trigger the same record again.
    pub async fn dispatch(&self, record: NotificationRecord, record_id: RecordId) -> DeliveryOutcome {
        let s = info_span!("dispatch", record_id = %record_id);

        async {
            info!(?record, "New notification created");

            let outcome = match self.try_dispatch(&record, &record_id).await {
                Ok(outcome) => outcome,
                Err(e) => DeliveryOutcome::Failed(e),
            };

            match &outcome {
                DeliveryOutcome::Delivered(receipt) => {
                    info!(%receipt, "Notification sent");
                }
                DeliveryOutcome::Skipped(reason) => {
                    warn!("Notification not sent: {}", reason);
                }
                DeliveryOutcome::Failed(e) => {
                    error!(transient = e.is_transient(), "Unable to send notification: {}", e);
                }
            }

            outcome
        }
        .instrument(s)
        .await
    }

    async fn try_dispatch(
        &self,
        record: &NotificationRecord,
        record_id: &RecordId,
    ) -> Result<DeliveryOutcome> {
        let Self { store, gateway } = self;

        let user_id = match record.recipient() {
            Some(id) => id,
            None => return Ok(DeliveryOutcome::Skipped(SkipReason::NoRecipient)),
        };

        let user = store
            .user(&user_id)
            .await
            .map_err(Failure::new)
            .context(UnableToFetchUserSnafu {
                user_id: user_id.clone(),
            })?;

        let user = match user {
            Some(user) => user,
            None => {
                return Ok(DeliveryOutcome::Skipped(SkipReason::UnknownRecipient(
                    user_id,
                )))
            }
        };

        let token = match user.push_token() {
            Some(token) => token,
            None => {
                return Ok(DeliveryOutcome::Skipped(SkipReason::NoDeliveryAddress(
                    user_id,
                )))
            }
        };

        let message = PushMessage::compose(record, record_id, token);

        let receipt = gateway
            .send(&message)
            .await
            .map_err(Failure::new)
            .context(UnableToDeliverSnafu { user_id })?;

        Ok(DeliveryOutcome::Delivered(receipt))
    }
}

/// An error from one of the collaborators, with its transience
/// captured before the concrete type is erased.
#[derive(Debug)]
pub struct Failure {
    inner: Box<dyn StdError + Send + Sync + 'static>,
    transient: bool,
}

impl Failure {
    fn new<E>(e: E) -> Self
    where
        E: StdError + IsTransient + Send + Sync + 'static,
    {
        Self {
            transient: e.is_transient(),
            inner: Box::new(e),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Unable to look up user {}: {}", user_id, source))]
    UnableToFetchUser { source: Failure, user_id: UserId },

    #[snafu(display("Unable to deliver to user {}: {}", user_id, source))]
    UnableToDeliver { source: Failure, user_id: UserId },
}

impl IsTransient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Self::UnableToFetchUser { source, .. } => source.transient,
            Self::UnableToDeliver { source, .. } => source.transient,
        }
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;
