use crate::{
    flow::{DeliveryOutcome, DispatchFlow, PushGateway, UserStore},
    GlobalConfig,
};
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use std::{convert::Infallible, net::SocketAddr};
use tracing::{error, info};
use warp::{
    filters::{body::BodyDeserializeError, BoxedFilter},
    http::StatusCode,
    reject::{LengthRequired, MethodNotAllowed, PayloadTooLarge},
    Filter, Rejection, Reply,
};

const MAX_EVENT_BYTES: u64 = 64 * 1024;

pub(crate) async fn serve<S, G>(config: GlobalConfig, flow: DispatchFlow<S, G>) -> Result<()>
where
    S: UserStore + Clone + Send + Sync + 'static,
    G: PushGateway + Clone + Send + Sync + 'static,
{
    let address = config.listen_address;
    let (address, server) = warp::serve(routes(flow))
        .try_bind_ephemeral(address)
        .context(UnableToBindSnafu { address })?;

    info!("Listening for notification events at {}", address);
    server.await;

    Ok(())
}

pub(crate) fn routes<S, G>(flow: DispatchFlow<S, G>) -> BoxedFilter<(impl Reply,)>
where
    S: UserStore + Clone + Send + Sync + 'static,
    G: PushGateway + Clone + Send + Sync + 'static,
{
    let ping = warp::path!("ping").and(warp::get()).map(|| "pong");

    ping.or(events::created_record(flow.clone()))
        .or(events::created_document(flow))
        .recover(report_invalid)
        .boxed()
}

/// What the caller gets back for each event. Always sent with a
/// success status; the platform must not redeliver based on it.
#[derive(Debug, Serialize)]
struct Summary {
    outcome: &'static str,
    detail: String,
}

impl From<&DeliveryOutcome> for Summary {
    fn from(other: &DeliveryOutcome) -> Self {
        match other {
            DeliveryOutcome::Delivered(receipt) => Self {
                outcome: "delivered",
                detail: receipt.to_string(),
            },
            DeliveryOutcome::Skipped(reason) => Self {
                outcome: "skipped",
                detail: reason.to_string(),
            },
            DeliveryOutcome::Failed(e) => Self {
                outcome: "failed",
                detail: e.to_string(),
            },
        }
    }
}

async fn report_invalid(r: Rejection) -> Result<impl Reply, Infallible> {
    let reply = |message: String, status: StatusCode| {
        Ok::<_, Infallible>(warp::reply::with_status(message, status))
    };

    if let Some(e) = r.find::<EventError>() {
        match e {
            EventError::DocumentWithoutId { .. } => reply(e.to_string(), StatusCode::BAD_REQUEST),
        }
    } else if let Some(e) = r.find::<BodyDeserializeError>() {
        reply(e.to_string(), StatusCode::BAD_REQUEST)
    } else if r.find::<PayloadTooLarge>().is_some() {
        reply(String::from("Event too large"), StatusCode::PAYLOAD_TOO_LARGE)
    } else if r.find::<LengthRequired>().is_some() {
        reply(
            String::from("Content-Length is required"),
            StatusCode::LENGTH_REQUIRED,
        )
    } else if r.is_not_found() {
        reply(String::from("Not found"), StatusCode::NOT_FOUND)
    } else if r.find::<MethodNotAllowed>().is_some() {
        reply(
            String::from("Method not allowed"),
            StatusCode::METHOD_NOT_ALLOWED,
        )
    } else {
        error!("Unhandled trigger error: {:?}", r);
        reply(
            String::from("An internal error occurred"),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }
}

#[derive(Debug, Snafu)]
pub(crate) enum Error {
    #[snafu(display("Unable to listen on {}", address))]
    UnableToBind {
        source: warp::Error,
        address: SocketAddr,
    },
}

/// Problems with an individual event request, reported back as 4xx.
#[derive(Debug, Snafu)]
enum EventError {
    #[snafu(display("The document name {:?} does not end in a record id", name))]
    DocumentWithoutId { name: String },
}

impl warp::reject::Reject for EventError {}

type Result<T, E = Error> = std::result::Result<T, E>;

mod events {
    use super::{DocumentWithoutIdSnafu, Summary, MAX_EVENT_BYTES};
    use crate::{
        domain::{NotificationRecord, RecordId},
        firestore::Document,
        flow::{DispatchFlow, PushGateway, UserStore},
    };
    use serde::Deserialize;
    use snafu::OptionExt;
    use warp::{filters::BoxedFilter, Filter, Rejection};

    /// Document events wrap the created document in `value`; the bare
    /// document is accepted too.
    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    enum CreatedDocument {
        Event { value: Document },
        Bare(Document),
    }

    impl CreatedDocument {
        fn into_document(self) -> Document {
            match self {
                Self::Event { value } => value,
                Self::Bare(document) => document,
            }
        }
    }

    fn with_flow<S, G>(
        flow: DispatchFlow<S, G>,
    ) -> impl Filter<Extract = (DispatchFlow<S, G>,), Error = std::convert::Infallible> + Clone
    where
        S: UserStore + Clone + Send + Sync + 'static,
        G: PushGateway + Clone + Send + Sync + 'static,
    {
        warp::any().map(move || flow.clone())
    }

    /// `POST /notificaciones/{id}` with the record's fields as a plain
    /// JSON object.
    pub(super) fn created_record<S, G>(flow: DispatchFlow<S, G>) -> BoxedFilter<(impl warp::Reply,)>
    where
        S: UserStore + Clone + Send + Sync + 'static,
        G: PushGateway + Clone + Send + Sync + 'static,
    {
        warp::path!("notificaciones" / String)
            .and(warp::post())
            .and(warp::body::content_length_limit(MAX_EVENT_BYTES))
            .and(warp::body::json())
            .and(with_flow(flow))
            .and_then(
                |id: String, record: NotificationRecord, flow: DispatchFlow<S, G>| async move {
                    let outcome = flow.dispatch(record, RecordId(id)).await;
                    Ok::<_, Rejection>(warp::reply::json(&Summary::from(&outcome)))
                },
            )
            .boxed()
    }

    /// `POST /events/document-created` with the created document in the
    /// store's own typed-value format, bare or inside a document event.
    pub(super) fn created_document<S, G>(
        flow: DispatchFlow<S, G>,
    ) -> BoxedFilter<(impl warp::Reply,)>
    where
        S: UserStore + Clone + Send + Sync + 'static,
        G: PushGateway + Clone + Send + Sync + 'static,
    {
        warp::path!("events" / "document-created")
            .and(warp::post())
            .and(warp::body::content_length_limit(MAX_EVENT_BYTES))
            .and(warp::body::json())
            .and(with_flow(flow))
            .and_then(|created: CreatedDocument, flow: DispatchFlow<S, G>| async move {
                let document = created.into_document();
                let record_id = document
                    .id()
                    .map(|id| RecordId(id.to_owned()))
                    .context(DocumentWithoutIdSnafu {
                        name: document.name.clone(),
                    })?;
                let record = document.to_notification();

                let outcome = flow.dispatch(record, record_id).await;
                Ok::<_, Rejection>(warp::reply::json(&Summary::from(&outcome)))
            })
            .boxed()
    }
}
