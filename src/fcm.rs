use crate::{
    domain::{PushMessage, Receipt},
    error::IsTransient,
    flow::PushGateway,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::env;
use tracing::{trace, trace_span, Instrument};
use url::Url;

const PRODUCTION_BASE_URI: &str = "https://fcm.googleapis.com/v1/";

#[derive(Debug, Clone)]
pub struct Config {
    access_token: String,
    send_url: Url,
}

impl Config {
    pub fn from_environment() -> Result<Self> {
        let project_id = env::var("FIREBASE_PROJECT_ID")
            .or_else(|_| env::var("GOOGLE_CLOUD_PROJECT"))
            .context(UnknownProjectIdSnafu)?;
        let access_token = env::var("GOOGLE_OAUTH_ACCESS_TOKEN").context(UnknownAccessTokenSnafu)?;

        Self::new(PRODUCTION_BASE_URI, access_token, &project_id)
    }

    fn new(
        base_uri: impl Into<String>,
        access_token: impl Into<String>,
        project_id: &str,
    ) -> Result<Self> {
        let base_uri = base_uri.into();
        let access_token = access_token.into();

        let send_url = Url::parse(&base_uri)
            .and_then(|base| base.join(&format!("projects/{}/messages:send", project_id)))
            .context(UnableToConfigureSendUrlSnafu { base_uri })?;

        Ok(Self {
            access_token,
            send_url,
        })
    }

    pub fn into_client(self, client: reqwest::Client) -> Client {
        Client {
            client,
            config: self,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
    config: Config,
}

#[derive(Debug, Serialize)]
struct SendParams<'a> {
    message: &'a PushMessage,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    name: Receipt,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

impl Client {
    pub async fn send_message(&self, message: &PushMessage) -> Result<Receipt> {
        let Self { client, config } = self;
        let s = trace_span!("send_message");

        async {
            trace!("Submitting push message");

            let res = client
                .post(config.send_url.clone())
                .bearer_auth(&config.access_token)
                .json(&SendParams { message })
                .send()
                .await
                .context(UnableToExecuteSendRequestSnafu)?;

            let status = res.status();
            if !status.is_success() {
                // The body only adds detail; a failure to read it is not
                // worth reporting over the status itself.
                let body = res.text().await.unwrap_or_default();
                let reason = rejection_reason(&body);
                return SendRejectedSnafu { status, reason }.fail();
            }

            let r = res
                .json::<SendResponse>()
                .await
                .context(UnableToDeserializeSendResponseSnafu)?;

            trace!("Push message accepted as {}", r.name);
            Ok(r.name)
        }
        .instrument(s)
        .await
    }
}

#[async_trait]
impl PushGateway for Client {
    type Error = Error;

    async fn send(&self, message: &PushMessage) -> Result<Receipt> {
        self.send_message(message).await
    }
}

fn rejection_reason(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse { error }) if !error.status.is_empty() => {
            format!("{}: {}", error.status, error.message)
        }
        Ok(ErrorResponse { error }) => error.message,
        Err(_) => body.trim().to_owned(),
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("FIREBASE_PROJECT_ID must be set"))]
    UnknownProjectId {
        source: env::VarError,
    },

    #[snafu(display("GOOGLE_OAUTH_ACCESS_TOKEN must be set"))]
    UnknownAccessToken {
        source: env::VarError,
    },

    #[snafu(display("Unable to build the send URL from {}", base_uri))]
    UnableToConfigureSendUrl {
        source: url::ParseError,
        base_uri: String,
    },

    #[snafu(display("Unable to submit the push message: {}", source))]
    UnableToExecuteSendRequest {
        source: reqwest::Error,
    },

    #[snafu(display("The push gateway rejected the message ({}): {}", status, reason))]
    SendRejected {
        status: StatusCode,
        reason: String,
    },

    #[snafu(display("Unable to decode the push gateway response: {}", source))]
    UnableToDeserializeSendResponse {
        source: reqwest::Error,
    },
}

impl IsTransient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Self::UnableToExecuteSendRequest { source } => source.is_transient(),
            Self::SendRejected { status, .. } => status.is_transient(),
            _ => false,
        }
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NotificationRecord, PushToken, RecordId};
    use serde_json::json;
    use warp::{http::StatusCode as Status, Filter};

    #[test]
    fn send_url_targets_the_project() {
        let config = Config::new(PRODUCTION_BASE_URI, "secret", "movuni").unwrap();

        assert_eq!(
            config.send_url.as_str(),
            "https://fcm.googleapis.com/v1/projects/movuni/messages:send",
        );
    }

    #[test]
    fn request_body_matches_the_gateway_format() {
        let record = NotificationRecord {
            usuario_id: Some("u1".into()),
            titulo: Some("Viaje confirmado".into()),
            tipo: Some("viaje".into()),
            trip_id: Some("t9".into()),
            ..Default::default()
        };
        let message = PushMessage::compose(
            &record,
            &RecordId("n1".into()),
            PushToken("TOKEN123".into()),
        );

        let body = serde_json::to_value(SendParams { message: &message }).unwrap();

        assert_eq!(
            body,
            json!({
                "message": {
                    "token": "TOKEN123",
                    "notification": {
                        "title": "Viaje confirmado",
                        "body": "Tienes una nueva notificación",
                    },
                    "data": {
                        "tipo": "viaje",
                        "notificacion_id": "n1",
                        "viaje_id": "",
                        "solicitud_id": "",
                        "trip_id": "t9",
                    },
                },
            }),
        );
    }

    #[test]
    fn response_name_is_the_receipt() {
        let r: SendResponse =
            serde_json::from_str(r#"{"name": "projects/movuni/messages/0:1500415314455276%31bd1c9631bd1c96"}"#)
                .unwrap();

        assert_eq!(
            r.name,
            Receipt("projects/movuni/messages/0:1500415314455276%31bd1c9631bd1c96".into()),
        );
    }

    #[test]
    fn rejection_reason_uses_the_gateway_error() {
        let body = r#"{
            "error": {
                "code": 404,
                "message": "Requested entity was not found.",
                "status": "NOT_FOUND",
                "details": [{"@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError", "errorCode": "UNREGISTERED"}]
            }
        }"#;

        assert_eq!(
            rejection_reason(body),
            "NOT_FOUND: Requested entity was not found.",
        );
    }

    #[test]
    fn rejection_reason_falls_back_to_the_raw_body() {
        assert_eq!(rejection_reason(" Bad Gateway \n"), "Bad Gateway");
    }

    #[test]
    fn throttled_sends_are_transient() {
        let e = Error::SendRejected {
            status: StatusCode::TOO_MANY_REQUESTS,
            reason: "QUOTA_EXCEEDED".into(),
        };
        assert!(e.is_transient());

        let e = Error::SendRejected {
            status: StatusCode::BAD_REQUEST,
            reason: "INVALID_ARGUMENT".into(),
        };
        assert!(!e.is_transient());
    }

    fn message_for(token: &str) -> PushMessage {
        let record = NotificationRecord {
            usuario_id: Some("u1".into()),
            ..Default::default()
        };
        PushMessage::compose(&record, &RecordId("n1".into()), PushToken(token.into()))
    }

    /// A stand-in for the FCM send endpoint that only knows the device
    /// `TOKEN123`.
    fn stub_client() -> Client {
        let routes = warp::path!("v1" / "projects" / "movuni" / "messages:send")
            .and(warp::post())
            .and(warp::header::exact("authorization", "Bearer secret"))
            .and(warp::body::json())
            .map(|body: serde_json::Value| {
                let message = &body["message"];
                if message["token"] == "TOKEN123" && message["data"]["notificacion_id"] == "n1" {
                    let name = json!({ "name": "projects/movuni/messages/0:1" });
                    warp::reply::with_status(warp::reply::json(&name), Status::OK)
                } else {
                    let error = json!({
                        "error": {
                            "code": 404,
                            "message": "Requested entity was not found.",
                            "status": "NOT_FOUND",
                            "details": [{
                                "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                                "errorCode": "UNREGISTERED",
                            }],
                        },
                    });
                    warp::reply::with_status(warp::reply::json(&error), Status::NOT_FOUND)
                }
            });

        let (address, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        Config::new(format!("http://{}/v1/", address), "secret", "movuni")
            .unwrap()
            .into_client(reqwest::Client::new())
    }

    #[tokio::test]
    async fn accepted_message_returns_its_name() {
        let client = stub_client();

        let receipt = client.send_message(&message_for("TOKEN123")).await.unwrap();

        assert_eq!(receipt, Receipt("projects/movuni/messages/0:1".into()));
    }

    #[tokio::test]
    async fn unregistered_token_is_rejected() {
        let client = stub_client();

        let e = client
            .send_message(&message_for("STALE"))
            .await
            .unwrap_err();

        match &e {
            Error::SendRejected { status, reason } => {
                assert_eq!(*status, StatusCode::NOT_FOUND);
                assert_eq!(reason, "NOT_FOUND: Requested entity was not found.");
            }
            other => panic!("Unexpected error: {:?}", other),
        }
        assert!(!e.is_transient());
    }
}
