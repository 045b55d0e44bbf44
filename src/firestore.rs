use crate::{
    domain::{NotificationRecord, UserId, UserRecord},
    error::IsTransient,
    flow::UserStore,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};
use std::{collections::HashMap, env};
use tracing::{trace, trace_span, Instrument};
use url::Url;

const PRODUCTION_BASE_URI: &str = "https://firestore.googleapis.com/v1/";
const DEFAULT_DATABASE: &str = "(default)";
const DEFAULT_USERS_COLLECTION: &str = "users";

// The emulator accepts this in place of a real OAuth token.
const EMULATOR_ACCESS_TOKEN: &str = "owner";

#[derive(Debug, Clone)]
pub struct Config {
    access_token: String,
    documents: Url,
    users_collection: String,
}

impl Config {
    pub fn from_environment() -> Result<Self> {
        let project_id = env::var("FIREBASE_PROJECT_ID")
            .or_else(|_| env::var("GOOGLE_CLOUD_PROJECT"))
            .context(UnknownProjectIdSnafu)?;
        let database = env::var("FIRESTORE_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.into());
        let users_collection = env::var("FIRESTORE_USERS_COLLECTION")
            .unwrap_or_else(|_| DEFAULT_USERS_COLLECTION.into());

        match env::var("FIRESTORE_EMULATOR_HOST") {
            Ok(host) => Self::new(
                format!("http://{}/v1/", host),
                EMULATOR_ACCESS_TOKEN,
                &project_id,
                &database,
                users_collection,
            ),
            Err(_) => {
                let access_token =
                    env::var("GOOGLE_OAUTH_ACCESS_TOKEN").context(UnknownAccessTokenSnafu)?;
                Self::new(
                    PRODUCTION_BASE_URI,
                    access_token,
                    &project_id,
                    &database,
                    users_collection,
                )
            }
        }
    }

    fn new(
        base_uri: impl Into<String>,
        access_token: impl Into<String>,
        project_id: &str,
        database: &str,
        users_collection: impl Into<String>,
    ) -> Result<Self> {
        let base_uri = base_uri.into();
        let access_token = access_token.into();
        let users_collection = users_collection.into();

        let documents = Url::parse(&base_uri)
            .and_then(|base| {
                base.join(&format!(
                    "projects/{}/databases/{}/documents/",
                    project_id, database,
                ))
            })
            .context(UnableToConfigureDocumentsUrlSnafu { base_uri })?;

        Ok(Self {
            access_token,
            documents,
            users_collection,
        })
    }

    /// `None` for ids that cannot name a document. The URL library drops
    /// `.` and `..` segments, which would address the collection itself.
    fn user_url(&self, user_id: &UserId) -> Result<Option<Url>> {
        if matches!(&*user_id.0, "" | "." | "..") {
            return Ok(None);
        }

        let mut url = self.documents.clone();
        url.path_segments_mut()
            .ok()
            .context(DocumentsUrlCannotBeABaseSnafu)?
            .pop_if_empty()
            .push(&self.users_collection)
            .push(&user_id.0);
        Ok(Some(url))
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

impl Client {
    pub async fn fetch_user(&self, user_id: &UserId) -> Result<Option<UserRecord>> {
        let Self { client, config } = self;
        let s = trace_span!("fetch_user", user_id = %user_id);

        async {
            let url = match config.user_url(user_id)? {
                Some(url) => url,
                None => {
                    trace!("User id cannot name a document");
                    return Ok(None);
                }
            };
            trace!("Fetching user document from {}", url);

            let res = client
                .get(url)
                .bearer_auth(&config.access_token)
                .send()
                .await
                .context(UnableToExecuteUserRequestSnafu)?;

            if res.status() == StatusCode::NOT_FOUND {
                trace!("No such user document");
                return Ok(None);
            }

            let document = res
                .error_for_status()
                .context(UserRequestFailedSnafu)?
                .json::<Document>()
                .await
                .context(UnableToDeserializeUserRequestSnafu)?;

            Ok(Some(document.to_user()))
        }
        .instrument(s)
        .await
    }
}

#[async_trait]
impl UserStore for Client {
    type Error = Error;

    async fn user(&self, user_id: &UserId) -> Result<Option<UserRecord>> {
        self.fetch_user(user_id).await
    }
}

/// A document as the REST API and document triggers present it, with
/// every field wrapped in a typed value.
#[derive(Debug, Default, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: HashMap<String, Value>,
}

impl Document {
    /// The last segment of the document's resource name.
    pub fn id(&self) -> Option<&str> {
        self.name.rsplit('/').next().filter(|id| !id.is_empty())
    }

    pub fn to_user(&self) -> UserRecord {
        UserRecord {
            fcm_token: self.string("fcmToken"),
        }
    }

    pub fn to_notification(&self) -> NotificationRecord {
        NotificationRecord {
            usuario_id: self.text("usuario_id"),
            titulo: self.text("titulo"),
            mensaje: self.text("mensaje"),
            tipo: self.text("tipo"),
            viaje_id: self.text("viaje_id"),
            solicitud_id: self.text("solicitud_id"),
            trip_id: self.text("trip_id"),
        }
    }

    fn string(&self, field: &str) -> Option<String> {
        self.fields.get(field).and_then(|v| v.string_value.clone())
    }

    fn text(&self, field: &str) -> Option<String> {
        self.fields.get(field).and_then(Value::to_text)
    }
}

/// Only the value kinds that can stand in for an identifier or a
/// piece of text are decoded; everything else is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Value {
    string_value: Option<String>,
    // Int64 is transported as a decimal string
    integer_value: Option<String>,
    reference_value: Option<String>,
}

impl Value {
    fn to_text(&self) -> Option<String> {
        self.string_value
            .as_ref()
            .or_else(|| self.integer_value.as_ref())
            .or_else(|| self.reference_value.as_ref())
            .cloned()
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

    #[snafu(display("Unable to build the documents URL from {}", base_uri))]
    UnableToConfigureDocumentsUrl {
        source: url::ParseError,
        base_uri: String,
    },

    DocumentsUrlCannotBeABase,

    #[snafu(display("Unable to request the user document: {}", source))]
    UnableToExecuteUserRequest {
        source: reqwest::Error,
    },

    #[snafu(display("The user document request failed: {}", source))]
    UserRequestFailed {
        source: reqwest::Error,
    },

    #[snafu(display("Unable to decode the user document: {}", source))]
    UnableToDeserializeUserRequest {
        source: reqwest::Error,
    },
}

impl IsTransient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Self::UnableToExecuteUserRequest { source } => source.is_transient(),
            Self::UserRequestFailed { source } => source.is_transient(),
            _ => false,
        }
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;
