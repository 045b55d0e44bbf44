use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

const DEFAULT_TITLE: &str = "MovUni";
const DEFAULT_BODY: &str = "Tienes una nueva notificación";
const DEFAULT_KIND: &str = "general";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PushToken(pub String);

/// The gateway's identifier for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Receipt(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A document from the `notificaciones` collection, as written by
/// whoever wants a user to be told about something.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationRecord {
    pub usuario_id: Option<String>,
    pub titulo: Option<String>,
    pub mensaje: Option<String>,
    pub tipo: Option<String>,
    pub viaje_id: Option<String>,
    pub solicitud_id: Option<String>,
    pub trip_id: Option<String>,
}

impl NotificationRecord {
    pub fn recipient(&self) -> Option<UserId> {
        present(&self.usuario_id).map(|id| UserId(id.to_owned()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    pub fcm_token: Option<String>,
}

impl UserRecord {
    pub fn push_token(&self) -> Option<PushToken> {
        present(&self.fcm_token).map(|t| PushToken(t.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub token: PushToken,
    pub notification: PushNotification,
    /// Every value must be a string; the gateway rejects anything else.
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
}

impl PushMessage {
    pub fn compose(record: &NotificationRecord, record_id: &RecordId, token: PushToken) -> Self {
        let notification = PushNotification {
            title: or_default(&record.titulo, DEFAULT_TITLE),
            body: or_default(&record.mensaje, DEFAULT_BODY),
        };

        let data = [
            ("tipo", or_default(&record.tipo, DEFAULT_KIND)),
            ("notificacion_id", record_id.0.clone()),
            ("viaje_id", or_default(&record.viaje_id, "")),
            ("solicitud_id", or_default(&record.solicitud_id, "")),
            ("trip_id", or_default(&record.trip_id, "")),
        ]
        .iter()
        .map(|(k, v)| (String::from(*k), v.clone()))
        .collect();

        Self {
            token,
            notification,
            data,
        }
    }
}

fn or_default(v: &Option<String>, default: &str) -> String {
    present(v).unwrap_or(default).to_owned()
}

/// Empty strings count as missing, the same as an absent field.
fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoRecipient,
    UnknownRecipient(UserId),
    NoDeliveryAddress(UserId),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRecipient => write!(f, "the notification has no usuario_id"),
            Self::UnknownRecipient(id) => write!(f, "user {} does not exist", id),
            Self::NoDeliveryAddress(id) => write!(f, "user {} has no FCM token", id),
        }
    }
}
