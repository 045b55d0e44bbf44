#![deny(rust_2018_idioms)]

use snafu::{ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

pub use config::Config;

mod config;
mod domain;
mod error;
mod fcm;
mod firestore;
mod flow;
mod trigger;

type GlobalConfig = &'static Config;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

fn main() {
    if let Err(e) = core() {
        eprintln!("Error: {}", e);
        let mut source = std::error::Error::source(&e);
        while let Some(s) = source {
            eprintln!("Caused by: {}", s);
            source = std::error::Error::source(s);
        }
        std::process::exit(1);
    }
}

#[tokio::main]
async fn core() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_environment().context(UnableToConfigureSnafu)?;
    let config = &*Box::leak(Box::new(config));

    let firestore_config =
        firestore::Config::from_environment().context(UnableToConfigureFirestoreSnafu)?;
    let fcm_config = fcm::Config::from_environment().context(UnableToConfigureFcmSnafu)?;

    // One connection pool shared by both integrations
    let client = reqwest_client().context(UnableToBuildHttpClientSnafu)?;
    let store = firestore_config.into_client(client.clone());
    let gateway = fcm_config.into_client(client);

    let dispatch_flow = flow::DispatchFlow::new(store, gateway);

    let trigger = tokio::spawn(trigger::serve(config, dispatch_flow));

    trigger
        .await
        .context(TriggerEndpointFailedSnafu)?
        .context(UnableToServeSnafu)?;

    TriggerEndpointExitedSnafu.fail()
}

fn reqwest_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().user_agent(USER_AGENT).build()
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Unable to configure application"))]
    UnableToConfigure { source: config::Error },

    #[snafu(display("Unable to configure Firestore integration"))]
    UnableToConfigureFirestore { source: firestore::Error },

    #[snafu(display("Unable to configure FCM integration"))]
    UnableToConfigureFcm { source: fcm::Error },

    #[snafu(display("Unable to build the HTTP client"))]
    UnableToBuildHttpClient { source: reqwest::Error },

    #[snafu(display("Unable to serve the trigger endpoint"))]
    UnableToServe { source: trigger::Error },

    #[snafu(display("The trigger endpoint failed and never should"))]
    TriggerEndpointFailed { source: tokio::task::JoinError },

    #[snafu(display("The trigger endpoint exited and never should"))]
    TriggerEndpointExited,
}

type Result<T, E = Error> = std::result::Result<T, E>;
