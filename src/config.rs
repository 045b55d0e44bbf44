use snafu::{ResultExt, Snafu};
use std::{
    env,
    net::{IpAddr, SocketAddr},
};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_address: SocketAddr,
}

impl Config {
    pub fn from_environment() -> Result<Self> {
        let address = env::var("WEB_LISTEN_ADDRESS").context(UnknownWebListenAddressSnafu)?;
        let port = env::var("WEB_LISTEN_PORT").or_else(|_| env::var("PORT"));
        let port = port.context(UnknownWebListenPortSnafu)?;

        Self::new(address, port)
    }

    fn new(address: impl Into<String>, port: impl Into<String>) -> Result<Self> {
        let address = address.into();
        let port = port.into();

        let address: IpAddr = address
            .parse()
            .context(InvalidWebListenAddressSnafu { address })?;
        let port = port.parse().context(InvalidWebListenPortSnafu { port })?;
        let listen_address = (address, port).into();

        Ok(Self { listen_address })
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("WEB_LISTEN_ADDRESS must be set"))]
    UnknownWebListenAddress { source: env::VarError },

    #[snafu(display("WEB_LISTEN_ADDRESS is invalid"))]
    InvalidWebListenAddress {
        source: std::net::AddrParseError,
        address: String,
    },

    #[snafu(display("WEB_LISTEN_PORT must be set"))]
    UnknownWebListenPort { source: env::VarError },

    #[snafu(display("WEB_LISTEN_PORT is invalid"))]
    InvalidWebListenPort {
        source: std::num::ParseIntError,
        port: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;
