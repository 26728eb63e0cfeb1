use std::{env::var, io};
use tokio::{io::AsyncWriteExt, net::TcpStream};

use pgexec::{
    CancelToken, Config, PgExecutor, PgStream, Result,
    postgres::{BackendMessage, DbError, backend::Authentication},
    transport::PgTransportExt,
};

/// Protocol version 3.0
const PROTOCOL_VERSION: u32 = 196608;

/// Connect with `DATABASE_URL`, only trust authentication is supported here.
pub async fn connect() -> Result<(PgExecutor<TcpStream>, CancelToken)> {
    let url = var("DATABASE_URL").map_err(io::Error::other)?;
    let url = url.strip_prefix("postgres://").unwrap_or(&url);
    let url = url.split_once('?').map_or(url, |(url, _)| url);
    let (user, rest) = url.split_once('@').unwrap_or(("postgres", url));
    let user = user.split_once(':').map_or(user, |(user, _)| user);
    let (host, dbname) = rest.split_once('/').unwrap_or((rest, user));
    let host = if host.contains(':') { host.to_owned() } else { format!("{host}:5432") };

    let mut socket = TcpStream::connect(host).await?;

    let mut startup = vec![0; 4];
    startup.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    for (key, value) in [("user", user), ("database", dbname)] {
        startup.extend_from_slice(key.as_bytes());
        startup.push(0);
        startup.extend_from_slice(value.as_bytes());
        startup.push(0);
    }
    startup.push(0);
    let len = startup.len() as u32;
    startup[..4].copy_from_slice(&len.to_be_bytes());
    socket.write_all(&startup).await?;

    let mut stream = PgStream::new(socket);
    let mut token = CancelToken::new(0, 0);
    let mut parameters = vec![];
    loop {
        match stream.recv().await? {
            BackendMessage::Authentication(Authentication::Ok) => { },
            BackendMessage::Authentication(Authentication::Other { code, .. }) => {
                return Err(io::Error::other(format!("unsupported authentication {code}")).into());
            },
            BackendMessage::BackendKeyData(key) => token = key.into(),
            BackendMessage::ParameterStatus(status) => parameters.push((status.name, status.value)),
            BackendMessage::ErrorResponse(err) => return Err(DbError::parse(err.body)?.into()),
            BackendMessage::ReadyForQuery(_) => break,
            _ => { },
        }
    }

    let mut engine = PgExecutor::new(stream.into_inner(), Config::from_env()?);
    for (name, value) in parameters {
        engine.set_parameter_status(name, value);
    }
    Ok((engine, token))
}

pub async fn main() -> Result<()> {
    let (mut engine, _token) = connect().await?;
    tracing::info!(
        server_version = ?engine.parameter_status("server_version"),
        "connected"
    );
    engine.close().await?;
    Ok(())
}
