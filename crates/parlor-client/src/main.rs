mod config;
mod input;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::bail;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use parlor_auth::{
    ApiClient, CredentialFile, HttpAuthClient, InterceptorConfig, RoomDirectory, Session,
};
use parlor_chat::{ChatConnection, ConnectionConfig, WsTransport};
use parlor_types::events::{ChatEvent, ConnectionState, SessionStatus};
use parlor_types::models::Room;

use crate::config::Config;
use crate::input::{HELP, Input};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Session
    let auth = Arc::new(HttpAuthClient::new(&config.api_url)?);
    let interceptor_config = InterceptorConfig {
        expiry_leeway: config.refresh_leeway,
    };
    let session = Arc::new(match &config.credential_path {
        Some(path) => Session::with_mirror(auth, interceptor_config, CredentialFile::new(path)),
        None => Session::new(auth, interceptor_config),
    });

    if !session.restore()? {
        match (&config.email, &config.password) {
            (Some(email), Some(password)) => {
                session.login(email, password).await?;
            }
            _ => bail!("no saved session; set PARLOR_EMAIL and PARLOR_PASSWORD to log in"),
        }
    }

    // Collaborators
    let api = Arc::new(ApiClient::new(&config.api_url, session.interceptor())?);
    let directory = RoomDirectory::new(api);
    let transport = WsTransport::new(&config.chat_url)?;
    let (connection, mut events) = ChatConnection::spawn(
        transport,
        session.tokens().clone(),
        ConnectionConfig {
            connect_timeout: config.connect_timeout,
            ..ConnectionConfig::default()
        },
    );

    if let Some(credential) = session.tokens().current() {
        info!("Parlor ready as {}", credential.display_name());
    }
    println!("{HELP}");

    let mut status = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut rooms: Vec<Room> = Vec::new();
    let mut shown: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Input::parse(&line) {
                    Input::Rooms => match directory.list_rooms().await {
                        Ok(listed) => {
                            for room in &listed {
                                println!("  {}  {}", room.id, room.name);
                            }
                            rooms = listed;
                        }
                        Err(e) if e.is_terminal() => {
                            error!("Session ended: {}", e);
                            break;
                        }
                        Err(e) => warn!("Failed to list rooms: {}", e),
                    },
                    Input::Join(id) => {
                        let room = rooms
                            .iter()
                            .find(|r| r.id == id)
                            .cloned()
                            .unwrap_or_else(|| Room::new(id.clone(), id));
                        connection.switch_to(room)?;
                    }
                    Input::Leave => connection.close()?,
                    Input::Reconnect => connection.reconnect()?,
                    Input::Help => println!("{HELP}"),
                    Input::Quit => break,
                    Input::Say(text) => {
                        if let Err(e) = connection.send(text).await {
                            println!("! {}", e);
                        }
                    }
                    Input::Empty => {}
                    Input::Unknown(line) => println!("! unknown command: {line} (try /help)"),
                }
            }
            Some(event) = events.recv() => show(&event, &mut shown),
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow();
                if current == SessionStatus::Expired {
                    error!("Session expired, log in again");
                    break;
                }
            }
        }
    }

    connection.close()?;
    let _ = connection
        .wait_for(|s| matches!(s, ConnectionState::Idle | ConnectionState::Errored { .. }))
        .await;
    if session.is_active() {
        session.logout().await?;
    }
    Ok(())
}

/// Print an event. `shown` tracks printed message ids so merges that
/// insert into the middle of the timeline only print what is new.
fn show(event: &ChatEvent, shown: &mut HashSet<String>) {
    match event {
        ChatEvent::StateChanged(state) => match state {
            ConnectionState::Idle => println!("-- not in a room"),
            ConnectionState::Connecting(room) => println!("-- connecting to {}", room.name),
            ConnectionState::Open(room) => println!("-- in {}", room.name),
            ConnectionState::Closing(_) | ConnectionState::Reconnecting(_) => {
                debug!("connection state {:?}", state)
            }
            ConnectionState::Errored { reason, .. } => println!("-- disconnected: {reason}"),
        },
        ChatEvent::Timeline {
            messages,
            scroll_adjustment,
            ..
        } => {
            debug!("timeline grew by {}", scroll_adjustment);
            for message in messages {
                if shown.insert(message.id.clone()) {
                    let sender = message.sender_name.as_deref().unwrap_or(&message.sender_id);
                    println!(
                        "[{}] {}: {}",
                        message.created_at.format("%H:%M"),
                        sender,
                        message.body
                    );
                }
            }
        }
        ChatEvent::TimelineReset { .. } => shown.clear(),
        ChatEvent::DecodeFailed { error, .. } => debug!("skipped a frame: {}", error),
        ChatEvent::ConnectionLost { reason, .. } => {
            println!("-- connection lost ({reason}); /reconnect to retry")
        }
        ChatEvent::TransportFailed { error, .. } => println!("-- could not connect: {error}"),
    }
}
