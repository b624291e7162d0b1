use anyhow::Result;
use clap::Parser;
use client_core::{AuthCredential, ClientEvent, CourseRoomClient, RoomChatHandle};
use shared::domain::{CourseId, MessageKind, UserId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Interactive probe for a course room: joins the room for a course and
/// bridges stdin lines to chat messages.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    server_url: String,
    #[arg(long)]
    token: String,
    #[arg(long)]
    user_id: i64,
    #[arg(long)]
    course_id: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();

    let client = CourseRoomClient::new(&cli.server_url)?;
    let mut events = client.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::ConnectionStateChanged(state) => {
                    println!("-- connection: {state:?}");
                }
                ClientEvent::MessageReceived(message) => {
                    let sender = message
                        .sender_fullname
                        .unwrap_or_else(|| format!("user {}", message.sender_id.0));
                    println!("{sender}: {}", message.content);
                }
                ClientEvent::TypingStarted(user) => println!("-- {} is typing", user.fullname),
                ClientEvent::TypingStopped(user) => {
                    println!("-- {} stopped typing", user.fullname)
                }
                ClientEvent::Error(message) => println!("-- server error: {message}"),
            }
        }
    });

    client
        .connect(AuthCredential {
            token: cli.token,
            user_id: UserId(cli.user_id),
        })
        .await;

    let room = client.fetch_room_by_course(CourseId(cli.course_id)).await?;
    info!(room_id = room.room_id.0, name = %room.name, "resolved course room");
    client.join_room(room.room_id).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/older" => {
                let added = client.load_older_messages().await?;
                println!("-- loaded {added} older messages");
            }
            text => {
                client
                    .send_message(room.room_id, text, MessageKind::Text, Vec::new())
                    .await;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
