//! Two sockets on localhost: one binds, one dials, letters flow both ways.
//!
//! Run with: `cargo run --example ping_pong`

use hyperletter::{Letter, LetterOptions, Socket, SocketConfig, SocketEvent};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (server, mut server_events) = Socket::new(SocketConfig::default());
    let addr = server.bind("127.0.0.1:0".parse()?).await?;
    println!("server listening on {}", addr);

    tokio::spawn(async move {
        while let Some(event) = server_events.recv().await {
            if let SocketEvent::Received { from, letter, .. } = event {
                println!(
                    "server got {:?} from node {}",
                    String::from_utf8_lossy(&letter.parts[0].data),
                    from
                );
                let reply = Letter::user(LetterOptions::empty(), "pong");
                if server.send_to(reply, from).is_err() {
                    break;
                }
            }
        }
    });

    let (client, mut client_events) = Socket::new(SocketConfig::default());
    client.connect(addr)?;

    client.send(Letter::user(LetterOptions::ACK, "ping"))?;

    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = client_events.recv() => match event {
                Some(SocketEvent::Sent { letter, .. }) => {
                    println!("client delivered {:?}", String::from_utf8_lossy(&letter.parts[0].data));
                }
                Some(SocketEvent::Received { letter, .. }) => {
                    println!("client got {:?}", String::from_utf8_lossy(&letter.parts[0].data));
                    break;
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    client.dispose();
    Ok(())
}
