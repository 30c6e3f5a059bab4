use clap::Parser;
use server::host::{read_frame, write_frame};
use server::relay::{MessageType, RELAY_CHANNEL};
use shared::{server_info_port, Frame, PacketFields, PacketReader, SERVER_PORT};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[command(author, version, about = "Checks that a relay server is up", long_about = None)]
struct Args {
    /// Server host to probe
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Game port; discovery is probed on the next one
    #[arg(short = 'p', long, default_value_t = SERVER_PORT)]
    port: u16,

    /// Text to send through the relay after the ping
    #[arg(short = 't', long)]
    text: Option<String>,
}

const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let game_addr: SocketAddr = tokio::net::lookup_host((args.server.as_str(), args.port))
        .await?
        .next()
        .ok_or("server address did not resolve")?;

    // Discovery
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let info_addr = SocketAddr::new(game_addr.ip(), server_info_port(game_addr.port()));
    let request = [0x50, 0x52, 0x42];
    println!("Sending discovery ping to {}", info_addr);
    socket.send_to(&request, info_addr).await?;

    let mut buf = [0u8; shared::MAX_TRANS];
    match timeout(REPLY_TIMEOUT, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, from))) => {
            let mut reply = PacketReader::new(&buf[..len]);
            let echo = reply.get_bytes(request.len());
            println!("Discovery reply from {} ({} bytes)", from, len);
            println!("  echo matches: {}", echo == &request[..]);
            println!("  protocol: {}", reply.get_int());
            println!("  players: {}/{}", reply.get_int(), reply.get_int());
            println!("  description: {}", reply.get_string());
        }
        Ok(Err(e)) => println!("Discovery failed: {}", e),
        Err(_) => println!("No discovery reply within {:?}", REPLY_TIMEOUT),
    }

    // Game connection
    println!("Connecting to {}", game_addr);
    let mut stream = TcpStream::connect(game_addr).await?;

    let ping = PacketFields::new()
        .int(MessageType::Ping as i32)
        .int(1234)
        .encode();
    write_frame(
        &mut stream,
        &Frame::Data {
            channel: RELAY_CHANNEL,
            reliable: true,
            payload: ping.data().to_vec(),
        },
    )
    .await?;

    if let Some(text) = &args.text {
        let message = PacketFields::new()
            .int(MessageType::Text as i32)
            .string(text)
            .encode();
        write_frame(
            &mut stream,
            &Frame::Data {
                channel: RELAY_CHANNEL,
                reliable: true,
                payload: message.data().to_vec(),
            },
        )
        .await?;
    }

    loop {
        match timeout(REPLY_TIMEOUT, read_frame(&mut stream)).await {
            Ok(Ok(Frame::Data { channel, payload, .. })) => {
                let mut reader = PacketReader::new(&payload);
                match MessageType::from_i32(reader.get_int()) {
                    Some(MessageType::Welcome) => {
                        println!("Welcome: slot {} on '{}'", reader.get_int(), reader.get_string())
                    }
                    Some(MessageType::Pong) => {
                        println!("Pong: token {}", reader.get_int());
                        break;
                    }
                    Some(MessageType::ServerMessage) => println!("Server: {}", reader.get_string()),
                    other => println!("Unexpected message {:?} on channel {}", other, channel),
                }
            }
            Ok(Ok(Frame::Disconnect { reason })) => {
                println!("Disconnected: {}", shared::DisconnectReason::from_code(reason));
                break;
            }
            Ok(Err(e)) => {
                println!("Connection error: {}", e);
                break;
            }
            Err(_) => {
                println!("No reply within {:?}", REPLY_TIMEOUT);
                break;
            }
        }
    }

    println!("Probe finished");
    Ok(())
}
