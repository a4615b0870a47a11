use std::io::{stdin, stdout, Write};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

type Reader = BufReader<OwnedReadHalf>;
type Writer = BufWriter<OwnedWriteHalf>;

#[tokio::main]
async fn main() {
    let addr = "127.0.0.1";
    let port = prompt("💬 Port eingeben (7100 = Chat, 7101-7103 = Benachrichtigungen): ");
    let full_addr = format!("{}:{}", addr, port);
    let token = prompt("🔑 Token: ");

    println!("🔧 Modus wählen:");
    println!("1 = Unterhaltung starten + Chat");
    println!("2 = Admin: allen Räumen beitreten");
    println!("3 = Benachrichtigungen empfangen");

    let mode = prompt("👉 Auswahl (1–3): ");

    let stream = match TcpStream::connect(&full_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("❌ Verbindung fehlgeschlagen: {e}");
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        eprintln!("⚠️ TCP_NODELAY nicht gesetzt: {e}");
    }

    let (reader_raw, writer_raw) = stream.into_split();
    let reader = BufReader::new(reader_raw);
    let mut writer = BufWriter::new(writer_raw);

    if send_frame(&mut writer, &json!({ "token": token })).await.is_err() {
        eprintln!("❌ Anmeldung konnte nicht gesendet werden");
        return;
    }

    match mode.trim() {
        "1" => chat_mode(reader, writer, "USER_JOIN").await,
        "2" => chat_mode(reader, writer, "ADMIN_JOIN").await,
        "3" => listen(reader).await,
        _ => println!("❌ Ungültige Auswahl"),
    }
}

async fn chat_mode(reader: Reader, mut writer: Writer, join: &str) {
    if send_frame(&mut writer, &json!({ "msg_type": join })).await.is_err() {
        eprintln!("❌ Beitritt fehlgeschlagen");
        return;
    }

    tokio::spawn(listen(reader));

    loop {
        let input = tokio::task::spawn_blocking(|| prompt("✉ Nachricht: ")).await.unwrap_or_default();
        if input.trim().is_empty() {
            continue;
        }

        let frame = json!({ "msg_type": "TEXTING", "content": input });
        if let Err(e) = send_frame(&mut writer, &frame).await {
            eprintln!("🔌 Senden fehlgeschlagen: {e}");
            break;
        }
    }
}

async fn listen(reader: Reader) {
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => print_frame(&line),
            Ok(None) | Err(_) => {
                println!("🔌 Verbindung geschlossen");
                break;
            }
        }
    }
}

fn print_frame(line: &str) {
    let Ok(frame) = serde_json::from_str::<Value>(line) else {
        println!("📥 {line}");
        return;
    };

    if frame.get("ping").is_some() {
        return;
    }
    if let Some(code) = frame.get("code") {
        println!("⛔ [{}]: {}", code, frame["error"]);
        return;
    }

    match frame["msg_type"].as_str() {
        Some("TEXTING") => println!("📥 [chat/{}]: {}", frame["conversation_id"], frame["content"]),
        Some("SYSTEM_USER_JOIN_RESPONSE") => println!("✅ Unterhaltung {} eröffnet", frame["conversation_id"]),
        _ => println!("🔔 {frame}"),
    }
}

async fn send_frame(writer: &mut Writer, frame: &Value) -> std::io::Result<()> {
    let mut line = frame.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

fn prompt(label: &str) -> String {
    print!("{label}");
    let _ = stdout().flush();
    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}
