//! Debugging SMTP sink.
//!
//! Speaks just enough SMTP for an application to hand over a message, then
//! passes the message to the output instead of delivering it.

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::{Output, Satellite};

const BANNER: &str = "---------- MESSAGE FOLLOWS ----------";
const FOOTER: &str = "------------ END MESSAGE ------------";

/// Bind an ephemeral TCP port on all interfaces and accept mail there.
pub async fn start_smtp_sink(output: Output) -> std::io::Result<Satellite> {
    let listener = TcpListener::bind(("0.0.0.0", 0)).await?;
    let port = listener.local_addr()?.port();

    Ok(Satellite::spawn("smtp", port, move |mut shutdown| async move {
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!("smtp sink connection from {}", peer);
                        let output = output.clone();
                        tokio::spawn(async move {
                            if let Err(e) = session(stream, output).await {
                                tracing::debug!("smtp session with {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => tracing::warn!("smtp sink accept failed: {}", e),
                },
            }
        }
    }))
}

#[derive(Default)]
struct Envelope {
    from: Option<String>,
    recipients: Vec<String>,
}

async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}

async fn session(stream: TcpStream, output: Output) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut envelope = Envelope::default();

    reply(&mut writer, "220 forklift debugging SMTP server").await?;

    while let Some(line) = lines.next_line().await? {
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim().to_string()),
            None => (line.trim().to_ascii_uppercase(), String::new()),
        };

        match verb.as_str() {
            "HELO" | "EHLO" => reply(&mut writer, "250 forklift").await?,
            "MAIL" => {
                envelope = Envelope {
                    from: Some(address(&arg)),
                    recipients: Vec::new(),
                };
                reply(&mut writer, "250 OK").await?;
            }
            "RCPT" => {
                if envelope.from.is_none() {
                    reply(&mut writer, "503 Error: need MAIL command").await?;
                    continue;
                }
                envelope.recipients.push(address(&arg));
                reply(&mut writer, "250 OK").await?;
            }
            "DATA" => {
                if envelope.recipients.is_empty() {
                    reply(&mut writer, "503 Error: need RCPT command").await?;
                    continue;
                }
                reply(&mut writer, "354 End data with <CR><LF>.<CR><LF>").await?;

                let mut body = Vec::new();
                while let Some(data) = lines.next_line().await? {
                    if data == "." {
                        break;
                    }
                    // Undo dot-stuffing.
                    let data = match data.strip_prefix('.') {
                        Some(rest) if rest.starts_with('.') => rest.to_string(),
                        _ => data,
                    };
                    body.push(data);
                }

                output(&render(&envelope, &body));
                envelope = Envelope::default();
                reply(&mut writer, "250 OK").await?;
            }
            "RSET" => {
                envelope = Envelope::default();
                reply(&mut writer, "250 OK").await?;
            }
            "NOOP" => reply(&mut writer, "250 OK").await?,
            "QUIT" => {
                reply(&mut writer, "221 Bye").await?;
                break;
            }
            _ => {
                reply(&mut writer, &format!("500 Error: command \"{verb}\" not recognized")).await?
            }
        }
    }
    Ok(())
}

/// `FROM:<a@b>` → `a@b`.
fn address(arg: &str) -> String {
    let value = arg.split_once(':').map(|(_, v)| v).unwrap_or(arg).trim();
    value
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

fn render(envelope: &Envelope, body: &[String]) -> String {
    let mut out = vec![BANNER.to_string()];
    if let Some(from) = &envelope.from {
        out.push(format!("X-Envelope-From: {from}"));
    }
    out.push(format!("X-Envelope-To: {}", envelope.recipients.join(", ")));
    out.extend(body.iter().cloned());
    out.push(FOOTER.to_string());
    out.join("\n")
}
