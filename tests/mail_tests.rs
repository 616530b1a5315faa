use std::time::Duration;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use notification_service::{
    clients::mail::{DeliveryError, MailDispatcher, SmtpMailDispatcher},
    models::{event::NotificationEvent, settings::SmtpSettings},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    time::Instant,
};

fn dispatcher(port: u16) -> Result<SmtpMailDispatcher> {
    SmtpMailDispatcher::new(SmtpSettings {
        host: "127.0.0.1".to_string(),
        port,
        secure: false,
        username: String::new(),
        password: String::new(),
        from_name: "User Management System".to_string(),
        from_email: "noreply@example.com".to_string(),
        timeout: Duration::from_secs(1),
    })
}

fn event(email: &str) -> NotificationEvent {
    NotificationEvent {
        user_id: "u1".to_string(),
        email: email.to_string(),
        full_name: "A B".to_string(),
        message: "hi".to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

/// Accepts connections and never says a word.
async fn silent_server() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    Ok(port)
}

/// A port nothing listens on.
async fn closed_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

/// Minimal SMTP server answering every RCPT TO with `rcpt_reply`.
async fn scripted_server(rcpt_reply: &'static str) -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_smtp(socket, rcpt_reply));
        }
    });

    Ok(port)
}

async fn serve_smtp(socket: TcpStream, rcpt_reply: &'static str) -> std::io::Result<()> {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut in_data = false;

    write.write_all(b"220 localhost ESMTP ready\r\n").await?;

    while let Some(line) = lines.next_line().await? {
        if in_data {
            if line == "." {
                in_data = false;
                write.write_all(b"250 2.0.0 queued\r\n").await?;
            }
            continue;
        }

        let verb = line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        let reply = match verb.as_str() {
            "EHLO" | "HELO" => "250 localhost\r\n",
            "MAIL" | "RSET" | "NOOP" => "250 2.0.0 OK\r\n",
            "RCPT" => rcpt_reply,
            "DATA" => {
                in_data = true;
                "354 end data with <CR><LF>.<CR><LF>\r\n"
            }
            "QUIT" => {
                write.write_all(b"221 2.0.0 bye\r\n").await?;
                return Ok(());
            }
            _ => "502 5.5.2 command not recognized\r\n",
        };

        write.write_all(reply.as_bytes()).await?;
    }

    Ok(())
}

/// Test: A transport that never answers times out as a transient failure
#[tokio::test]
async fn test_silent_server_is_transient() -> Result<()> {
    let mail = dispatcher(silent_server().await?)?;

    let started = Instant::now();
    assert!(!mail.verify().await);
    assert!(started.elapsed() < Duration::from_secs(3));

    let started = Instant::now();
    let result = mail.send(&event("a@b.com")).await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(
        matches!(result, Err(ref e) if e.is_transient()),
        "expected a transient failure, got {:?}",
        result
    );

    Ok(())
}

/// Test: A refused connection is transient and fails verification
#[tokio::test]
async fn test_closed_port_is_transient() -> Result<()> {
    let mail = dispatcher(closed_port().await?)?;

    assert!(!mail.verify().await);
    assert!(matches!(
        mail.send(&event("a@b.com")).await,
        Err(DeliveryError::Transient(_))
    ));

    Ok(())
}

/// Test: A recipient refused with a 5xx reply is a permanent failure
#[tokio::test]
async fn test_rejected_recipient_is_permanent() -> Result<()> {
    let mail = dispatcher(scripted_server("550 5.1.1 mailbox unavailable\r\n").await?)?;

    assert!(matches!(
        mail.send(&event("a@b.com")).await,
        Err(DeliveryError::Permanent(_))
    ));

    Ok(())
}

/// Test: A responsive server verifies and accepts the welcome email
#[tokio::test]
async fn test_responsive_server_delivers() -> Result<()> {
    let mail = dispatcher(scripted_server("250 2.1.5 OK\r\n").await?)?;

    assert!(mail.verify().await);
    mail.send(&event("a@b.com")).await?;

    Ok(())
}

/// Test: An unparseable recipient is permanent and never reaches the network
#[tokio::test]
async fn test_invalid_recipient_is_permanent() -> Result<()> {
    let mail = dispatcher(closed_port().await?)?;

    assert!(matches!(
        mail.send(&event("not an address")).await,
        Err(DeliveryError::Permanent(_))
    ));

    Ok(())
}

/// Test: Transport details are reported without credentials
#[tokio::test]
async fn test_describe_reports_transport() -> Result<()> {
    let mail = dispatcher(2525)?;

    let details = mail.describe();

    assert_eq!(details["host"], "127.0.0.1");
    assert_eq!(details["port"], 2525);
    assert_eq!(details["secure"], false);
    assert!(details.get("password").is_none());

    Ok(())
}
