use chrono::{TimeZone, Utc};
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, Address, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    pub fn new(relay: &str, username: &str, password: &str) -> anyhow::Result<Mailer> {
        let address = username.parse::<Address>()?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(relay)?
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();
        Ok(Mailer {
            transport,
            from: Mailbox::new(Some("Campus Event Hub".to_string()), address),
        })
    }

    pub async fn sanity_check(&self) -> anyhow::Result<()> {
        if self.transport.test_connection().await? {
            Ok(())
        } else {
            Err(anyhow::anyhow!("smtp relay refused the connection"))
        }
    }

    pub async fn send(&self, to: &str, subject: &str, body: String) -> anyhow::Result<()> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(None, to.parse::<Address>()?))
            .subject(subject)
            .body(body)?;
        self.transport.send(email).await?;
        Ok(())
    }
}

/// Sends if a mailer is configured. Failures are logged, never returned.
pub async fn notify(mailer: Option<&Mailer>, to: &str, subject: &str, body: String) {
    let Some(mailer) = mailer else {
        tracing::debug!(%to, %subject, "mail disabled, skipping notice");
        return;
    };
    if let Err(e) = mailer.send(to, subject, body).await {
        tracing::warn!(error = %e, %to, %subject, "failed to send notice");
    }
}

fn format_time(unix: i64) -> String {
    Utc.timestamp_opt(unix, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| unix.to_string())
}

pub fn offer_notice(username: &str, event_name: &str, expires_at: i64) -> (String, String) {
    let subject = format!("A seat opened up for {event_name}");
    let body = format!(
        r#"Hi {username},

A seat has opened up for "{event_name}" and it is being held for you until {}.

Confirm it from your dashboard before then, otherwise it goes to the next person on the waitlist.

Thanks,
The Campus Event Hub Team."#,
        format_time(expires_at),
    );
    (subject, body)
}

pub fn cancellation_notice(username: &str, event_name: &str, start_time: i64) -> (String, String) {
    let subject = format!("{event_name} has been cancelled");
    let body = format!(
        r#"Hi {username},

"{event_name}", scheduled for {}, has been cancelled by the organisers and your registration has been removed.

Thanks,
The Campus Event Hub Team."#,
        format_time(start_time),
    );
    (subject, body)
}
